//! Per-user blessing counters and their persistence.
//!
//! The store is a single JSON document mapping user ids to five counters:
//!
//! ```json
//! {"1234": {"common": 2, "rare": 1, "epic": 0, "legendary": 0, "mythic": 0}}
//! ```
//!
//! Every mutation rewrites the whole document. Users keep the order in which
//! they were first recorded, both in memory and on disk, so leaderboard ties
//! resolve the same way across restarts.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};

use crate::blessing::Rarity;

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// How many blessings of each rarity a user has received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RarityCounts {
    #[serde(default)]
    pub common: u64,
    #[serde(default)]
    pub rare: u64,
    #[serde(default)]
    pub epic: u64,
    #[serde(default)]
    pub legendary: u64,
    #[serde(default)]
    pub mythic: u64,
}

impl RarityCounts {
    pub fn get(&self, rarity: Rarity) -> u64 {
        match rarity {
            Rarity::Common => self.common,
            Rarity::Rare => self.rare,
            Rarity::Epic => self.epic,
            Rarity::Legendary => self.legendary,
            Rarity::Mythic => self.mythic,
        }
    }

    pub fn increment(&mut self, rarity: Rarity) {
        let slot = match rarity {
            Rarity::Common => &mut self.common,
            Rarity::Rare => &mut self.rare,
            Rarity::Epic => &mut self.epic,
            Rarity::Legendary => &mut self.legendary,
            Rarity::Mythic => &mut self.mythic,
        };
        *slot = slot.saturating_add(1);
    }

    /// Sum over all tiers.
    pub fn total(&self) -> u64 {
        Rarity::ALL.iter().map(|r| self.get(*r)).sum()
    }

    /// Leaderboard key: rarest tier first.
    pub fn rank_key(&self) -> (u64, u64, u64, u64, u64) {
        (self.mythic, self.legendary, self.epic, self.rare, self.common)
    }
}

// ---------------------------------------------------------------------------
// Ordered user map
// ---------------------------------------------------------------------------

/// User id → counters, iterated in first-insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserStats {
    entries: Vec<(String, RarityCounts)>,
    index: HashMap<String, usize>,
}

impl UserStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, user_id: &str) -> Option<&RarityCounts> {
        self.index.get(user_id).map(|&i| &self.entries[i].1)
    }

    /// Mutable counters for `user_id`, inserting a zeroed record at the end
    /// if the user is new.
    pub fn entry(&mut self, user_id: &str) -> &mut RarityCounts {
        let i = match self.index.get(user_id) {
            Some(&i) => i,
            None => {
                self.entries
                    .push((user_id.to_string(), RarityCounts::default()));
                let i = self.entries.len() - 1;
                self.index.insert(user_id.to_string(), i);
                i
            }
        };
        &mut self.entries[i].1
    }

    /// Insert or overwrite a user's counters.
    pub fn insert(&mut self, user_id: impl Into<String>, counts: RarityCounts) {
        let user_id = user_id.into();
        *self.entry(&user_id) = counts;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RarityCounts)> {
        self.entries.iter().map(|(id, c)| (id.as_str(), c))
    }

    /// Owned copy of every entry, in insertion order.
    pub fn snapshot(&self) -> Vec<(String, RarityCounts)> {
        self.entries.clone()
    }
}

impl Serialize for UserStats {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, counts) in &self.entries {
            map.serialize_entry(id, counts)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for UserStats {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct UserStatsVisitor;

        impl<'de> Visitor<'de> for UserStatsVisitor {
            type Value = UserStats;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of user ids to blessing counters")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<UserStats, A::Error> {
                let mut stats = UserStats::new();
                while let Some((id, counts)) = access.next_entry::<String, RarityCounts>()? {
                    stats.insert(id, counts);
                }
                Ok(stats)
            }
        }

        deserializer.deserialize_map(UserStatsVisitor)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read stats file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("stats file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write stats file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to serialise stats: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Durable per-user blessing counters.
pub trait StatStore {
    /// Increment `rarity` for `user_id` and persist the whole store.
    ///
    /// The in-memory increment survives a failed persist; call
    /// [`flush`](Self::flush) to retry the write.
    fn record_blessing(&mut self, user_id: &str, rarity: Rarity) -> Result<(), StoreError>;

    /// Counters for `user_id`, or `None` if they have never been blessed.
    fn get_stats(&self, user_id: &str) -> Option<RarityCounts>;

    /// Every user's counters, in first-recorded order.
    fn all_stats(&self) -> Vec<(String, RarityCounts)>;

    /// Persist the current state without changing it.
    fn flush(&mut self) -> Result<(), StoreError>;
}

/// Non-durable store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStatStore {
    stats: UserStats,
}

impl MemoryStatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatStore for MemoryStatStore {
    fn record_blessing(&mut self, user_id: &str, rarity: Rarity) -> Result<(), StoreError> {
        self.stats.entry(user_id).increment(rarity);
        Ok(())
    }

    fn get_stats(&self, user_id: &str) -> Option<RarityCounts> {
        self.stats.get(user_id).copied()
    }

    fn all_stats(&self) -> Vec<(String, RarityCounts)> {
        self.stats.snapshot()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Store backed by one JSON file, rewritten after every mutation.
#[derive(Debug)]
pub struct JsonStatStore {
    path: PathBuf,
    stats: UserStats,
}

impl JsonStatStore {
    /// Load `path`, or start empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let stats = load(&path)?;
        info!(path = %path.display(), users = stats.len(), "loaded blessing stats");
        Ok(Self { path, stats })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatStore for JsonStatStore {
    fn record_blessing(&mut self, user_id: &str, rarity: Rarity) -> Result<(), StoreError> {
        self.stats.entry(user_id).increment(rarity);
        save(&self.path, &self.stats)
    }

    fn get_stats(&self, user_id: &str) -> Option<RarityCounts> {
        self.stats.get(user_id).copied()
    }

    fn all_stats(&self) -> Vec<(String, RarityCounts)> {
        self.stats.snapshot()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        save(&self.path, &self.stats)
    }
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

/// Read a stats document. A missing file is an empty store.
pub fn load(path: &Path) -> Result<UserStats, StoreError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no stats file yet, starting empty");
            return Ok(UserStats::new());
        }
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&raw).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Overwrite `path` with `stats`: write a sibling temp file, then rename it
/// over the target so a crash never leaves a half-written document.
pub fn save(path: &Path, stats: &UserStats) -> Result<(), StoreError> {
    let body = serde_json::to_vec(stats)?;
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let base = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("user_stats.json");
    let tmp_path = dir.join(format!(".{}.tmp-{}", base, std::process::id()));

    let mut tmp = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(write_err)?;
    tmp.write_all(&body).map_err(write_err)?;
    tmp.sync_all().map_err(write_err)?;
    drop(tmp);

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_err(e));
    }
    if let Ok(dirf) = File::open(dir) {
        let _ = dirf.sync_all();
    }

    debug!(path = %path.display(), users = stats.len(), "saved blessing stats");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
