//! Framework-independent command logic.
//!
//! [`BlessingService`] owns the reward table, the stat store and the
//! cooldown tracker, and turns each command into a [`Reply`]. Nothing here
//! touches the network; the handlers render replies into Discord messages.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{debug, info};

use crate::blessing::{Outcome, Rarity, RewardSelector};
use crate::cooldown::{self, CooldownTracker};
use crate::leaderboard;
use crate::stats::{RarityCounts, StatStore, StoreError};
use crate::types::Embed;

/// Cooldown key for the `bless` command.
pub const BLESS: &str = "bless";

const STATS_COLOR: u32 = 0x3498DB;
const LEADERBOARD_COLOR: u32 = 0xF1C40F;

/// Display order for per-user stats, rarest first.
const DISPLAY_ORDER: [Rarity; 5] = [
    Rarity::Mythic,
    Rarity::Legendary,
    Rarity::Epic,
    Rarity::Rare,
    Rarity::Common,
];

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Prefix commands the bot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Bless,
    MyStats,
    Leaderboard,
    Help,
}

impl Command {
    /// Parse `content` as `<prefix><name> [args]`.
    ///
    /// Returns `Ok(None)` when the message is not addressed to the bot at all,
    /// and `Err(name)` for a prefixed name we don't know.
    pub fn parse<'a>(content: &'a str, prefix: &str) -> Result<Option<Command>, &'a str> {
        let Some(rest) = content.trim().strip_prefix(prefix) else {
            return Ok(None);
        };
        let name = rest.split_whitespace().next().unwrap_or("");
        if name.is_empty() {
            return Ok(None);
        }
        match name {
            "bless" => Ok(Some(Command::Bless)),
            "mystats" => Ok(Some(Command::MyStats)),
            "leaderboard" => Ok(Some(Command::Leaderboard)),
            "help" => Ok(Some(Command::Help)),
            other => Err(other),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Bless => "bless",
            Command::MyStats => "mystats",
            Command::Leaderboard => "leaderboard",
            Command::Help => "help",
        }
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// A local image to upload with a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// Path relative to the image directory.
    pub path: String,
    /// Upload name, referenced by the embed as `attachment://<filename>`.
    pub filename: String,
}

impl ImageAttachment {
    pub fn from_path(path: &str) -> Self {
        let filename = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(path)
            .to_string();
        Self {
            path: path.to_string(),
            filename,
        }
    }
}

/// Structured message payload for the chat layer to render.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reply {
    pub content: Option<String>,
    pub embed: Option<Embed>,
    pub image: Option<ImageAttachment>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            embed: Some(embed),
            ..Default::default()
        }
    }

    /// Attach `image` and point the embed at it.
    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        if let Some(embed) = self.embed.take() {
            self.embed = Some(embed.attachment_image(&image.filename));
        }
        self.image = Some(image);
        self
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command is on cooldown")]
    OnCooldown(Duration),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Text shown to a user whose command failed.
pub fn error_reply(err: &dyn std::error::Error) -> Reply {
    Reply::text(format!("An error occurred: {}", err))
}

/// Text shown to a user who is still cooling down.
pub fn cooldown_reply(wait: Duration) -> Reply {
    Reply::text(format!(
        "⏳ You need to wait {} before using this command again.",
        cooldown::format_wait(wait)
    ))
}

impl CommandError {
    /// The reply this error should produce.
    pub fn reply(&self) -> Reply {
        match self {
            CommandError::OnCooldown(wait) => cooldown_reply(*wait),
            other => error_reply(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// The result of a successful `bless`.
///
/// The draw is final: if persisting failed, `persisted` carries the error and
/// the caller may retry with [`BlessingService::retry_persist`], but must not
/// draw again.
#[derive(Debug)]
pub struct Blessed {
    pub reply: Reply,
    /// `None` for the bad outcome.
    pub rarity: Option<Rarity>,
    pub persisted: Result<(), StoreError>,
}

/// Command state owned by the bot for its whole lifetime.
#[derive(Debug)]
pub struct BlessingService<S> {
    selector: RewardSelector,
    store: S,
    cooldowns: CooldownTracker,
    window: Duration,
    prefix: String,
}

impl<S: StatStore> BlessingService<S> {
    pub fn new(selector: RewardSelector, store: S) -> Self {
        Self {
            selector,
            store,
            cooldowns: CooldownTracker::new(),
            window: cooldown::daily(),
            prefix: "!".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_cooldown(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Draw a blessing for `user_id`, charging the daily cooldown.
    pub fn bless<R: Rng + ?Sized>(
        &mut self,
        user_id: &str,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Blessed, CommandError> {
        self.cooldowns
            .try_acquire(BLESS, user_id, now, self.window)
            .map_err(CommandError::OnCooldown)?;

        match self.selector.draw(rng) {
            Outcome::Bad(bad) => {
                info!(user = %user_id, "drew bad fortune");
                let reply = Reply::embed(
                    Embed::new()
                        .title("Bad Fortune")
                        .description(&bad.text)
                        .color(bad.color),
                )
                .with_image(ImageAttachment::from_path(&bad.image));
                Ok(Blessed {
                    reply,
                    rarity: None,
                    persisted: Ok(()),
                })
            }
            Outcome::Blessing(blessing) => {
                info!(user = %user_id, rarity = %blessing.rarity, "granted blessing");
                let reply = Reply::embed(
                    Embed::new()
                        .title(format!("Myra's Blessing: {}", blessing.rarity.label()))
                        .description(&blessing.text)
                        .color(blessing.color),
                )
                .with_image(ImageAttachment::from_path(&blessing.image));
                let rarity = blessing.rarity;
                let persisted = self.store.record_blessing(user_id, rarity);
                Ok(Blessed {
                    reply,
                    rarity: Some(rarity),
                    persisted,
                })
            }
        }
    }

    /// Re-attempt the write after a failed persist.
    pub fn retry_persist(&mut self) -> Result<(), StoreError> {
        self.store.flush()
    }

    /// The caller's counters as an embed, or a hint if they have none.
    pub fn my_stats(&self, user_id: &str, display_name: &str) -> Reply {
        let Some(stats) = self.store.get_stats(user_id) else {
            debug!(user = %user_id, "no stats yet");
            return Reply::text(format!(
                "You don't have any blessings yet. Use `{}bless` to get started!",
                self.prefix
            ));
        };
        Reply::embed(stats_embed(display_name, &stats))
    }

    /// The top users, before their names are resolved.
    pub fn leaderboard(&self) -> Vec<(String, RarityCounts)> {
        leaderboard::rank(self.store.all_stats())
    }

    pub fn help(&self) -> Reply {
        help_reply(&self.prefix)
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn stats_embed(display_name: &str, stats: &RarityCounts) -> Embed {
    DISPLAY_ORDER.iter().fold(
        Embed::new()
            .title(format!("{}'s Blessing Stats", display_name))
            .color(STATS_COLOR),
        |embed, rarity| embed.field(rarity.label(), stats.get(*rarity).to_string(), true),
    )
}

/// One leaderboard line: `Mythic: 1 | Legendary: 0 | ...`.
pub fn format_counts(stats: &RarityCounts) -> String {
    DISPLAY_ORDER
        .iter()
        .map(|r| format!("{}: {}", r.label(), stats.get(*r)))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Render ranked entries whose ids have been resolved to display names.
pub fn leaderboard_reply(entries: &[(String, RarityCounts)]) -> Reply {
    let mut embed = Embed::new()
        .title("Myra's Blessing Leaderboard")
        .color(LEADERBOARD_COLOR);
    if entries.is_empty() {
        embed = embed.description("No blessings have been granted yet.");
    }
    for (i, (name, stats)) in entries.iter().enumerate() {
        embed = embed.field(format!("{}. {}", i + 1, name), format_counts(stats), false);
    }
    Reply::embed(embed)
}

pub fn help_reply(prefix: &str) -> Reply {
    Reply::text(format!(
        "🔮 **Myra's Blessings**\n\
         • `{p}bless`: Receive Myra's blessing (once every 24 hours)\n\
         • `{p}mystats`: Show how many blessings of each rarity you have\n\
         • `{p}leaderboard`: Show the top 10 blessed users\n\
         • `{p}help`: Show this help message",
        p = prefix
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
