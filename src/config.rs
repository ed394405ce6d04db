//! Process configuration read from the environment (and `.env`).

use std::path::PathBuf;

/// Everything the bot needs at startup.
#[derive(Clone)]
pub struct Config {
    pub token: String,
    /// Location of the JSON stats document.
    pub stats_path: PathBuf,
    /// Directory blessing image paths are resolved against.
    pub image_dir: PathBuf,
    pub prefix: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
    #[error("{0} environment variable is empty")]
    Empty(&'static str),
}

pub const TOKEN_VAR: &str = "DISCORD_TOKEN";
pub const STATS_FILE_VAR: &str = "MYRA_STATS_FILE";
pub const IMAGE_DIR_VAR: &str = "MYRA_IMAGE_DIR";
pub const PREFIX_VAR: &str = "MYRA_COMMAND_PREFIX";

const DEFAULT_STATS_FILE: &str = "user_stats.json";
const DEFAULT_PREFIX: &str = "!";

impl Config {
    /// Load `.env` if present, then read the process environment.
    #[cfg(feature = "io")]
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup(TOKEN_VAR).ok_or(ConfigError::Missing(TOKEN_VAR))?;
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(ConfigError::Empty(TOKEN_VAR));
        }

        let non_empty = |key| lookup(key).filter(|v: &String| !v.trim().is_empty());

        Ok(Self {
            token,
            stats_path: non_empty(STATS_FILE_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATS_FILE)),
            image_dir: non_empty(IMAGE_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            prefix: non_empty(PREFIX_VAR).unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("token", &"<redacted>")
            .field("stats_path", &self.stats_path)
            .field("image_dir", &self.image_dir)
            .field("prefix", &self.prefix)
            .finish()
    }
}
