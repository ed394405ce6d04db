//! Bot lifecycle: open the store, connect the gateway and run the event loop.
//!
//! Events are handled one at a time to completion, so [`Bot`] is owned by the
//! loop and handlers borrow it mutably without any locking.

use std::path::PathBuf;
use std::time::Instant;

use tracing::{info, trace, warn};

use crate::blessing::RewardSelector;
use crate::commands::BlessingService;
use crate::config::Config;
use crate::events::GatewayEvent;
use crate::gateway::{self, GatewayConfig};
use crate::handlers;
use crate::http::DiscordHttpClient;
use crate::stats::{JsonStatStore, StoreError};
use crate::types::Intents;

/// Identity learned from READY.
#[derive(Debug)]
pub struct BotState {
    pub bot_user_id: Option<String>,
    pub start_time: Instant,
}

impl BotState {
    /// Whether `user_id` is the bot itself, once READY has told us who that is.
    pub fn is_self(&self, user_id: &str) -> bool {
        self.bot_user_id.as_deref() == Some(user_id)
    }
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            bot_user_id: None,
            start_time: Instant::now(),
        }
    }
}

/// Everything a handler needs.
pub struct Bot {
    pub http: DiscordHttpClient,
    pub service: BlessingService<JsonStatStore>,
    pub image_dir: PathBuf,
    pub state: BotState,
}

impl Bot {
    pub fn new(config: &Config) -> Result<Self, StoreError> {
        let store = JsonStatStore::open(&config.stats_path)?;
        let service =
            BlessingService::new(RewardSelector::default(), store).with_prefix(&config.prefix);
        Ok(Self {
            http: DiscordHttpClient::new(&config.token),
            service,
            image_dir: config.image_dir.clone(),
            state: BotState::default(),
        })
    }
}

/// Message-based commands need the privileged MESSAGE_CONTENT intent.
pub fn gateway_intents() -> Intents {
    Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::DIRECT_MESSAGES | Intents::MESSAGE_CONTENT
}

/// Run until the gateway driver gives up.
pub async fn run(config: Config) -> Result<(), StoreError> {
    let mut bot = Bot::new(&config)?;

    let mut gw = gateway::connect(GatewayConfig {
        token: config.token.clone(),
        intents: gateway_intents(),
    });
    info!(prefix = %config.prefix, "gateway started, entering event loop");

    while let Some(event) = gw.events.recv().await {
        match event {
            GatewayEvent::Ready(ready) => handlers::on_ready(&mut bot, ready),
            GatewayEvent::MessageCreate(msg) => {
                if msg.author.bot || bot.state.is_self(&msg.author.id) {
                    continue;
                }
                handlers::on_message(&mut bot, msg).await;
            }
            GatewayEvent::Unknown {
                event_name: Some(name),
                ..
            } => trace!(event = %name, "unhandled gateway event"),
            _ => {}
        }
    }

    if let Err(e) = gw.driver.await {
        warn!(error = %e, "gateway driver task failed");
    }
    warn!(
        uptime_s = bot.state.start_time.elapsed().as_secs(),
        "event stream ended, bot shutting down"
    );
    Ok(())
}
