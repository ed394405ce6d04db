//! Myra's Blessings: a Discord bot that hands out one weighted random
//! blessing per user per day and keeps a leaderboard of who got what.
//!
//! The core (reward table, stat store, cooldowns, ranking and command logic)
//! has no network dependencies. The `io` feature adds the gateway, REST
//! client and event loop on top of it.

pub mod blessing;
pub mod commands;
pub mod config;
pub mod cooldown;
pub mod leaderboard;
pub mod stats;
pub mod types;

#[cfg(feature = "io")]
pub mod bot;
#[cfg(feature = "io")]
pub mod events;
#[cfg(feature = "io")]
pub mod gateway;
#[cfg(feature = "io")]
pub mod handlers;
#[cfg(feature = "io")]
pub mod http;
