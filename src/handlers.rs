//! Gateway event handlers.
//!
//! Each handler turns one event into calls on [`BlessingService`] and renders
//! the resulting [`Reply`] as a Discord message. Errors stop here: they are
//! logged and reported to the user, never propagated to the event loop.
//!
//! [`BlessingService`]: crate::commands::BlessingService

use std::path::Path;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::bot::Bot;
use crate::commands::{error_reply, leaderboard_reply, Command, CommandError, Reply};
use crate::http::FileUpload;
use crate::stats::RarityCounts;
use crate::types::{CreateMessage, Message, ReadyEvent};

pub fn on_ready(bot: &mut Bot, ready: ReadyEvent) {
    info!(
        user = %ready.user.tag(),
        guilds = ready.guilds.len(),
        "logged in"
    );
    bot.state.bot_user_id = Some(ready.user.id);
}

pub async fn on_message(bot: &mut Bot, msg: Message) {
    let command = match Command::parse(&msg.content, bot.service.prefix()) {
        Ok(Some(command)) => command,
        Ok(None) => return,
        Err(unknown) => {
            debug!(command = %unknown, user = %msg.author.id, "ignoring unknown command");
            return;
        }
    };
    info!(command = command.name(), user = %msg.author.id, "command invoked");

    match command {
        Command::Bless => bless(bot, &msg).await,
        Command::MyStats => {
            let reply = bot
                .service
                .my_stats(&msg.author.id, msg.author_display_name());
            send_reply(bot, &msg, reply).await;
        }
        Command::Leaderboard => {
            let ranked = bot.service.leaderboard();
            let entries = resolve_names(bot, ranked).await;
            send_reply(bot, &msg, leaderboard_reply(&entries)).await;
        }
        Command::Help => {
            let reply = bot.service.help();
            send_reply(bot, &msg, reply).await;
        }
    }
}

async fn bless(bot: &mut Bot, msg: &Message) {
    let drawn = {
        let mut rng = rand::thread_rng();
        bot.service.bless(&msg.author.id, Utc::now(), &mut rng)
    };

    let blessed = match drawn {
        Ok(blessed) => blessed,
        Err(e) => {
            if let CommandError::OnCooldown(wait) = &e {
                debug!(user = %msg.author.id, wait_s = wait.num_seconds(), "bless on cooldown");
            } else {
                error!(user = %msg.author.id, error = %e, "bless failed");
            }
            send_reply(bot, msg, e.reply()).await;
            return;
        }
    };

    // The draw stands even if it could not be written.
    send_reply(bot, msg, blessed.reply).await;

    if let Err(first) = blessed.persisted {
        warn!(user = %msg.author.id, error = %first, "failed to persist blessing, retrying");
        if let Err(e) = bot.service.retry_persist() {
            error!(user = %msg.author.id, rarity = ?blessed.rarity, error = %e, "blessing was not saved");
            send_reply(bot, msg, unsaved_reply(&CommandError::Storage(e))).await;
        }
    }
}

fn unsaved_reply(err: &CommandError) -> Reply {
    Reply::text(format!(
        "Your blessing was granted but could not be saved: {}",
        err
    ))
}

/// Swap user ids for usernames, falling back to the raw id.
async fn resolve_names(
    bot: &Bot,
    ranked: Vec<(String, RarityCounts)>,
) -> Vec<(String, RarityCounts)> {
    let mut entries = Vec::with_capacity(ranked.len());
    for (user_id, counts) in ranked {
        let name = match bot.http.get_user(&user_id).await {
            Ok(user) => user.username,
            Err(e) => {
                warn!(user = %user_id, error = %e, "failed to fetch user for leaderboard");
                fallback_name(&user_id)
            }
        };
        entries.push((name, counts));
    }
    entries
}

fn fallback_name(user_id: &str) -> String {
    format!("Unknown user ({})", user_id)
}

/// Build the outgoing message for `reply`, answering `reply_to`.
///
/// When `with_image` is false any embed reference to the attachment is
/// dropped so Discord doesn't render a broken image.
pub fn render(reply: &Reply, reply_to: &str, with_image: bool) -> CreateMessage {
    let mut out = CreateMessage::new().reply_to(reply_to);
    if let Some(content) = &reply.content {
        out = out.content(content.clone());
    }
    if let Some(embed) = &reply.embed {
        let mut embed = embed.clone();
        if !with_image {
            embed.image = None;
        }
        out = out.embed(embed);
    }
    match &reply.image {
        Some(image) if with_image => out.attachment(0, image.filename.clone()),
        _ => out,
    }
}

async fn load_image(dir: &Path, reply: &Reply) -> Option<FileUpload> {
    let image = reply.image.as_ref()?;
    let path = dir.join(&image.path);
    match tokio::fs::read(&path).await {
        Ok(data) => Some(FileUpload {
            filename: image.filename.clone(),
            data,
        }),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "image unavailable, sending without it");
            None
        }
    }
}

async fn send_reply(bot: &Bot, msg: &Message, reply: Reply) {
    let upload = load_image(&bot.image_dir, &reply).await;
    let out = render(&reply, &msg.id, upload.is_some());

    let sent = match &upload {
        Some(file) => {
            bot.http
                .create_message_with_file(&msg.channel_id, &out, file)
                .await
        }
        None => bot.http.create_message(&msg.channel_id, &out).await,
    };

    if let Err(e) = sent {
        error!(channel = %msg.channel_id, error = %e, "failed to send reply");
        // Only worth retrying as plain text when the rich message was rejected.
        if reply.content.is_none() {
            let fallback = render(&error_reply(&e), &msg.id, false);
            if let Err(e) = bot.http.create_message(&msg.channel_id, &fallback).await {
                error!(channel = %msg.channel_id, error = %e, "failed to send error reply");
            }
        }
    }
}
