mod ask;
mod info;
mod manage;
mod sources;

use tracing::{error, warn};

use crate::events;
use crate::scope;
use crate::state::{AppState, Context};

/// Discord rejects messages over 2000 chars; leave a little headroom.
pub const MESSAGE_LIMIT: usize = 1990;

pub fn all() -> Vec<poise::Command<AppState, anyhow::Error>> {
    vec![
        ask::ask(),
        info::features(),
        info::guide(),
        manage::clear(),
        manage::reload(),
        sources::sources(),
    ]
}

/// Split `text` into Discord-sized parts, preferring newline then space
/// boundaries. Never splits inside a UTF-8 sequence.
pub fn split_message(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        if remaining.len() <= MESSAGE_LIMIT {
            parts.push(remaining.to_string());
            break;
        }
        let mut limit = MESSAGE_LIMIT;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }
        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|i| i + 1)
            .unwrap_or(limit);
        parts.push(remaining[..split_at].to_string());
        remaining = &remaining[split_at..];
    }
    parts
}

/// Send a message in Discord-safe chunks.
/// Uses ctx.say() for all chunks so follow-ups go through the interaction
/// webhook, which doesn't require Send Messages channel permission.
pub async fn send_chunked(ctx: &Context<'_>, text: &str) -> Result<(), anyhow::Error> {
    for part in split_message(text) {
        ctx.say(part).await?;
    }
    Ok(())
}

pub fn is_admin(ctx: &Context<'_>) -> bool {
    ctx.data().config.is_admin(ctx.author().id.get())
}

/// Conversation key for the invoking user and channel.
pub async fn scope_key(ctx: &Context<'_>) -> String {
    let policy = ctx.data().config.discord.scope;
    let meta = events::event_meta(
        ctx.serenity_context(),
        ctx.guild_id(),
        ctx.channel_id(),
        ctx.author().id,
        policy,
    )
    .await;
    scope::resolve(policy, &meta)
}

/// Commands only run in allowed channels. Admins are exempt.
pub async fn command_check(ctx: Context<'_>) -> Result<bool, anyhow::Error> {
    Ok(ctx.data().config.channel_allowed(ctx.channel_id().get()) || is_admin(&ctx))
}

pub async fn on_error(error: poise::FrameworkError<'_, AppState, anyhow::Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!(command = %ctx.command().name, user = %ctx.author().name, error = %error, "command failed");
            let _ = ctx
                .say("Sorry, something went wrong handling that command. Please try again later.")
                .await;
        }
        poise::FrameworkError::CommandCheckFailed { ctx, .. } => {
            let reply = poise::CreateReply::default()
                .content("I only answer in the configured channels.")
                .ephemeral(true);
            let _ = ctx.send(reply).await;
        }
        poise::FrameworkError::EventHandler { error, event, .. } => {
            error!(event = %event.snake_case_name(), error = %error, "event handler failed");
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                warn!(error = %e, "error while handling framework error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_part() {
        assert_eq!(split_message("hello"), vec!["hello"]);
        assert!(split_message("").is_empty());
    }

    #[test]
    fn long_text_splits_on_newlines() {
        let line = "x".repeat(100);
        let text = vec![line.as_str(); 50].join("\n");
        let parts = split_message(&text);
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|p| p.len() <= MESSAGE_LIMIT));
        assert!(parts[..parts.len() - 1].iter().all(|p| p.ends_with('\n')));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn unbroken_multibyte_text_splits_on_char_boundaries() {
        let text = "é".repeat(3000);
        let parts = split_message(&text);
        assert!(parts.iter().all(|p| p.len() <= MESSAGE_LIMIT));
        assert_eq!(parts.concat(), text);
    }
}
