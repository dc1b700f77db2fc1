//! Plain-message front end: decides whether a channel message is a question
//! for the bot and, if so, answers it in the same channel.

use std::fmt;
use std::str::FromStr;

use poise::serenity_prelude as serenity;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::commands::split_message;
use crate::retrieval::keyword;
use crate::scope::{self, EventMeta, ScopePolicy};
use crate::state::AppState;

/// Which plain messages count as questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageTrigger {
    /// Only messages that mention the bot.
    #[default]
    Mention,
    /// Mentions, plus messages that look like a question about the mod.
    Heuristic,
    /// Slash commands only.
    Off,
}

impl FromStr for MessageTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mention" | "mentions" => Ok(MessageTrigger::Mention),
            "heuristic" | "auto" => Ok(MessageTrigger::Heuristic),
            "off" | "none" | "disabled" => Ok(MessageTrigger::Off),
            other => Err(format!("unknown message trigger '{other}'")),
        }
    }
}

impl fmt::Display for MessageTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageTrigger::Mention => "mention",
            MessageTrigger::Heuristic => "heuristic",
            MessageTrigger::Off => "off",
        };
        f.write_str(name)
    }
}

const DOMAIN_TERMS: &[&str] = &[
    "jail", "bail", "parole", "crime", "arrest", "lsi", "sentence", "prison", "cell", "guard",
    "warrant", "probation", "booking", "inmate", "wanted", "release",
];

fn mentions_bot(content: &str, bot_id: u64) -> bool {
    content.contains(&format!("<@{bot_id}>")) || content.contains(&format!("<@!{bot_id}>"))
}

/// Remove the bot's mentions and collapse whitespace.
pub fn clean_content(content: &str, bot_id: u64) -> String {
    content
        .replace(&format!("<@!{bot_id}>"), " ")
        .replace(&format!("<@{bot_id}>"), " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn looks_like_question(text: &str) -> bool {
    text.contains('?')
        || keyword::tokenize(text)
            .iter()
            .any(|t| DOMAIN_TERMS.contains(&t.as_str()))
}

/// The question carried by a message, if the trigger policy says it is one.
pub fn extract_question(
    content: &str,
    bot_id: u64,
    mentioned: bool,
    trigger: MessageTrigger,
) -> Option<String> {
    let mentioned = mentioned || mentions_bot(content, bot_id);
    let wanted = match trigger {
        MessageTrigger::Off => false,
        MessageTrigger::Mention => mentioned,
        MessageTrigger::Heuristic => mentioned || looks_like_question(content),
    };
    if !wanted {
        return None;
    }
    let question = clean_content(content, bot_id);
    (!question.is_empty()).then_some(question)
}

pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    framework: poise::FrameworkContext<'_, AppState, anyhow::Error>,
    data: &AppState,
) -> Result<(), anyhow::Error> {
    if let serenity::FullEvent::Message { new_message } = event {
        handle_message(ctx, new_message, framework.bot_id, data).await?;
    }
    Ok(())
}

async fn handle_message(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    bot_id: serenity::UserId,
    data: &AppState,
) -> Result<(), anyhow::Error> {
    if msg.author.bot || msg.author.id == bot_id {
        return Ok(());
    }
    if !data.config.channel_allowed(msg.channel_id.get()) {
        return Ok(());
    }

    let Some(question) = extract_question(
        &msg.content,
        bot_id.get(),
        msg.mentions_user_id(bot_id),
        data.config.discord.message_trigger,
    ) else {
        return Ok(());
    };

    let policy = data.config.discord.scope;
    let meta = event_meta(ctx, msg.guild_id, msg.channel_id, msg.author.id, policy).await;
    let scope_key = scope::resolve(policy, &meta);
    info!(
        user = %msg.author.name,
        scope = %scope_key,
        question_len = question.len(),
        "message question received"
    );

    let typing = msg.channel_id.start_typing(&ctx.http);
    let answer = data.orchestrator.answer(&question, &scope_key).await;
    typing.stop();

    let mut parts = split_message(&answer.text).into_iter();
    if let Some(first) = parts.next() {
        msg.reply(ctx, first).await?;
    }
    for part in parts {
        msg.channel_id.say(ctx, part).await?;
    }
    Ok(())
}

/// Scoping facts for an event. The channel is only fetched (to detect
/// threads) when the policy needs it.
pub async fn event_meta(
    ctx: &serenity::Context,
    guild_id: Option<serenity::GuildId>,
    channel_id: serenity::ChannelId,
    user_id: serenity::UserId,
    policy: ScopePolicy,
) -> EventMeta {
    let thread_id = if policy == ScopePolicy::PerThread && guild_id.is_some() {
        thread_id(ctx, channel_id).await
    } else {
        None
    };
    EventMeta {
        guild_id: guild_id.map(|g| g.get()),
        channel_id: channel_id.get(),
        user_id: user_id.get(),
        thread_id,
    }
}

async fn thread_id(ctx: &serenity::Context, channel_id: serenity::ChannelId) -> Option<u64> {
    let thread = match channel_id.to_channel(ctx).await {
        Ok(channel) => channel.guild().and_then(|gc| {
            matches!(
                gc.kind,
                serenity::ChannelType::PublicThread
                    | serenity::ChannelType::PrivateThread
                    | serenity::ChannelType::NewsThread
            )
            .then(|| gc.id.get())
        }),
        Err(e) => {
            warn!(channel = %channel_id, error = %e, "channel lookup failed, using channel scope");
            None
        }
    };
    if let Some(thread) = thread {
        debug!(thread, "event is in a thread");
    }
    thread
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: u64 = 1234;

    #[test]
    fn mention_mode_needs_a_mention() {
        assert_eq!(
            extract_question("<@1234>   how does   bail work?", BOT, true, MessageTrigger::Mention),
            Some("how does bail work?".to_string())
        );
        assert_eq!(
            extract_question("how does bail work?", BOT, false, MessageTrigger::Mention),
            None
        );
    }

    #[test]
    fn nickname_mentions_are_stripped_too() {
        assert_eq!(clean_content("hey <@!1234>\n\nparole?", BOT), "hey parole?");
        assert_eq!(clean_content("<@999> hi", BOT), "<@999> hi");
    }

    #[test]
    fn mention_in_text_counts_when_not_parsed() {
        assert_eq!(
            extract_question("<@!1234> parole?", BOT, false, MessageTrigger::Mention),
            Some("parole?".to_string())
        );
    }

    #[test]
    fn bare_mention_is_not_a_question() {
        assert_eq!(extract_question("<@1234>", BOT, true, MessageTrigger::Mention), None);
    }

    #[test]
    fn heuristic_mode_accepts_domain_questions() {
        let q = |text: &str| extract_question(text, BOT, false, MessageTrigger::Heuristic);
        assert!(q("anyone know when parole starts").is_some());
        assert!(q("what's the LSI level for").is_some());
        assert!(q("is this working?").is_some());
        assert!(q("gg everyone").is_none());
    }

    #[test]
    fn off_mode_ignores_everything() {
        assert_eq!(
            extract_question("<@1234> bail?", BOT, true, MessageTrigger::Off),
            None
        );
    }

    #[test]
    fn trigger_parses_aliases() {
        assert_eq!("Heuristic".parse::<MessageTrigger>(), Ok(MessageTrigger::Heuristic));
        assert_eq!("none".parse::<MessageTrigger>(), Ok(MessageTrigger::Off));
        assert!("sometimes".parse::<MessageTrigger>().is_err());
        assert_eq!(MessageTrigger::default().to_string(), "mention");
    }
}
