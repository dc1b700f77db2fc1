use tracing::{info, warn};

use crate::commands::{is_admin, scope_key};
use crate::retrieval::ReloadReport;
use crate::state::Context;

/// Forget the conversation history for this channel (or you, per scope policy)
#[poise::command(slash_command)]
pub async fn clear(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let scope = scope_key(&ctx).await;
    let dropped = ctx.data().orchestrator.conversations().clear(&scope).await;
    info!(user = %ctx.author().name, scope = %scope, dropped = dropped.len(), "conversation cleared");

    let content = match dropped.first() {
        Some(oldest) => format!(
            "Conversation cleared: forgot {} exchange(s) going back to <t:{}:R>.",
            dropped.len(),
            oldest.at.timestamp()
        ),
        None => "Nothing to clear, this conversation has no history yet.".to_string(),
    };
    let reply = poise::CreateReply::default().content(content).ephemeral(true);
    ctx.send(reply).await?;
    Ok(())
}

/// Re-read the knowledge documents (admin only)
#[poise::command(slash_command)]
pub async fn reload(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    if !is_admin(&ctx) {
        ctx.say("This command is admin-only.").await?;
        return Ok(());
    }
    ctx.defer().await?;

    let result = ctx.data().retrieval.reload().await;
    if let Err(e) = &result {
        warn!(error = %e, "manual reload failed");
    }
    ctx.say(reload_reply(&result)).await?;
    Ok(())
}

/// Plain-language summary of a reload. Error details stay in the logs.
fn reload_reply(result: &anyhow::Result<ReloadReport>) -> String {
    match result {
        Ok(report) => {
            let status = if report.changed {
                "Knowledge reloaded"
            } else {
                "Knowledge unchanged"
            };
            format!(
                "{}: {} documents, {} chunks, `{}` retrieval.",
                status, report.documents, report.chunks, report.strategy
            )
        }
        Err(_) => {
            "Reload failed, the previous knowledge is still in use. Check the bot logs for details."
                .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::StrategyKind;

    #[test]
    fn reload_failure_hides_details() {
        let err = anyhow::anyhow!("Failed to list \"/srv/bot/knowledge\": Permission denied (os error 13)");
        let reply = reload_reply(&Err(err));
        assert!(reply.starts_with("Reload failed"));
        assert!(!reply.contains("/srv"));
        assert!(!reply.contains("os error"));
    }

    #[test]
    fn reload_success_summarizes() {
        let report = ReloadReport {
            changed: true,
            documents: 6,
            chunks: 14,
            strategy: StrategyKind::Keyword,
        };
        assert_eq!(
            reload_reply(&Ok(report)),
            "Knowledge reloaded: 6 documents, 14 chunks, `keyword` retrieval."
        );
    }
}
