use tracing::info;

use crate::commands::{is_admin, scope_key, send_chunked};
use crate::orchestrator::{Answer, Outcome};
use crate::state::Context;

/// Ask a question about the Behind Bars mod
#[poise::command(slash_command)]
pub async fn ask(
    ctx: Context<'_>,
    #[description = "Your question"] question: String,
    #[description = "Show retrieved passages (admin only)"] debug: Option<bool>,
) -> Result<(), anyhow::Error> {
    // Generation can take a while; acknowledge within Discord's 3s window.
    ctx.defer().await?;

    let show_debug = debug.unwrap_or(false) && is_admin(&ctx);
    let scope = scope_key(&ctx).await;
    info!(
        user = %ctx.author().name,
        scope = %scope,
        show_debug,
        "/ask received"
    );

    let answer = ctx.data().orchestrator.answer(&question, &scope).await;

    let mut full = answer.text.clone();
    if show_debug {
        full.push_str(&debug_evidence(&answer));
    }
    send_chunked(&ctx, &full).await
}

fn debug_evidence(answer: &Answer) -> String {
    let mut out = String::from("\n\n---\n");
    if let Outcome::Failed(e) = &answer.outcome {
        out.push_str(&format!("**[Debug] Generation failed:** {}\n", e));
    }
    out.push_str("**[Debug] Retrieved passages:**\n");
    if answer.passages.is_empty() {
        out.push_str("No passages retrieved.\n");
    }
    for (i, passage) in answer.passages.iter().enumerate().take(3) {
        out.push_str(&format!(
            "\n**[{}]** {} `{}` chars {}..{} (score {:.3})\n```\n{}\n```\n",
            i + 1,
            passage.doc_title,
            passage.chunk.id(),
            passage.chunk.offset,
            passage.chunk.offset + passage.chunk.len,
            passage.score,
            passage.snippet.replace("```", "'''")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::Chunk;
    use crate::error::GenerationError;
    use crate::retrieval::Passage;

    #[test]
    fn evidence_lists_passages_with_scores() {
        let answer = Answer {
            text: "Pay at the desk.".into(),
            passages: vec![Passage {
                chunk: Chunk {
                    doc_index: 0,
                    doc_id: "bail".into(),
                    index: 2,
                    offset: 3400,
                    len: 10,
                    text: "bail text".into(),
                },
                doc_title: "Bail System".into(),
                score: 1.23456,
                snippet: "```bail text```".into(),
            }],
            outcome: Outcome::Answered,
        };
        let evidence = debug_evidence(&answer);
        assert!(evidence.contains("Bail System `bail#2` chars 3400..3410 (score 1.235)"));
        assert!(evidence.contains("'''bail text'''"));
    }

    #[test]
    fn evidence_notes_empty_retrieval_and_failure() {
        let answer = Answer {
            text: "Sorry".into(),
            passages: Vec::new(),
            outcome: Outcome::Failed(GenerationError::Timeout(std::time::Duration::from_secs(60))),
        };
        let evidence = debug_evidence(&answer);
        assert!(evidence.contains("No passages retrieved."));
        assert!(evidence.contains("Generation failed:** LLM request timed out"));
    }
}
