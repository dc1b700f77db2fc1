use crate::commands::send_chunked;
use crate::retrieval::DocumentSummary;
use crate::state::Context;

/// List the loaded knowledge documents
#[poise::command(slash_command)]
pub async fn sources(
    ctx: Context<'_>,
    #[description = "Max documents to show"] limit: Option<u32>,
) -> Result<(), anyhow::Error> {
    let limit = limit.unwrap_or(25) as usize;
    let retrieval = &ctx.data().retrieval;
    let docs = retrieval.documents().await;

    if docs.is_empty() {
        ctx.say("No knowledge documents are loaded.").await?;
        return Ok(());
    }

    let params = retrieval.params();
    let conversations = ctx.data().orchestrator.conversations().scope_count().await;
    let header = format!(
        "**Knowledge Documents** ({} loaded, `{}` retrieval, chunks of {} chars with {} overlap, {} active conversations)\n\n",
        docs.len(),
        retrieval.strategy().await,
        params.size(),
        params.overlap(),
        conversations
    );
    send_chunked(&ctx, &render(&header, &docs, limit)).await
}

fn render(header: &str, docs: &[DocumentSummary], limit: usize) -> String {
    let mut output = header.to_string();
    for doc in docs.iter().take(limit) {
        output.push_str(&format!(
            "- **{}** [{}] ({:.1} KB, {} chunks) `{}`\n",
            doc.title,
            doc.id,
            doc.chars as f64 / 1024.0,
            doc.chunks,
            doc.source
        ));
    }
    if docs.len() > limit {
        output.push_str(&format!("...and {} more\n", docs.len() - limit));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, chars: usize) -> DocumentSummary {
        DocumentSummary {
            id: id.to_string(),
            title: id.to_uppercase(),
            source: format!("{id}.md"),
            chars,
            chunks: 2,
        }
    }

    #[test]
    fn render_lists_and_truncates() {
        let docs = vec![doc("bail", 2048), doc("parole", 10), doc("faq", 10)];
        let out = render("H\n", &docs, 2);
        assert!(out.starts_with("H\n"));
        assert!(out.contains("- **BAIL** [bail] (2.0 KB, 2 chunks) `bail.md`"));
        assert!(out.contains("PAROLE"));
        assert!(!out.contains("FAQ"));
        assert!(out.ends_with("...and 1 more\n"));
    }
}
