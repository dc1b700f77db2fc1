use crate::conversation::Turn;
use crate::llm::Message;
use crate::retrieval::Passage;

pub const SYSTEM_PROMPT: &str = "You are Behind Bars Bot, a helpful assistant knowledgeable about the Behind Bars mod for Schedule I. \
You help players understand how to use the mod's features in-game, including jail time, bail, parole, and crime tracking systems. \
Focus on in-game usage and gameplay mechanics, not source code or technical implementation. \
Answer questions about how the mod works, how to use features, and provide step-by-step guides.

Each question comes with reference notes about the mod. Use them naturally to answer, as if you already knew it. \
Do NOT mention document names, file paths, or that you were given notes. \
If the notes do not cover the question, say you are not sure rather than inventing mechanics. \
Keep answers short enough for a Discord message and use simple markdown (bold, lists) where it helps.";

/// Reference notes prepended to the user's question.
pub fn build_user_prompt(question: &str, passages: &[Passage]) -> String {
    if passages.is_empty() {
        return format!(
            "Reference notes: (none matched this question)\n\nQuestion: {}",
            question
        );
    }

    let mut prompt = String::from("Reference notes:\n");
    for (i, passage) in passages.iter().enumerate() {
        prompt.push_str(&format!(
            "\n--- [{}] {} ---\n{}\n",
            i + 1,
            passage.doc_title,
            passage.chunk.text.trim()
        ));
    }
    prompt.push_str(&format!("\nQuestion: {}", question));
    prompt
}

/// Prior turns as alternating user/assistant messages, oldest first.
pub fn history_messages<'a>(turns: impl IntoIterator<Item = &'a Turn>) -> Vec<Message> {
    turns
        .into_iter()
        .flat_map(|turn| {
            [
                Message::user(turn.question.clone()),
                Message::assistant(turn.answer.clone()),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::Chunk;

    fn passage(title: &str, text: &str) -> Passage {
        Passage {
            chunk: Chunk {
                doc_index: 0,
                doc_id: title.to_lowercase(),
                index: 0,
                offset: 0,
                len: text.chars().count(),
                text: text.to_string(),
            },
            doc_title: title.to_string(),
            score: 1.0,
            snippet: text.to_string(),
        }
    }

    #[test]
    fn prompt_numbers_passages_and_ends_with_question() {
        let prompt = build_user_prompt(
            "How much is bail?",
            &[passage("Bail", "Bail scales with crime severity."), passage("FAQ", "Ask a guard.")],
        );
        assert!(prompt.contains("[1] Bail"));
        assert!(prompt.contains("[2] FAQ"));
        assert!(prompt.ends_with("Question: How much is bail?"));
    }

    #[test]
    fn prompt_without_passages_says_so() {
        let prompt = build_user_prompt("hi", &[]);
        assert!(prompt.contains("none matched"));
    }

    #[test]
    fn history_alternates_roles() {
        let turns = vec![Turn::new("q1", "a1"), Turn::new("q2", "a2")];
        let messages = history_messages(&turns);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user", "assistant"]);
        assert_eq!(messages[2].content, "q2");
    }
}
