use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::conversation::{ConversationStore, Turn};
use crate::error::GenerationError;
use crate::llm::{Generator, Message};
use crate::prompts;
use crate::retrieval::{Passage, RetrievalFacade};

/// Upper bound for a single backoff sleep, whatever the server asks for.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub top_k: usize,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            top_k: config.knowledge.top_k,
            timeout: Duration::from_secs(config.llm.timeout_secs),
            max_attempts: config.llm.max_attempts.max(1),
            retry_base: Duration::from_millis(config.llm.retry_base_ms),
        }
    }

    fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponential = self
            .retry_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        retry_after.unwrap_or(exponential).min(MAX_BACKOFF)
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Answered,
    Failed(GenerationError),
}

/// What the front end posts, plus the evidence behind it.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub passages: Vec<Passage>,
    pub outcome: Outcome,
}

impl Answer {
    pub fn is_answered(&self) -> bool {
        matches!(self.outcome, Outcome::Answered)
    }
}

/// Runs one question through retrieval and generation, and owns the
/// per-scope conversation histories.
pub struct AnswerOrchestrator {
    retrieval: Arc<RetrievalFacade>,
    generator: Arc<dyn Generator>,
    conversations: ConversationStore,
    settings: OrchestratorSettings,
}

impl AnswerOrchestrator {
    pub fn new(
        retrieval: Arc<RetrievalFacade>,
        generator: Arc<dyn Generator>,
        max_turns: usize,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            retrieval,
            generator,
            conversations: ConversationStore::new(max_turns),
            settings,
        }
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Answer `question` in the conversation identified by `scope_key`.
    ///
    /// The scope's history stays locked for the whole turn, so questions in
    /// one scope are answered (and recorded) in arrival order. A failed turn
    /// leaves the history untouched.
    pub async fn answer(&self, question: &str, scope_key: &str) -> Answer {
        let started = Instant::now();
        let mut history = self.conversations.lock(scope_key).await;

        let passages = self.retrieval.search(question, self.settings.top_k).await;
        debug!(scope = scope_key, passages = passages.len(), "passages retrieved");

        let prior = prompts::history_messages(history.turns());
        let prompt = prompts::build_user_prompt(question, &passages);

        match self.generate(&prior, &prompt, scope_key).await {
            Ok(text) => {
                history.push(Turn::new(question, text.clone()));
                info!(
                    scope = scope_key,
                    passages = passages.len(),
                    history = history.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "question answered"
                );
                Answer {
                    text,
                    passages,
                    outcome: Outcome::Answered,
                }
            }
            Err(e) => {
                warn!(scope = scope_key, error = %e, "answer generation failed");
                Answer {
                    text: e.user_message().to_string(),
                    passages,
                    outcome: Outcome::Failed(e),
                }
            }
        }
    }

    async fn generate(
        &self,
        prior: &[Message],
        prompt: &str,
        scope_key: &str,
    ) -> Result<String, GenerationError> {
        let mut attempt = 1;
        loop {
            let result = tokio::time::timeout(
                self.settings.timeout,
                self.generator.generate(prompts::SYSTEM_PROMPT, prior, prompt),
            )
            .await
            .unwrap_or(Err(GenerationError::Timeout(self.settings.timeout)));

            match result {
                Err(e) if e.is_retryable() && attempt < self.settings.max_attempts => {
                    let retry_after = match &e {
                        GenerationError::RateLimited { retry_after } => *retry_after,
                        _ => None,
                    };
                    let wait = self.settings.backoff(attempt, retry_after);
                    warn!(
                        scope = scope_key,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
