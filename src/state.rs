use std::sync::Arc;

use crate::config::BotConfig;
use crate::orchestrator::AnswerOrchestrator;
use crate::retrieval::RetrievalFacade;

pub struct AppState {
    pub config: Arc<BotConfig>,
    pub retrieval: Arc<RetrievalFacade>,
    pub orchestrator: Arc<AnswerOrchestrator>,
}

pub type Context<'a> = poise::Context<'a, AppState, anyhow::Error>;
