mod commands;
mod config;
mod conversation;
mod error;
mod events;
mod knowledge;
mod llm;
mod logging;
mod orchestrator;
mod prompts;
mod retrieval;
mod scope;
mod state;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use poise::serenity_prelude as serenity;
use poise::{Framework, FrameworkOptions};
use tracing::{error, info, warn};

use config::BotConfig;
use knowledge::CorpusSource;
use llm::LlmClient;
use orchestrator::{AnswerOrchestrator, OrchestratorSettings};
use retrieval::{RetrievalFacade, RetrievalSettings};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded = BotConfig::load();
    logging::init(loaded.as_ref().map(|c| c.debug).unwrap_or(false));
    let config = match loaded {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    info!(
        backend = %config.llm.backend,
        model = %config.llm.model,
        scope = %config.discord.scope,
        trigger = %config.discord.message_trigger,
        "configuration loaded"
    );

    // Knowledge + retrieval
    let settings = RetrievalSettings::from_config(&config)?;
    let source = CorpusSource::new(&config.knowledge.path, config.knowledge.readme_url.clone())?;
    info!("Knowledge directory: {:?}", source.dir());
    let retrieval = Arc::new(
        RetrievalFacade::build(source, settings, retrieval::embedding_provider(&config))
            .await?
            .with_fallback(retrieval::fallback_source(&config, settings.params)),
    );

    // Generation
    let llm_client = Arc::new(LlmClient::from_config(&config.llm)?);
    info!(model = llm_client.model(), "LLM client initialized");
    let orchestrator = Arc::new(AnswerOrchestrator::new(
        retrieval.clone(),
        llm_client,
        config.conversation.max_turns,
        OrchestratorSettings::from_config(&config),
    ));

    if config.knowledge.reload_interval_secs > 0 {
        spawn_reload_poll(
            retrieval.clone(),
            Duration::from_secs(config.knowledge.reload_interval_secs),
        );
    }

    let app_state = AppState {
        config: config.clone(),
        retrieval,
        orchestrator,
    };

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::DIRECT_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT;

    let sync_guilds = config.discord.sync_guilds.clone();
    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: commands::all(),
            command_check: Some(|ctx| Box::pin(commands::command_check(ctx))),
            on_error: |error| Box::pin(commands::on_error(error)),
            event_handler: |ctx, event, framework, data| {
                Box::pin(events::event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot connected as: {} ({})", ready.user.name, ready.user.id);

                let commands = &framework.options().commands;
                info!("Registering {} command(s):", commands.len());
                for cmd in commands {
                    info!("  /{}", cmd.name);
                }

                if sync_guilds.is_empty() {
                    info!("Registering globally (up to 1 hour delay)");
                    poise::builtins::register_globally(ctx, commands).await?;
                } else {
                    for gid in &sync_guilds {
                        info!("Registering to guild {} (instant)", gid);
                        poise::builtins::register_in_guild(
                            ctx,
                            commands,
                            serenity::GuildId::new(*gid),
                        )
                        .await?;
                    }
                }

                Ok(app_state)
            })
        })
        .build();

    info!("Starting Behind Bars bot...");

    let mut client = serenity::ClientBuilder::new(&config.discord.token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create client: {}", e))?;

    if let Err(e) = client.start().await {
        error!("Client error: {}", e);
    }

    Ok(())
}

/// Periodically re-read the knowledge directory. Reloads that find the same
/// fingerprint are no-ops.
fn spawn_reload_poll(retrieval: Arc<RetrievalFacade>, every: Duration) {
    info!(interval_secs = every.as_secs(), "knowledge reload poll enabled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately and the index is already fresh.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match retrieval.reload().await {
                Ok(report) if report.changed => {
                    info!(documents = report.documents, chunks = report.chunks, "knowledge changed on disk");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "scheduled knowledge reload failed"),
            }
        }
    });
}
