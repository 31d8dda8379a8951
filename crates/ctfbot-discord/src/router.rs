use std::sync::{atomic::AtomicBool, Arc};

use serenity::prelude::*;
use tokio_util::sync::CancellationToken;

use ctfbot_core::{ask::AskService, config::Config, pipeline::CommandPipeline};

use crate::handlers::Handler;

pub struct AppState {
    pub cfg: Arc<Config>,
    pub pipeline: Arc<CommandPipeline>,
    pub ask: Arc<AskService>,
    /// Fires on process shutdown; the presence rotator listens to it.
    pub cancel: CancellationToken,
    pub(crate) rotator_started: AtomicBool,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        pipeline: Arc<CommandPipeline>,
        ask: Arc<AskService>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            pipeline,
            ask,
            cancel,
            rotator_started: AtomicBool::new(false),
        }
    }
}

/// Connect to the gateway and serve interactions until the shards stop or
/// `state.cancel` fires.
pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    // Slash commands need no privileged intents; GUILDS keeps the guild cache
    // populated for the live guild counter.
    let intents = GatewayIntents::GUILDS;

    let mut client = Client::builder(&state.cfg.discord_token, intents)
        .event_handler(Handler::new(state.clone()))
        .await?;

    let shard_manager = client.shard_manager.clone();
    let cancel = state.cancel.clone();
    tokio::spawn(async move {
        cancel.cancelled().await;
        tracing::info!("shutting down shards");
        shard_manager.shutdown_all().await;
    });

    let result = client.start().await;
    // Stop background tasks whichever way the gateway ended.
    state.cancel.cancel();
    result?;
    Ok(())
}
