use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ctfbot_core::{
    ask::AskService, config::Config, pipeline::CommandPipeline, ports::CompletionClient,
    transient::HttpFetcher,
};
use ctfbot_discord::router::AppState;
use ctfbot_openai::OpenRouterClient;

#[tokio::main]
async fn main() -> Result<(), ctfbot_core::Error> {
    ctfbot_core::logging::init("ctfbot")?;

    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        work_dir = %cfg.work_dir.display(),
        ai = cfg.openrouter_api_key.is_some(),
        "configuration loaded"
    );

    let completion: Option<Arc<dyn CompletionClient>> = match OpenRouterClient::from_config(&cfg)? {
        Some(client) => Some(Arc::new(client)),
        None => {
            tracing::warn!("no openrouter_api_key configured; ask and filetype are unavailable");
            None
        }
    };

    let fetcher = Arc::new(HttpFetcher::new(cfg.download_timeout)?);
    let pipeline = Arc::new(CommandPipeline::from_config(
        &cfg,
        fetcher,
        completion.clone(),
    ));
    let ask = Arc::new(AskService::from_config(&cfg, completion));

    let cancel = CancellationToken::new();
    let state = Arc::new(AppState::new(cfg, pipeline, ask, cancel.clone()));

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("ctrl-c received");
        cancel.cancel();
    });

    ctfbot_discord::router::run(state)
        .await
        .map_err(|e| ctfbot_core::Error::External(format!("discord bot failed: {e}")))?;

    tracing::info!("stopped");
    Ok(())
}
