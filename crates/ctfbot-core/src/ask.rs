//! The `ask` command: one question, one completion, one embed.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{
    config::{self, Config},
    domain::{InvocationState, ModelChoice},
    errors::Error,
    pipeline::one_line,
    ports::{CompletionClient, CompletionRequest, EmbedReply, Reply, Responder},
    tools, Result,
};

pub const ASK_SYSTEM_PROMPT: &str = "You are an assistant that helps answer cybersecurity and CTF related questions. You will generate code when asked. The questions and any generated code are for educational purposes and will only be used or executed in environments where the user has explicit permission to run the code or exploit the target. If your response contains code, put it in ```codeblocks``` with the language named on the first line of the codeblock. Never mention @everyone in the response. Do not exceed 4095 characters in your response. This is a hard limit.";

pub struct AskService {
    completion: Option<Arc<dyn CompletionClient>>,
    models: Vec<ModelChoice>,
    assets_dir: PathBuf,
    timeout: Option<Duration>,
}

impl AskService {
    pub fn new(
        completion: Option<Arc<dyn CompletionClient>>,
        models: Vec<ModelChoice>,
        assets_dir: impl Into<PathBuf>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            completion,
            models,
            assets_dir: assets_dir.into(),
            timeout,
        }
    }

    pub fn from_config(cfg: &Config, completion: Option<Arc<dyn CompletionClient>>) -> Self {
        Self::new(
            completion,
            cfg.ask_models.clone(),
            cfg.assets_dir.clone(),
            cfg.ai_timeout,
        )
    }

    /// Choices offered to the user, in display order.
    pub fn models(&self) -> &[ModelChoice] {
        &self.models
    }

    pub fn model(&self, id: &str) -> Option<&ModelChoice> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Ask `question` and build the answer embed.
    pub async fn answer(&self, model: &ModelChoice, question: &str) -> Result<EmbedReply> {
        let client = self
            .completion
            .clone()
            .ok_or_else(|| Error::Unavailable("AI completion is not configured".to_string()))?;

        let text = tools::complete_on_worker(
            client,
            CompletionRequest {
                model: model.id.clone(),
                system: ASK_SYSTEM_PROMPT.to_string(),
                user: question.to_string(),
            },
            self.timeout,
        )
        .await?;

        let mut embed = EmbedReply::new(model.name.clone());
        embed.description = Some(text);
        embed.footer = Some(format!("Question: {question}"));
        embed.thumbnail_file = existing_logo(&self.assets_dir, model).await;
        Ok(embed)
    }

    fn validate(&self, model_id: &str, question: &str) -> Result<&ModelChoice> {
        let model = self
            .model(model_id)
            .ok_or_else(|| Error::Validation(format!("Unknown model: {model_id}")))?;
        if question.trim().is_empty() {
            return Err(Error::Validation("Question must not be empty".to_string()));
        }
        Ok(model)
    }

    /// Handle one `ask` interaction end to end.
    pub async fn run(
        &self,
        model_id: &str,
        question: &str,
        responder: &dyn Responder,
    ) -> InvocationState {
        let model = match self.validate(model_id, question) {
            Ok(m) => m,
            Err(e) => {
                if let Err(send_err) = responder.reject(&e.to_string()).await {
                    tracing::warn!(error = %send_err, "failed to send rejection");
                }
                return InvocationState::Rejected;
            }
        };

        if let Err(e) = responder.defer().await {
            tracing::warn!(error = %e, "failed to acknowledge ask");
            return InvocationState::Failed;
        }

        let outcome = match self.answer(model, question).await {
            Ok(embed) => responder.send(Reply::Embed(embed)).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(model = %model.id, "ask answered");
                InvocationState::Succeeded
            }
            Err(e) => {
                tracing::warn!(model = %model.id, kind = e.kind(), error = %e, "ask failed");
                if let Err(send_err) = responder.send_error(&one_line(&e.to_string())).await {
                    tracing::warn!(error = %send_err, "failed to report error");
                }
                InvocationState::Failed
            }
        }
    }
}

async fn existing_logo(assets_dir: &Path, model: &ModelChoice) -> Option<PathBuf> {
    let path = config::model_logo_path(assets_dir, model);
    match tokio::fs::try_exists(&path).await {
        Ok(true) => Some(path),
        Ok(false) => {
            tracing::debug!(path = %path.display(), "no thumbnail for model");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to load thumbnail");
            None
        }
    }
}
