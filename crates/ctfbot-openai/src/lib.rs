//! OpenRouter adapter (chat completions).
//!
//! OpenRouter speaks the OpenAI `chat/completions` dialect; the attribution
//! headers (`HTTP-Referer`, `X-Title`) identify the bot on its dashboard.

use std::time::Duration;

use async_trait::async_trait;
use ctfbot_core::{
    config::Config,
    errors::Error,
    ports::{CompletionClient, CompletionRequest},
    Result,
};
use serde::{Deserialize, Serialize};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    referer: String,
    title: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenRouterClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("openrouter client build failed: {e}")))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(cfg: &Config) -> Result<Option<Self>> {
        let Some(key) = cfg.openrouter_api_key.as_deref() else {
            return Ok(None);
        };
        Self::new(
            key,
            cfg.openrouter_base_url.as_str(),
            cfg.http_referer.as_str(),
            cfg.app_title.as_str(),
        )
        .map(Some)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionClient for OpenRouterClient {
    async fn complete(&self, req: CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &req.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &req.system,
                },
                ChatMessage {
                    role: "user",
                    content: &req.user,
                },
            ],
        };

        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    Error::Unavailable(format!("openrouter: {e}"))
                } else {
                    Error::External(format!("openrouter request error: {e}"))
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::External(format!("openrouter read error: {e}")))?;

        if !status.is_success() {
            return Err(Error::External(format!(
                "openrouter completion failed: {status} {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        tracing::debug!(model = %req.model, bytes = text.len(), "completion received");
        parse_completion(&text)
    }
}

/// Pull the first choice's text out of a `chat/completions` response body.
pub fn parse_completion(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Error::External(format!("openrouter json error: {e}")))?;

    let Some(first) = parsed.choices.into_iter().next() else {
        return Err(Error::EmptyResponse(
            "No response received from AI".to_string(),
        ));
    };

    match first.message.and_then(|m| m.content) {
        Some(content) if !content.trim().is_empty() => Ok(content),
        _ => Err(Error::EmptyResponse(
            "Empty response received from AI".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_choice_content_is_returned() {
        let body = r#"{
            "id": "gen-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "ELF 64-bit executable"}},
                {"index": 1, "message": {"role": "assistant", "content": "ignored"}}
            ]
        }"#;
        assert_eq!(parse_completion(body).unwrap(), "ELF 64-bit executable");
    }

    #[test]
    fn missing_choices_are_an_empty_response() {
        let err = parse_completion(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, Error::EmptyResponse(ref m) if m == "No response received from AI"));

        let err = parse_completion(r#"{"error": {"message": "rate limited"}}"#).unwrap_err();
        assert!(matches!(err, Error::EmptyResponse(_)));
    }

    #[test]
    fn null_or_blank_content_is_an_empty_response() {
        for body in [
            r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#,
            r#"{"choices": [{"message": {"role": "assistant", "content": "  "}}]}"#,
            r#"{"choices": [{}]}"#,
        ] {
            let err = parse_completion(body).unwrap_err();
            assert!(
                matches!(err, Error::EmptyResponse(ref m) if m == "Empty response received from AI"),
                "{body}"
            );
        }
    }

    #[test]
    fn malformed_body_is_external() {
        assert!(matches!(
            parse_completion("<html>bad gateway</html>").unwrap_err(),
            Error::External(_)
        ));
    }

    #[test]
    fn endpoint_ignores_trailing_slash() {
        let client = OpenRouterClient::new("k", "https://openrouter.ai/api/v1/", "r", "t").unwrap();
        assert_eq!(client.endpoint(), "https://openrouter.ai/api/v1/chat/completions");
    }

    #[test]
    fn request_serializes_as_chat_messages() {
        let body = ChatRequest {
            model: "m",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]})
        );
    }
}
