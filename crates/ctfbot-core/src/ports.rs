use std::path::PathBuf;

use async_trait::async_trait;

use crate::{domain::Attachment, formatting::Rendering, presence::Presence, Result};

/// Source of attachment bytes (the host platform's CDN in production).
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch(&self, attachment: &Attachment) -> Result<Vec<u8>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
}

/// Hosted chat-completion API.
///
/// Implementations must fail with `Error::EmptyResponse` rather than return
/// an empty string.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<String>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Platform-neutral rich reply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmbedReply {
    pub title: String,
    pub description: Option<String>,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Local image uploaded alongside the embed and used as its thumbnail.
    pub thumbnail_file: Option<PathBuf>,
}

impl EmbedReply {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }
}

/// What an invocation answers with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    /// A file on local storage. It only exists until the invocation is released,
    /// so responders must read it before `send` returns.
    File {
        path: PathBuf,
        file_name: String,
        caption: Option<String>,
    },
    Embed(EmbedReply),
}

impl From<Rendering> for Reply {
    fn from(r: Rendering) -> Self {
        match r {
            Rendering::InlineText(text) => Reply::Text(text),
            Rendering::FileAttachment {
                path,
                file_name,
                caption,
            } => Reply::File {
                path,
                file_name,
                caption,
            },
        }
    }
}

/// Reply channel of a single command interaction.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Immediate, user-only refusal. Used instead of `defer`.
    async fn reject(&self, message: &str) -> Result<()>;

    /// Acknowledge the command; the answer follows later via `send`.
    async fn defer(&self) -> Result<()>;

    async fn send(&self, reply: Reply) -> Result<()>;

    /// Single-line failure report after `defer`.
    async fn send_error(&self, message: &str) -> Result<()>;
}

/// What the presence rotator needs from the host connection.
#[async_trait]
pub trait PresencePort: Send + Sync {
    fn guild_count(&self) -> usize;

    async fn approximate_user_count(&self) -> Result<u64>;

    async fn set_presence(&self, presence: Presence) -> Result<()>;
}
