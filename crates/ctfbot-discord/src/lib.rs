//! Discord adapter (serenity).
//!
//! This crate implements the `ctfbot-core` reply and presence ports over the
//! Discord gateway and interaction webhooks.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serenity::{
    all::{ActivityData, CommandInteraction, ShardMessenger},
    builder::{
        CreateAttachment, CreateEmbed, CreateEmbedFooter, CreateInteractionResponse,
        CreateInteractionResponseFollowup, CreateInteractionResponseMessage,
    },
    cache::Cache,
    http::Http,
    model::Colour,
};

pub mod handlers;
pub mod router;

use ctfbot_core::{
    errors::Error,
    ports::{EmbedReply, PresencePort, Reply, Responder},
    presence::{ActivityKind, Presence},
    Result,
};

pub const EMBED_COLOUR: Colour = Colour::BLUE;
pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Upload name of a local embed thumbnail.
const THUMBNAIL_NAME: &str = "model.png";

// Discord hard limits.
const MESSAGE_MAX_CHARS: usize = 2000;
const EMBED_TITLE_MAX_CHARS: usize = 256;
const EMBED_DESCRIPTION_MAX_CHARS: usize = 4096;
const EMBED_FIELD_VALUE_MAX_CHARS: usize = 1024;
const EMBED_FOOTER_MAX_CHARS: usize = 2048;
const EMBED_TOTAL_MAX_CHARS: usize = 6000;

fn map_err(e: serenity::Error) -> Error {
    Error::External(format!("discord error: {e}"))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn chars(text: &str) -> usize {
    text.chars().count()
}

/// Build the serenity embed for a core reply. Local thumbnails are attached
/// separately by the caller.
///
/// Each part is cut to its own limit. If the embed is still over the total
/// limit, the footer shrinks first, then the description.
pub fn build_embed(reply: &EmbedReply) -> CreateEmbed {
    let title = truncate(&reply.title, EMBED_TITLE_MAX_CHARS);
    let mut description = reply
        .description
        .as_deref()
        .map(|d| truncate(d, EMBED_DESCRIPTION_MAX_CHARS));
    let fields: Vec<(String, String, bool)> = reply
        .fields
        .iter()
        .map(|f| {
            (
                f.name.clone(),
                truncate(&f.value, EMBED_FIELD_VALUE_MAX_CHARS),
                f.inline,
            )
        })
        .collect();
    let mut footer = reply
        .footer
        .as_deref()
        .map(|f| truncate(f, EMBED_FOOTER_MAX_CHARS));

    let fixed = chars(&title)
        + fields
            .iter()
            .map(|(n, v, _)| chars(n) + chars(v))
            .sum::<usize>();
    let total = fixed
        + description.as_deref().map_or(0, chars)
        + footer.as_deref().map_or(0, chars);
    let mut excess = total.saturating_sub(EMBED_TOTAL_MAX_CHARS);

    for part in [&mut footer, &mut description] {
        if excess == 0 {
            break;
        }
        if let Some(text) = part.as_mut() {
            let len = chars(text);
            let keep = len.saturating_sub(excess);
            excess -= len - keep;
            *text = if keep < 3 {
                String::new()
            } else {
                truncate(text, keep)
            };
        }
    }

    let mut embed = CreateEmbed::new().title(title).colour(EMBED_COLOUR);
    if let Some(d) = description.filter(|d| !d.is_empty()) {
        embed = embed.description(d);
    }
    for (name, value, inline) in fields {
        embed = embed.field(name, value, inline);
    }
    if let Some(f) = footer.filter(|f| !f.is_empty()) {
        embed = embed.footer(CreateEmbedFooter::new(f));
    }
    if let Some(url) = &reply.image_url {
        embed = embed.image(url.clone());
    }
    if let Some(url) = &reply.thumbnail_url {
        embed = embed.thumbnail(url.clone());
    }
    embed
}

/// Reply channel of one slash-command interaction.
pub struct DiscordResponder {
    http: Arc<Http>,
    interaction: CommandInteraction,
    ephemeral_errors: bool,
}

impl DiscordResponder {
    pub fn new(http: Arc<Http>, interaction: CommandInteraction) -> Self {
        Self {
            http,
            interaction,
            ephemeral_errors: false,
        }
    }

    /// Only the invoking user sees error reports.
    pub fn with_ephemeral_errors(mut self) -> Self {
        self.ephemeral_errors = true;
        self
    }

    async fn followup(&self, builder: CreateInteractionResponseFollowup) -> Result<()> {
        self.interaction
            .create_followup(&self.http, builder)
            .await
            .map(|_| ())
            .map_err(map_err)
    }

    async fn embed_followup(&self, reply: EmbedReply) -> Result<()> {
        let mut embed = build_embed(&reply);
        let mut builder = CreateInteractionResponseFollowup::new();

        if let Some(path) = &reply.thumbnail_file {
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    builder = builder.add_file(CreateAttachment::bytes(bytes, THUMBNAIL_NAME));
                    embed = embed.thumbnail(format!("attachment://{THUMBNAIL_NAME}"));
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to load thumbnail");
                }
            }
        }

        self.followup(builder.embed(embed)).await
    }
}

#[async_trait]
impl Responder for DiscordResponder {
    async fn reject(&self, message: &str) -> Result<()> {
        self.interaction
            .create_response(
                &self.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content(truncate(message, MESSAGE_MAX_CHARS))
                        .ephemeral(true),
                ),
            )
            .await
            .map_err(map_err)
    }

    async fn defer(&self) -> Result<()> {
        self.interaction
            .create_response(
                &self.http,
                CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
            )
            .await
            .map_err(map_err)
    }

    async fn send(&self, reply: Reply) -> Result<()> {
        match reply {
            Reply::Text(text) => {
                self.followup(
                    CreateInteractionResponseFollowup::new()
                        .content(truncate(&text, MESSAGE_MAX_CHARS)),
                )
                .await
            }
            Reply::File {
                path,
                file_name,
                caption,
            } => {
                // Read now: the file is released right after this call.
                let bytes = tokio::fs::read(&path).await?;
                let mut builder = CreateInteractionResponseFollowup::new()
                    .add_file(CreateAttachment::bytes(bytes, file_name));
                if let Some(c) = caption {
                    builder = builder.content(c);
                }
                self.followup(builder).await
            }
            Reply::Embed(embed) => self.embed_followup(embed).await,
        }
    }

    async fn send_error(&self, message: &str) -> Result<()> {
        self.followup(
            CreateInteractionResponseFollowup::new()
                .content(truncate(message, MESSAGE_MAX_CHARS))
                .ephemeral(self.ephemeral_errors),
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct ApplicationCounts {
    approximate_user_install_count: Option<u64>,
}

/// Presence updates and live counters over one gateway shard.
pub struct DiscordPresence {
    shard: ShardMessenger,
    cache: Arc<Cache>,
    http: reqwest::Client,
    authorization: String,
    api_base: String,
}

impl DiscordPresence {
    pub fn new(shard: ShardMessenger, cache: Arc<Cache>, token: &str) -> Self {
        let token = token.trim();
        let authorization = if token.starts_with("Bot ") {
            token.to_string()
        } else {
            format!("Bot {token}")
        };
        Self {
            shard,
            cache,
            http: reqwest::Client::new(),
            authorization,
            api_base: DISCORD_API_BASE.to_string(),
        }
    }
}

#[async_trait]
impl PresencePort for DiscordPresence {
    fn guild_count(&self) -> usize {
        self.cache.guild_count()
    }

    async fn approximate_user_count(&self) -> Result<u64> {
        let resp = self
            .http
            .get(format!("{}/applications/@me", self.api_base))
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|e| Error::External(format!("application info request error: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "application info failed: {}",
                resp.status()
            )));
        }

        let counts: ApplicationCounts = resp
            .json()
            .await
            .map_err(|e| Error::External(format!("application info json error: {e}")))?;
        counts
            .approximate_user_install_count
            .ok_or_else(|| Error::External("application info has no user install count".to_string()))
    }

    async fn set_presence(&self, presence: Presence) -> Result<()> {
        self.shard.set_activity(Some(activity_for(&presence)?));
        Ok(())
    }
}

pub fn activity_for(presence: &Presence) -> Result<ActivityData> {
    Ok(match presence {
        Presence::Activity { kind, name } => match kind {
            ActivityKind::Playing => ActivityData::playing(name.clone()),
            ActivityKind::Watching => ActivityData::watching(name.clone()),
            ActivityKind::Listening => ActivityData::listening(name.clone()),
            ActivityKind::Competing => ActivityData::competing(name.clone()),
        },
        Presence::Custom { state } => ActivityData::custom(state.clone()),
        Presence::Streaming { name, url } => ActivityData::streaming(name.clone(), url.as_str())
            .map_err(|e| Error::External(format!("invalid streaming url {url}: {e}")))?,
    })
}
