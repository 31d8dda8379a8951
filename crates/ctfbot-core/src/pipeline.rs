//! The attachment command pipeline.
//!
//! Every file-based command runs the same sequence:
//! `Validating → Downloading → Invoking → Formatting → Replying → Released`,
//! with `Failed` reachable from any step. A rejected invocation never touches
//! the disk; every other invocation releases its transient files exactly once,
//! whatever happened before.

use std::{path::Path, sync::Arc, time::Duration};

use tokio::io::AsyncReadExt;
use tracing::Instrument;

use crate::{
    config::Config,
    domain::{Attachment, AttachmentCommand, Invocation, InvocationState, MAX_LIMIT, MIN_LIMIT},
    errors::Error,
    exif::{self, GPS_FIELD},
    formatting::{self, LinePolicy},
    ports::{AttachmentFetcher, CompletionClient, CompletionRequest, EmbedReply, Reply, Responder},
    tools::{self, StderrMode, ToolInvoker, ToolSpec},
    transient::{TransientScope, TransientStore},
    Result,
};

pub const MAGIC_BYTES_LEN: usize = 20;

/// Longest error line sent back to the user.
const ERROR_LINE_MAX_CHARS: usize = 1900;

pub const FILETYPE_SYSTEM_PROMPT: &str = "You are an assistant that analyzes magic bytes to determine the file type. You will analyze ALL of the provided bytes and not assume the file type from the first few bytes. If you are unsure, explain your reasoning, by analyzing the bytes. If the filetype is known, after analyzing all bytes, return only the filetype.";

const FILETYPE_USER_PROMPT: &str = "What is the filetype of the following magic bytes? Return only the filetype name with no additional text unless the filetype is unknown:";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Downloading,
    Invoking,
    Formatting,
    Replying,
    Released,
    Failed,
}

/// Analyzer binaries used by the pipeline.
#[derive(Clone, Debug)]
pub struct Analyzers {
    pub strings: ToolSpec,
    pub floss: ToolSpec,
    pub exiftool: ToolSpec,
}

pub struct CommandPipeline {
    store: TransientStore,
    fetcher: Arc<dyn AttachmentFetcher>,
    invoker: ToolInvoker,
    analyzers: Analyzers,
    completion: Option<Arc<dyn CompletionClient>>,
    filetype_model: String,
    ai_timeout: Option<Duration>,
}

impl CommandPipeline {
    pub fn new(
        store: TransientStore,
        fetcher: Arc<dyn AttachmentFetcher>,
        invoker: ToolInvoker,
        analyzers: Analyzers,
    ) -> Self {
        Self {
            store,
            fetcher,
            invoker,
            analyzers,
            completion: None,
            filetype_model: crate::config::DEFAULT_FILETYPE_MODEL.to_string(),
            ai_timeout: None,
        }
    }

    pub fn from_config(
        cfg: &Config,
        fetcher: Arc<dyn AttachmentFetcher>,
        completion: Option<Arc<dyn CompletionClient>>,
    ) -> Self {
        let mut pipeline = Self::new(
            TransientStore::new(cfg.work_dir.clone()),
            fetcher,
            ToolInvoker::new(cfg.tool_timeout),
            Analyzers {
                strings: cfg.strings.clone(),
                floss: cfg.floss.clone(),
                exiftool: cfg.exiftool.clone(),
            },
        );
        pipeline.filetype_model = cfg.filetype_model.clone();
        pipeline.ai_timeout = cfg.ai_timeout;
        pipeline.completion = completion;
        pipeline
    }

    /// Run one invocation to completion and return it in its final state.
    ///
    /// Never fails: every error is reported through `responder`.
    pub async fn run(&self, invocation: Invocation, responder: &dyn Responder) -> Invocation {
        let span = tracing::info_span!(
            "invocation",
            id = %invocation.id,
            command = invocation.command.name(),
            size = invocation.attachment.as_ref().and_then(|a| a.size),
            tool_ms = tracing::field::Empty,
        );
        self.run_inner(invocation, responder).instrument(span).await
    }

    async fn run_inner(&self, mut inv: Invocation, responder: &dyn Responder) -> Invocation {
        enter(Stage::Validating);
        let attachment = match validate(&inv) {
            Ok(a) => a.clone(),
            Err(e) => {
                tracing::info!(reason = %e, "invocation rejected");
                if let Err(send_err) = responder.reject(&e.to_string()).await {
                    tracing::warn!(error = %send_err, "failed to send rejection");
                }
                inv.state = InvocationState::Rejected;
                return inv;
            }
        };

        if let Err(e) = responder.defer().await {
            tracing::warn!(error = %e, "failed to acknowledge command");
            inv.state = InvocationState::Failed;
            return inv;
        }

        let mut scope = self.store.scope(&inv.id);
        let outcome = match self.produce(&inv, &attachment, &mut scope).await {
            Ok(reply) => {
                enter(Stage::Replying);
                responder.send(reply).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => inv.state = InvocationState::Succeeded,
            Err(e) => {
                enter(Stage::Failed);
                // Debug form keeps server paths, which the user line leaves out.
                tracing::warn!(kind = e.kind(), error = %e, detail = ?e, "invocation failed");
                if let Err(send_err) = responder.send_error(&error_line(&e)).await {
                    tracing::warn!(error = %send_err, "failed to report error");
                }
                inv.state = InvocationState::Failed;
            }
        }

        scope.release_all();
        enter(Stage::Released);
        inv
    }

    async fn produce(
        &self,
        inv: &Invocation,
        attachment: &Attachment,
        scope: &mut TransientScope,
    ) -> Result<Reply> {
        enter(Stage::Downloading);
        let path = scope.materialize(attachment, self.fetcher.as_ref()).await?;

        match inv.command {
            AttachmentCommand::Strings { limit, as_file } => {
                let tool = &self.analyzers.strings;
                let policy = LinePolicy::Cap(limit as usize);
                self.line_tool(tool, &path, limit, as_file, policy, scope, "strings.txt")
                    .await
            }
            AttachmentCommand::Floss { limit, as_file } => {
                // floss prints banner padding around its sections.
                let tool = &self.analyzers.floss;
                let policy = LinePolicy::TrimmedCap(limit as usize);
                self.line_tool(tool, &path, limit, as_file, policy, scope, "floss.txt")
                    .await
            }
            AttachmentCommand::FileType => self.filetype(&path, attachment).await,
            AttachmentCommand::Exif => self.exif(&path, attachment).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn line_tool(
        &self,
        tool: &ToolSpec,
        path: &Path,
        limit: i64,
        as_file: bool,
        policy: LinePolicy,
        scope: &mut TransientScope,
        suffix: &str,
    ) -> Result<Reply> {
        enter(Stage::Invoking);
        let args = ["-n".to_string(), limit.to_string()];
        let out = self
            .invoker
            .run(tool, &args, path, StderrMode::Discard)
            .await?;
        record_elapsed(out.elapsed);

        enter(Stage::Formatting);
        let rendering = formatting::format(&out.stdout, policy, as_file, scope, suffix).await?;
        Ok(rendering.into())
    }

    async fn filetype(&self, path: &Path, attachment: &Attachment) -> Result<Reply> {
        enter(Stage::Invoking);
        let client = self
            .completion
            .clone()
            .ok_or_else(|| Error::Unavailable("AI completion is not configured".to_string()))?;

        let magic = read_magic_bytes(path).await?;
        let hex = hex_upper(&magic);

        let answer = tools::complete_on_worker(
            client,
            CompletionRequest {
                model: self.filetype_model.clone(),
                system: FILETYPE_SYSTEM_PROMPT.to_string(),
                user: format!("{FILETYPE_USER_PROMPT} {hex}"),
            },
            self.ai_timeout,
        )
        .await?;

        enter(Stage::Formatting);
        let mut embed = EmbedReply::new("File Type Analysis").field(
            "Magic Bytes",
            format!("```{hex}```"),
            false,
        );
        embed.description = Some(answer);
        embed.footer = Some(format!("File: {}", attachment.filename));
        Ok(Reply::Embed(embed))
    }

    async fn exif(&self, path: &Path, attachment: &Attachment) -> Result<Reply> {
        enter(Stage::Invoking);
        let out = self
            .invoker
            .run(&self.analyzers.exiftool, &[], path, StderrMode::Capture)
            .await?;
        record_elapsed(out.elapsed);

        enter(Stage::Formatting);
        let report = exif::parse_exiftool_output(&out.stdout_lossy());
        if report.is_empty() {
            return Ok(Reply::Text("No EXIF data found in the image".to_string()));
        }

        let mut embed = EmbedReply::new("EXIF Data");
        embed.description = Some("Important metadata extracted from the image".to_string());
        for (name, value) in report.fields.iter().filter(|(name, _)| name != GPS_FIELD) {
            embed = embed.field(name.clone(), format!("```{value}```"), true);
        }

        if let (Some(coords), Some(raw)) = (report.gps, report.get(GPS_FIELD)) {
            embed = embed.field(
                GPS_FIELD,
                format!(
                    "```{raw}```\n[View on OpenStreetMap]({})",
                    coords.openstreetmap_url()
                ),
                false,
            );
            embed.image_url = Some(coords.static_map_url());
        }

        embed.footer = Some(format!("File: {}", attachment.filename));
        embed.thumbnail_url = Some(attachment.url.clone());
        Ok(Reply::Embed(embed))
    }
}

/// Parameter checks. Runs before anything is downloaded or spawned.
pub fn validate(inv: &Invocation) -> Result<&Attachment> {
    let attachment = inv
        .attachment
        .as_ref()
        .ok_or_else(|| Error::Validation("No file attached".to_string()))?;

    match inv.command {
        AttachmentCommand::Strings { limit, .. } | AttachmentCommand::Floss { limit, .. }
            if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) =>
        {
            Err(Error::Validation(format!(
                "Limit must be between {MIN_LIMIT} and {MAX_LIMIT}"
            )))
        }
        _ => Ok(attachment),
    }
}

fn enter(stage: Stage) {
    tracing::debug!(?stage, "stage");
}

fn record_elapsed(elapsed: Duration) {
    tracing::Span::current().record("tool_ms", elapsed.as_millis() as u64);
}

async fn read_magic_bytes(path: &Path) -> Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut buf = Vec::with_capacity(MAGIC_BYTES_LEN);
    file.take(MAGIC_BYTES_LEN as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}

pub fn hex_upper(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `An error occurred: ...` on one line, short enough for a single message.
pub fn error_line(e: &Error) -> String {
    one_line(&format!("An error occurred: {e}"))
}

/// Join non-blank lines with spaces and bound the length.
pub fn one_line(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if line.chars().count() <= ERROR_LINE_MAX_CHARS {
        return line;
    }
    let mut out: String = line.chars().take(ERROR_LINE_MAX_CHARS - 3).collect();
    out.push_str("...");
    out
}
