use std::fmt;

/// Inclusive bounds for the `limit` parameter of `strings` and `floss`.
pub const MIN_LIMIT: i64 = 1;
pub const MAX_LIMIT: i64 = 50;
pub const DEFAULT_LIMIT: i64 = 4;

/// Correlation id of one command occurrence.
///
/// Also names the invocation's private working directory, so two invocations
/// never share a transient path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InvocationId(pub String);

impl InvocationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A user-supplied file, referenced by name and a download location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
    pub size: Option<u64>,
}

/// The four file-based commands and their parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentCommand {
    Strings { limit: i64, as_file: bool },
    Floss { limit: i64, as_file: bool },
    FileType,
    Exif,
}

impl AttachmentCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AttachmentCommand::Strings { .. } => "strings",
            AttachmentCommand::Floss { .. } => "floss",
            AttachmentCommand::FileType => "filetype",
            AttachmentCommand::Exif => "exif",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvocationState {
    Pending,
    /// Parameters were refused before any resource was touched.
    Rejected,
    Succeeded,
    Failed,
}

/// One user-issued attachment command.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub id: InvocationId,
    pub command: AttachmentCommand,
    pub attachment: Option<Attachment>,
    pub state: InvocationState,
}

impl Invocation {
    pub fn new(command: AttachmentCommand, attachment: Option<Attachment>) -> Self {
        Self {
            id: InvocationId::new(),
            command,
            attachment,
            state: InvocationState::Pending,
        }
    }
}

/// A model the `ask` command may be pointed at.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ModelChoice {
    /// Display name (embed title, thumbnail file name).
    pub name: String,
    /// Provider model identifier.
    pub id: String,
}
