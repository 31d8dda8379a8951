use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Core error type.
///
/// Every failure of an invocation ends up as one of these and is turned into a
/// single user-visible line at the pipeline boundary. Adapter crates map their
/// library errors into `External` or the closest specific variant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("{tool} failed ({status}){}", stderr_suffix(.stderr))]
    ToolExecution {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} did not finish within {}s", .after.as_secs())]
    ToolTimeout { tool: String, after: Duration },

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    EmptyResponse(String),

    /// Only the file name is displayed; `path` is kept for logs.
    #[error("could not write output file {}: {reason}", file_name(.path))]
    Formatting { path: PathBuf, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Short machine-friendly label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Download(_) => "download",
            Error::ToolExecution { .. } => "tool_execution",
            Error::ToolTimeout { .. } => "tool_timeout",
            Error::Unavailable(_) => "unavailable",
            Error::EmptyResponse(_) => "empty_response",
            Error::Formatting { .. } => "formatting",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::External(_) => "external",
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_execution_message_includes_stderr_only_when_present() {
        let with = Error::ToolExecution {
            tool: "exiftool".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "Error: File not found\n".to_string(),
        };
        assert_eq!(
            with.to_string(),
            "exiftool failed (exit status: 1): Error: File not found"
        );

        let without = Error::ToolExecution {
            tool: "strings".to_string(),
            status: "exit status: 2".to_string(),
            stderr: String::new(),
        };
        assert_eq!(without.to_string(), "strings failed (exit status: 2)");
    }

    #[test]
    fn formatting_message_names_the_file_not_the_directory() {
        let e = Error::Formatting {
            path: PathBuf::from("/tmp/ctfbot/0b6d/chall.strings.txt"),
            reason: "permission denied".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "could not write output file chall.strings.txt: permission denied"
        );
    }
}
