//! Shapes raw tool output into an inline reply or a file attachment.

use std::path::PathBuf;

use crate::{transient::TransientScope, Result};

/// Longest text sent inline. Leaves room for the code fence under the
/// host's 2000-character message ceiling.
pub const INLINE_LIMIT: usize = 1990;

pub const TOO_LONG_CAPTION: &str = "Output too long, sending as file...";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinePolicy {
    /// Keep at most this many lines.
    Cap(usize),
    /// Trim surrounding whitespace, then keep at most this many lines.
    TrimmedCap(usize),
    Verbatim,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rendering {
    InlineText(String),
    FileAttachment {
        path: PathBuf,
        file_name: String,
        caption: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Inline,
    File { caption: Option<&'static str> },
}

/// Inline unless forced or over the size limit. The caption only explains the size case.
pub fn decide(text: &str, force_file: bool) -> Decision {
    let too_long = text.chars().count() > INLINE_LIMIT;
    if too_long {
        Decision::File {
            caption: Some(TOO_LONG_CAPTION),
        }
    } else if force_file {
        Decision::File { caption: None }
    } else {
        Decision::Inline
    }
}

pub fn shape(raw: &[u8], policy: LinePolicy) -> String {
    let text = String::from_utf8_lossy(raw);
    match policy {
        LinePolicy::Cap(limit) => take_lines(&text, limit),
        LinePolicy::TrimmedCap(limit) => take_lines(text.trim(), limit),
        LinePolicy::Verbatim => text.into_owned(),
    }
}

fn take_lines(text: &str, limit: usize) -> String {
    text.split('\n').take(limit).collect::<Vec<_>>().join("\n")
}

pub fn code_block(text: &str) -> String {
    format!("```\n{text}\n```")
}

/// Shape `raw` and render it. A file rendering is written into the
/// invocation's scope as `<attachment>.<file_suffix>`.
pub async fn format(
    raw: &[u8],
    policy: LinePolicy,
    force_file: bool,
    scope: &mut TransientScope,
    file_suffix: &str,
) -> Result<Rendering> {
    let text = shape(raw, policy);
    match decide(&text, force_file) {
        Decision::Inline => Ok(Rendering::InlineText(code_block(&text))),
        Decision::File { caption } => {
            let path = scope.write_derived(file_suffix, text.as_bytes()).await?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file_suffix.to_string());
            Ok(Rendering::FileAttachment {
                path,
                file_name,
                caption: caption.map(str::to_string),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::InvocationId, transient::TransientStore};

    #[test]
    fn cap_keeps_at_most_limit_lines() {
        let raw = b"one\ntwo\nthree\nfour\nfive\n";
        assert_eq!(shape(raw, LinePolicy::Cap(3)), "one\ntwo\nthree");
        assert_eq!(shape(raw, LinePolicy::Cap(50)), "one\ntwo\nthree\nfour\nfive\n");
        assert_eq!(shape(b"", LinePolicy::Cap(4)), "");
    }

    #[test]
    fn trimmed_cap_drops_surrounding_blank_lines_first() {
        let raw = b"\n\n  FLOSS STATIC STRINGS\nabc\ndef\n\n";
        assert_eq!(
            shape(raw, LinePolicy::TrimmedCap(2)),
            "FLOSS STATIC STRINGS\nabc"
        );
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let raw = [b'o', b'k', 0xff, b'\n'];
        assert_eq!(shape(&raw, LinePolicy::Verbatim), "ok\u{fffd}\n");
    }

    #[test]
    fn decision_depends_only_on_length_and_flag() {
        let at_limit = "a".repeat(INLINE_LIMIT);
        let over = "a".repeat(INLINE_LIMIT + 1);

        assert_eq!(decide(&at_limit, false), Decision::Inline);
        assert_eq!(decide(&at_limit, true), Decision::File { caption: None });
        assert_eq!(
            decide(&over, false),
            Decision::File {
                caption: Some(TOO_LONG_CAPTION)
            }
        );
        assert_eq!(
            decide(&over, true),
            Decision::File {
                caption: Some(TOO_LONG_CAPTION)
            }
        );
    }

    #[test]
    fn length_is_counted_in_characters() {
        // 1000 two-byte characters are 2000 bytes but well within the limit.
        let text = "é".repeat(1000);
        assert_eq!(decide(&text, false), Decision::Inline);
    }

    #[tokio::test]
    async fn inline_rendering_is_a_code_block_and_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let store = TransientStore::new(root.path());
        let mut scope = store.scope(&InvocationId::new());

        let r = format(b"a\nb\nc", LinePolicy::Cap(2), false, &mut scope, "strings.txt")
            .await
            .unwrap();
        assert_eq!(r, Rendering::InlineText("```\na\nb\n```".to_string()));
        assert!(scope.created().is_empty());
    }

    #[tokio::test]
    async fn oversized_output_becomes_a_file() {
        let root = tempfile::tempdir().unwrap();
        let store = TransientStore::new(root.path());
        let mut scope = store.scope(&InvocationId::new());
        let raw = "x".repeat(INLINE_LIMIT + 10);

        let r = format(raw.as_bytes(), LinePolicy::Verbatim, false, &mut scope, "floss.txt")
            .await
            .unwrap();
        match r {
            Rendering::FileAttachment {
                path,
                file_name,
                caption,
            } => {
                assert_eq!(file_name, "output.floss.txt");
                assert_eq!(caption.as_deref(), Some(TOO_LONG_CAPTION));
                assert_eq!(std::fs::read_to_string(&path).unwrap(), raw);
            }
            other => panic!("expected file rendering, got {other:?}"),
        }
    }
}
