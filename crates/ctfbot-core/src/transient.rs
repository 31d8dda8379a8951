//! On-disk lifetime of the files an invocation creates.
//!
//! Each invocation gets its own directory under the store root, named after the
//! invocation id, so concurrent invocations with identical attachment names
//! never touch the same path. Everything created through a [`TransientScope`]
//! is removed by [`TransientScope::release_all`], which also runs on drop: an
//! early return, an error, a panic or a cancelled future all clean up.

use std::{
    io::ErrorKind,
    path::PathBuf,
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{Attachment, InvocationId},
    errors::Error,
    ports::AttachmentFetcher,
    Result,
};

/// Longest single path component most filesystems accept.
pub const MAX_COMPONENT_BYTES: usize = 255;

/// Longest stored attachment name. The rest of the component is left for the
/// `.<suffix>` of derived files.
pub const MAX_STORED_NAME_BYTES: usize = 200;

/// Extensions longer than this are treated as part of the stem when shortening.
const MAX_KEPT_EXTENSION_BYTES: usize = 16;

#[derive(Clone, Debug)]
pub struct TransientStore {
    root: PathBuf,
}

impl TransientStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open the scope of one invocation. Nothing touches the disk until the
    /// first file is written.
    pub fn scope(&self, id: &InvocationId) -> TransientScope {
        TransientScope {
            dir: self.root.join(&id.0),
            base_name: None,
            created: Vec::new(),
            dir_created: false,
            released: false,
        }
    }
}

#[derive(Debug)]
pub struct TransientScope {
    dir: PathBuf,
    base_name: Option<String>,
    created: Vec<PathBuf>,
    dir_created: bool,
    released: bool,
}

impl TransientScope {
    #[cfg(test)]
    pub(crate) fn created(&self) -> &[PathBuf] {
        &self.created
    }

    /// Download the attachment into this invocation's directory.
    pub async fn materialize(
        &mut self,
        attachment: &Attachment,
        fetcher: &dyn AttachmentFetcher,
    ) -> Result<PathBuf> {
        let bytes = match fetcher.fetch(attachment).await {
            Ok(b) => b,
            Err(Error::Download(msg)) => return Err(Error::Download(msg)),
            Err(e) => return Err(Error::Download(e.to_string())),
        };

        if let Err(e) = self.ensure_dir().await {
            tracing::warn!(dir = %self.dir.display(), error = %e, "cannot create invocation directory");
            return Err(Error::Download(format!("cannot prepare storage ({})", e.kind())));
        }

        let name = fit_component(&sanitize_filename(&attachment.filename), MAX_STORED_NAME_BYTES);
        let path = self.dir.join(&name);
        self.created.push(path.clone());
        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            tracing::warn!(path = %path.display(), error = %e, "cannot store attachment");
            return Err(Error::Download(format!("cannot store {name} ({})", e.kind())));
        }

        self.base_name = Some(name);
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "attachment stored");
        Ok(path)
    }

    /// Write a derived file next to the original, named `<original>.<suffix>`.
    pub async fn write_derived(&mut self, suffix: &str, bytes: &[u8]) -> Result<PathBuf> {
        let base = self.base_name.as_deref().unwrap_or("output");
        let name = fit_component(
            &sanitize_filename(&format!("{base}.{suffix}")),
            MAX_COMPONENT_BYTES,
        );
        let path = self.dir.join(name);

        if let Err(e) = self.ensure_dir().await {
            tracing::warn!(path = %path.display(), error = %e, "cannot create invocation directory");
            return Err(Error::Formatting {
                path,
                reason: e.kind().to_string(),
            });
        }

        self.created.push(path.clone());
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            tracing::warn!(path = %path.display(), error = %e, "cannot write derived file");
            return Err(Error::Formatting {
                path,
                reason: e.kind().to_string(),
            });
        }
        Ok(path)
    }

    /// Remove everything this scope created. Never fails; a second call is a no-op.
    pub fn release_all(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        for path in self.created.drain(..).rev() {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove transient file");
                }
            }
        }

        if self.dir_created {
            match std::fs::remove_dir_all(&self.dir) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(dir = %self.dir.display(), error = %e, "failed to remove invocation directory");
                }
            }
        }
    }

    async fn ensure_dir(&mut self) -> std::io::Result<()> {
        if !self.dir_created {
            tokio::fs::create_dir_all(&self.dir).await?;
            self.dir_created = true;
        }
        Ok(())
    }
}

impl Drop for TransientScope {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Keep a user-supplied name safe to use as a single path component.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.chars().all(|c| c == '.') {
        "attachment".to_string()
    } else {
        out
    }
}

/// Shorten a sanitized name to at most `max` bytes, keeping a short extension.
/// Input is ASCII, so byte offsets are char boundaries.
pub fn fit_component(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 && name.len() - i - 1 <= MAX_KEPT_EXTENSION_BYTES => {
            (&name[..i], &name[i..])
        }
        _ => (name, ""),
    };
    let keep = max.saturating_sub(ext.len());
    format!("{}{ext}", &stem[..keep.min(stem.len())])
}

/// Downloads attachments over HTTP(S).
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl AttachmentFetcher for HttpFetcher {
    async fn fetch(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(&attachment.url)
            .send()
            .await
            .map_err(|e| Error::Download(format!("{}: {e}", attachment.filename)))?;

        if !resp.status().is_success() {
            return Err(Error::Download(format!(
                "{}: server answered {}",
                attachment.filename,
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Download(format!("{}: {e}", attachment.filename)))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct StaticFetcher(pub Vec<u8>);

    #[async_trait]
    impl AttachmentFetcher for StaticFetcher {
        async fn fetch(&self, _attachment: &Attachment) -> Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenFetcher;

    #[async_trait]
    impl AttachmentFetcher for BrokenFetcher {
        async fn fetch(&self, _attachment: &Attachment) -> Result<Vec<u8>> {
            Err(Error::External("connection reset".to_string()))
        }
    }

    fn attachment(name: &str) -> Attachment {
        Attachment {
            filename: name.to_string(),
            url: format!("https://cdn.example/{name}"),
            size: None,
        }
    }

    #[test]
    fn sanitize_keeps_safe_names_and_neutralises_traversal() {
        assert_eq!(sanitize_filename("chall.bin"), "chall.bin");
        assert_eq!(sanitize_filename("my file (1).png"), "my_file__1_.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename(".."), "attachment");
        assert_eq!(sanitize_filename(""), "attachment");
    }

    #[test]
    fn fit_component_keeps_extension_and_bounds_length() {
        assert_eq!(fit_component("short.bin", 200), "short.bin");

        let long = format!("{}.bin", "a".repeat(296));
        let fitted = fit_component(&long, MAX_STORED_NAME_BYTES);
        assert_eq!(fitted.len(), MAX_STORED_NAME_BYTES);
        assert!(fitted.starts_with("aaaa"));
        assert!(fitted.ends_with(".bin"));

        // An overlong "extension" is just part of the name.
        let odd = format!("x.{}", "b".repeat(300));
        assert_eq!(fit_component(&odd, 50).len(), 50);
    }

    #[tokio::test]
    async fn long_names_are_stored_and_derived_within_component_limit() {
        let root = tempfile::tempdir().unwrap();
        let store = TransientStore::new(root.path());
        let mut scope = store.scope(&InvocationId::new());
        let name = format!("{}.bin", "a".repeat(296));

        let original = scope
            .materialize(&attachment(&name), &StaticFetcher(b"x".to_vec()))
            .await
            .unwrap();
        let derived = scope.write_derived("strings.txt", b"out").await.unwrap();

        let stored = original.file_name().unwrap().to_string_lossy().to_string();
        assert!(stored.len() <= MAX_STORED_NAME_BYTES);
        assert!(stored.ends_with(".bin"));
        let derived_name = derived.file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(derived_name, format!("{stored}.strings.txt"));
        assert!(derived_name.len() <= MAX_COMPONENT_BYTES);
    }

    #[tokio::test]
    async fn materialize_and_derive_then_release() {
        let root = tempfile::tempdir().unwrap();
        let store = TransientStore::new(root.path());
        let mut scope = store.scope(&InvocationId::new());

        let original = scope
            .materialize(&attachment("a.bin"), &StaticFetcher(b"hello".to_vec()))
            .await
            .unwrap();
        let derived = scope.write_derived("strings.txt", b"out").await.unwrap();

        assert_eq!(std::fs::read(&original).unwrap(), b"hello");
        assert_eq!(derived.file_name().unwrap(), "a.bin.strings.txt");
        assert_eq!(derived.parent(), original.parent());

        scope.release_all();
        assert!(!original.exists());
        assert!(!derived.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

        // Second release is a no-op.
        scope.release_all();
    }

    #[tokio::test]
    async fn drop_releases_files() {
        let root = tempfile::tempdir().unwrap();
        let store = TransientStore::new(root.path());
        let path = {
            let mut scope = store.scope(&InvocationId::new());
            scope
                .materialize(&attachment("x.png"), &StaticFetcher(vec![1, 2, 3]))
                .await
                .unwrap()
        };
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn release_tolerates_files_already_gone() {
        let root = tempfile::tempdir().unwrap();
        let store = TransientStore::new(root.path());
        let mut scope = store.scope(&InvocationId::new());
        let path = scope
            .materialize(&attachment("gone.txt"), &StaticFetcher(b"x".to_vec()))
            .await
            .unwrap();
        std::fs::remove_file(&path).unwrap();
        scope.release_all();
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn same_filename_in_two_scopes_does_not_collide() {
        let root = tempfile::tempdir().unwrap();
        let store = TransientStore::new(root.path());
        let mut a = store.scope(&InvocationId::new());
        let mut b = store.scope(&InvocationId::new());

        let pa = a
            .materialize(&attachment("same.bin"), &StaticFetcher(b"AAA".to_vec()))
            .await
            .unwrap();
        let pb = b
            .materialize(&attachment("same.bin"), &StaticFetcher(b"BBB".to_vec()))
            .await
            .unwrap();

        assert_ne!(pa, pb);
        assert_eq!(std::fs::read(&pa).unwrap(), b"AAA");
        assert_eq!(std::fs::read(&pb).unwrap(), b"BBB");
    }

    #[tokio::test]
    async fn fetch_failure_is_a_download_error_and_leaves_nothing() {
        let root = tempfile::tempdir().unwrap();
        let store = TransientStore::new(root.path());
        let mut scope = store.scope(&InvocationId::new());
        let err = scope
            .materialize(&attachment("a.bin"), &BrokenFetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Download(_)));
        assert!(scope.created().is_empty());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
