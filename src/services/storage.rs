use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Local uploads root shared by every job.
///
/// Outputs are named `<prefix>_<unix-ts>_<name>`; a numeric suffix is added to
/// the timestamp when two jobs land on the same name within one second. Names
/// are reserved by creating the file or directory with create-new semantics,
/// so concurrent jobs never share one.
#[derive(Debug, Clone)]
pub struct UploadStorage {
    root: PathBuf,
}

impl UploadStorage {
    /// The root is made absolute here. Converters run with their own working
    /// directory and receive paths under it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::create_dir_all(self.work_root()).await
    }

    /// Scratch space for converters, removed when the job finishes.
    pub fn work_root(&self) -> PathBuf {
        self.root.join(".work")
    }

    fn candidate(&self, prefix: &str, ts: i64, n: u32, name: &str) -> PathBuf {
        if n == 0 {
            self.root.join(format!("{}_{}_{}", prefix, ts, name))
        } else {
            self.root.join(format!("{}_{}-{}_{}", prefix, ts, n, name))
        }
    }

    /// First free path for `<prefix>_<ts>_<name>`. Nothing is created, so a
    /// caller that needs the name to itself must create it with create-new
    /// semantics and retry on `AlreadyExists`.
    pub fn unique_path(&self, prefix: &str, name: &str) -> PathBuf {
        let ts = chrono::Utc::now().timestamp();
        let name = sanitize_filename(name);
        let mut n = 0;
        loop {
            let candidate = self.candidate(prefix, ts, n, &name);
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Create an empty file under a fresh `<prefix>_<ts>_<name>` and return its path.
    pub async fn reserve_file(&self, prefix: &str, name: &str) -> io::Result<PathBuf> {
        let ts = chrono::Utc::now().timestamp();
        let name = sanitize_filename(name);
        let mut n = 0;
        loop {
            let candidate = self.candidate(prefix, ts, n, &name);
            let created = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
                .await;
            match created {
                Ok(_) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// Create an empty directory under a fresh `<prefix>_<ts>_<name>` and return its path.
    pub async fn reserve_dir(&self, prefix: &str, name: &str) -> io::Result<PathBuf> {
        let ts = chrono::Utc::now().timestamp();
        let name = sanitize_filename(name);
        let mut n = 0;
        loop {
            let candidate = self.candidate(prefix, ts, n, &name);
            match tokio::fs::create_dir(&candidate).await {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// Public URL of a path under the root.
    pub fn url_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(format!("/uploads/{}", parts.join("/")))
    }

    /// Stream an upload body to `dest`, aborting as soon as `max_bytes` is exceeded.
    /// The partial file is removed on any failure.
    pub async fn write_stream<S, E>(&self, dest: &Path, stream: S, max_bytes: u64) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let result = write_limited(dest, stream, max_bytes).await;
        if result.is_err() {
            remove_quietly(dest).await;
        }
        result
    }

    /// Move a file to a freshly reserved name under the root. The rename
    /// replaces only the placeholder this call created.
    pub async fn relocate(&self, from: &Path, prefix: &str, name: &str) -> io::Result<PathBuf> {
        let to = self.reserve_file(prefix, name).await?;
        if let Err(e) = move_file(from, &to).await {
            remove_quietly(&to).await;
            return Err(e);
        }
        Ok(to)
    }
}

async fn write_limited<S, E>(dest: &Path, mut stream: S, max_bytes: u64) -> Result<u64, UploadError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| UploadError::Stream(e.to_string()))?;
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(UploadError::PayloadTooLarge { limit: max_bytes });
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(written)
}

/// Rename, falling back to copy + delete across filesystems.
pub async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
        Err(e) => Err(e),
    }
}

/// Delete a file or directory, logging instead of failing.
pub async fn remove_quietly(path: &Path) {
    let result = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "Failed to clean up upload artifact");
    }
}

/// Strip directories and unsafe characters from a client supplied filename.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let sanitized: String = base
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                Some(c)
            } else if c.is_whitespace() {
                Some('_')
            } else {
                None
            }
        })
        .take(200)
        .collect();

    let trimmed = sanitized.trim_start_matches('.');
    if trimmed.is_empty() {
        "unnamed_file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// File stem of a sanitized filename.
pub fn stem_of(filename: &str) -> String {
    let clean = sanitize_filename(filename);
    Path::new(&clean)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .unwrap_or(clean)
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("File too large. Maximum size: {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("Upload stream failed: {0}")]
    Stream(String),

    #[error("Failed to write upload: {0}")]
    Io(#[from] io::Error),
}
