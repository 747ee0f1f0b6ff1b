//! Zip/SLPK extraction into a per-upload directory.
//!
//! After extraction every `*.json.gz` member is decompressed in place, so the
//! I3S resolver only needs a generic `.gz` fallback for binary resources.

use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::Stream;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

const BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ExtractionLimits {
    pub max_entries: usize,
    pub max_total_bytes: u64,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            max_total_bytes: 20 * 1024 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
    /// Entries dropped because their names escape the output directory.
    pub skipped: usize,
    pub gzip: GzipSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GzipSummary {
    pub decompressed: usize,
    pub failed: usize,
}

/// Extract `archive` into `dest` and normalize `*.json.gz` members.
/// `dest` must not exist yet ([`ExtractionError::DestinationExists`] otherwise).
/// It is removed again if extraction fails.
pub async fn extract_package(
    archive: &Path,
    dest: &Path,
    limits: ExtractionLimits,
) -> Result<ExtractionSummary, ExtractionError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut summary = extract_zip(&archive, &dest, limits)?;
        summary.gzip = decompress_json_gz(&dest);
        Ok(summary)
    })
    .await
    .map_err(|e| ExtractionError::Io(io::Error::other(e)))?
}

/// Blocking zip extraction with entry-count and size limits.
pub fn extract_zip(
    archive: &Path,
    dest: &Path,
    limits: ExtractionLimits,
) -> Result<ExtractionSummary, ExtractionError> {
    fs::create_dir(dest).map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists => ExtractionError::DestinationExists(dest.to_path_buf()),
        _ => ExtractionError::Io(e),
    })?;

    let result = unzip_into(archive, dest, limits);
    if result.is_err() {
        if let Err(e) = fs::remove_dir_all(dest) {
            tracing::warn!(dir = %dest.display(), error = %e, "Failed to remove partial extraction");
        }
    }
    result
}

fn unzip_into(
    archive: &Path,
    dest: &Path,
    limits: ExtractionLimits,
) -> Result<ExtractionSummary, ExtractionError> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file)?;

    if zip.len() > limits.max_entries {
        return Err(ExtractionError::TooManyEntries {
            count: zip.len(),
            limit: limits.max_entries,
        });
    }

    let mut summary = ExtractionSummary::default();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;

        let relative = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => {
                tracing::warn!(entry = entry.name(), "Skipping archive entry outside the extraction root");
                summary.skipped += 1;
                continue;
            }
        };
        let out_path = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            summary.directories += 1;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut outfile = File::create(&out_path)?;
        loop {
            let n = entry.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            summary.bytes += n as u64;
            if summary.bytes > limits.max_total_bytes {
                return Err(ExtractionError::SizeExceeded {
                    limit: limits.max_total_bytes,
                });
            }
            outfile.write_all(&buffer[..n])?;
        }
        summary.files += 1;
    }

    Ok(summary)
}

/// Decompress every `*.json.gz` under `root` to the same name without `.gz`
/// and delete the compressed copy. Failures are logged and skipped.
pub fn decompress_json_gz(root: &Path) -> GzipSummary {
    let mut summary = GzipSummary::default();

    for path in files_with_suffix(root, ".json.gz") {
        match gunzip_in_place(&path) {
            Ok(_) => summary.decompressed += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to decompress gzip member, leaving it as is");
                summary.failed += 1;
            }
        }
    }

    if summary.decompressed > 0 || summary.failed > 0 {
        tracing::info!(
            root = %root.display(),
            decompressed = summary.decompressed,
            failed = summary.failed,
            "Normalized gzip members"
        );
    }
    summary
}

fn gunzip_in_place(path: &Path) -> io::Result<PathBuf> {
    let target = path.with_extension("");
    let tmp = path.with_extension("partial");

    let result = (|| {
        let mut decoder = GzDecoder::new(File::open(path)?);
        let mut out = File::create(&tmp)?;
        io::copy(&mut decoder, &mut out)?;
        out.flush()?;
        fs::rename(&tmp, &target)?;
        fs::remove_file(path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result.map(|_| target)
}

/// Stream the decompressed contents of a gzip file in chunks. Decoding runs
/// on a blocking thread and stops when the receiver is dropped.
pub async fn gunzip_stream(path: PathBuf) -> io::Result<impl Stream<Item = io::Result<Bytes>> + Send + 'static> {
    let file = tokio::fs::File::open(&path).await?.into_std().await;
    let (tx, rx) = tokio::sync::mpsc::channel::<io::Result<Bytes>>(4);

    tokio::task::spawn_blocking(move || {
        let mut decoder = GzDecoder::new(file);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let chunk = match decoder.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => Ok(Bytes::copy_from_slice(&buffer[..n])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
            let failed = chunk.is_err();
            if tx.blocking_send(chunk).is_err() || failed {
                break;
            }
        }
    });

    Ok(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    }))
}

fn files_with_suffix(root: &Path, suffix: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to read directory, skipping");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            match entry.file_type() {
                Ok(ft) if ft.is_dir() => dirs.push(path),
                Ok(ft) if ft.is_file() => {
                    let matches = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.to_ascii_lowercase().ends_with(suffix))
                        .unwrap_or(false);
                    if matches {
                        found.push(path);
                    }
                }
                _ => {}
            }
        }
    }

    found.sort();
    found
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Corrupt or unreadable archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive has {count} entries, limit is {limit}")]
    TooManyEntries { count: usize, limit: usize },

    #[error("Archive expands beyond {limit} bytes")]
    SizeExceeded { limit: u64 },

    #[error("Extraction directory {} already exists", .0.display())]
    DestinationExists(PathBuf),

    #[error("IO error during extraction: {0}")]
    Io(#[from] io::Error),
}
