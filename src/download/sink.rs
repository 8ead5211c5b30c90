//! Destination file handling: streaming writes, buffered saves, disk checks.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use filetime::FileTime;
use flate2::read::GzDecoder;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use super::error::DownloadError;

/// Scoped writer over a destination file.
///
/// Dropping the sink releases the handle; call [`FileSink::close`] to flush and
/// sync before the file is inspected.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
    written: u64,
}

impl FileSink {
    /// Opens `path` for appending (`append = true`) or truncating writes.
    ///
    /// Parent directories are created and the volume must have at least
    /// `required` free bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InsufficientDiskSpace`] or [`DownloadError::Io`].
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), append, required))]
    pub async fn open(path: &Path, append: bool, required: u64) -> Result<Self, DownloadError> {
        let dir = prepare_parent(path).await?;
        ensure_free_space(&dir, path, required)?;

        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let file = options
            .open(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;

        debug!("opened destination file");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written: 0,
        })
    }

    /// Appends a chunk.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when the write fails.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), DownloadError> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Discards everything in the file, including bytes from earlier sessions.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when the file cannot be truncated.
    pub async fn truncate(&mut self) -> Result<(), DownloadError> {
        self.file
            .set_len(0)
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        self.written = 0;
        Ok(())
    }

    /// Bytes written through this sink.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Destination path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes, syncs and closes the file.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when flushing fails.
    pub async fn close(mut self) -> Result<(), DownloadError> {
        self.file
            .flush()
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        debug!(path = %self.path.display(), written = self.written, "closed destination file");
        Ok(())
    }
}

/// Result of [`save_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The file was created with the given body.
    Written,
    /// A file already existed and was left untouched.
    AlreadyExists,
    /// Nothing to write.
    Empty,
}

/// Writes a buffered body to `path` unless a file is already there.
///
/// The file is created exclusively, so a concurrent writer never gets its
/// content replaced. When `time` is known it becomes the file's mtime.
///
/// # Errors
///
/// Returns [`DownloadError::InsufficientDiskSpace`] or [`DownloadError::Io`].
#[instrument(level = "debug", skip(data), fields(path = %path.display(), len = data.len()))]
pub async fn save_file(
    path: &Path,
    data: &[u8],
    time: Option<SystemTime>,
) -> Result<SaveOutcome, DownloadError> {
    if data.is_empty() {
        return Ok(SaveOutcome::Empty);
    }
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        debug!("destination exists, not overwriting");
        return Ok(SaveOutcome::AlreadyExists);
    }

    let dir = prepare_parent(path).await?;
    ensure_free_space(&dir, path, data.len() as u64)?;

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Ok(SaveOutcome::AlreadyExists);
        }
        Err(e) => return Err(DownloadError::io(path, e)),
    };
    file.write_all(data)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    file.sync_all()
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    drop(file);

    if let Some(time) = time {
        set_modified(path, time)?;
    }
    Ok(SaveOutcome::Written)
}

/// Stamps `time` as the modification time of `path`.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] when the timestamp cannot be set.
pub fn set_modified(path: &Path, time: SystemTime) -> Result<(), DownloadError> {
    filetime::set_file_mtime(path, FileTime::from_system_time(time))
        .map_err(|e| DownloadError::io(path, e))
}

/// Inflates a gzip body.
///
/// # Errors
///
/// Returns the decoder error when `data` is not a valid gzip stream.
pub fn inflate_gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len().saturating_mul(4));
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Gzip streams start with `0x1f 0x8b`; the first byte is enough to tell a
/// compressed body from a plain one the server mislabelled.
#[must_use]
pub fn looks_gzipped(data: &[u8]) -> bool {
    data.first() == Some(&0x1f)
}

async fn prepare_parent(path: &Path) -> Result<PathBuf, DownloadError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| DownloadError::io(&dir, e))?;
    Ok(dir)
}

fn ensure_free_space(dir: &Path, path: &Path, required: u64) -> Result<(), DownloadError> {
    if required == 0 {
        return Ok(());
    }
    match fs2::available_space(dir) {
        Ok(available) if available < required => Err(DownloadError::insufficient_disk_space(
            path, required, available,
        )),
        Ok(_) => Ok(()),
        Err(e) => {
            // Some filesystems cannot report free space; the write itself will fail if full.
            warn!(dir = %dir.display(), error = %e, "unable to query free disk space");
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sink_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("file.bin");
        let mut sink = FileSink::open(&path, false, 3).await.unwrap();
        sink.write(b"abc").await.unwrap();
        assert_eq!(sink.written(), 3);
        sink.close().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_sink_truncate_discards_previous_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.bin");
        std::fs::write(&path, b"stale partial").unwrap();

        let mut sink = FileSink::open(&path, true, 0).await.unwrap();
        sink.truncate().await.unwrap();
        sink.write(b"fresh").await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_sink_rejects_impossible_space_requirement() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.bin");
        let err = FileSink::open(&path, false, u64::MAX).await.unwrap_err();
        assert!(
            matches!(err, DownloadError::InsufficientDiskSpace { required, .. } if required == u64::MAX),
            "got {err:?}"
        );
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_save_file_writes_and_stamps_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("page.html");
        let time = UNIX_EPOCH + Duration::from_secs(1_650_000_000);

        let outcome = save_file(&path, b"<html/>", Some(time)).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Written);
        assert_eq!(std::fs::read(&path).unwrap(), b"<html/>");
        let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(mtime, time);
    }

    #[tokio::test]
    async fn test_save_file_leaves_existing_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.html");
        std::fs::write(&path, b"original").unwrap();

        let outcome = save_file(&path, b"replacement", None).await.unwrap();
        assert_eq!(outcome, SaveOutcome::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"original");
    }

    #[tokio::test]
    async fn test_save_file_skips_empty_body() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.html");
        assert_eq!(save_file(&path, b"", None).await.unwrap(), SaveOutcome::Empty);
        assert!(!path.exists());
    }

    #[test]
    fn test_inflate_gzip_roundtrip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"compressed payload").unwrap();
        let gz = encoder.finish().unwrap();

        assert!(looks_gzipped(&gz));
        assert_eq!(inflate_gzip(&gz).unwrap(), b"compressed payload");
        assert!(!looks_gzipped(b"plain"));
        assert!(inflate_gzip(b"\x1fnot gzip").is_err());
    }
}
