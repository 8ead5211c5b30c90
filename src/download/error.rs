//! Error types for the download module.
//!
//! Every variant carries the URL or path it concerns so that queue events can
//! be rendered without extra context.

use std::path::PathBuf;

use thiserror::Error;

use super::transport::TransportError;

/// Errors that can occur while driving a queue entry.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The transport failed to deliver a request or its body.
    #[error("network error downloading {url}: {source}")]
    Transport {
        /// The URL being fetched.
        url: String,
        /// The underlying transport error.
        #[source]
        source: TransportError,
    },

    /// No response headers arrived within the connection timeout.
    #[error("timeout after {secs}s waiting for a response from {url}")]
    ConnectTimeout {
        /// The URL being fetched.
        url: String,
        /// Configured timeout in seconds.
        secs: u64,
    },

    /// The body stopped producing data for longer than the stall timeout.
    #[error("download of {url} stalled for {secs}s")]
    Stalled {
        /// The URL being fetched.
        url: String,
        /// Configured timeout in seconds.
        secs: u64,
    },

    /// File system error (create directory, open, write, set mtime).
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The entry URL is malformed or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Not enough free space to hold the remaining bytes.
    #[error("not enough disk space for {path}: {required} bytes required, {available} available")]
    InsufficientDiskSpace {
        /// Destination file.
        path: PathBuf,
        /// Bytes still to be written.
        required: u64,
        /// Bytes available on the volume.
        available: u64,
    },

    /// The finished file does not have the announced size.
    #[error("File {path} has a wrong size ({received} received / {expected} expected)")]
    SizeMismatch {
        /// Destination file.
        path: PathBuf,
        /// Size found on disk.
        received: u64,
        /// Size announced by the server.
        expected: u64,
    },

    /// The server answered with a status the negotiation does not handle.
    #[error("Unexpected status code {status} for {url}")]
    UnexpectedStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Redirect chain longer than the configured hop limit.
    #[error("too many redirects ({limit}) starting from {url}")]
    TooManyRedirects {
        /// Last URL reached.
        url: String,
        /// Hop limit that was exceeded.
        limit: u32,
    },

    /// A streaming entry was queued without a destination path.
    #[error("no destination path for {url}")]
    NoDestination {
        /// The URL of the entry.
        url: String,
    },

    /// A gzip body could not be inflated.
    #[error("failed to decompress body of {url}: {source}")]
    Decode {
        /// The URL the body came from.
        url: String,
        /// The underlying decoder error.
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    /// Creates a transport error.
    pub fn transport(url: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    /// Creates a connection timeout error.
    pub fn connect_timeout(url: impl Into<String>, secs: u64) -> Self {
        Self::ConnectTimeout {
            url: url.into(),
            secs,
        }
    }

    /// Creates a stall timeout error.
    pub fn stalled(url: impl Into<String>, secs: u64) -> Self {
        Self::Stalled {
            url: url.into(),
            secs,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an insufficient disk space error.
    pub fn insufficient_disk_space(path: impl Into<PathBuf>, required: u64, available: u64) -> Self {
        Self::InsufficientDiskSpace {
            path: path.into(),
            required,
            available,
        }
    }

    /// Creates a size mismatch error.
    pub fn size_mismatch(path: impl Into<PathBuf>, received: u64, expected: u64) -> Self {
        Self::SizeMismatch {
            path: path.into(),
            received,
            expected,
        }
    }

    /// Creates an unexpected status error.
    pub fn unexpected_status(url: impl Into<String>, status: u16) -> Self {
        Self::UnexpectedStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a redirect limit error.
    pub fn too_many_redirects(url: impl Into<String>, limit: u32) -> Self {
        Self::TooManyRedirects {
            url: url.into(),
            limit,
        }
    }

    /// Creates a missing destination error.
    pub fn no_destination(url: impl Into<String>) -> Self {
        Self::NoDestination { url: url.into() }
    }

    /// Creates a decompression error.
    pub fn decode(url: impl Into<String>, source: std::io::Error) -> Self {
        Self::Decode {
            url: url.into(),
            source,
        }
    }
}

// No `From<std::io::Error>` or `From<TransportError>`: every variant needs the
// URL or path, which the source errors do not carry.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_size_mismatch_display_names_both_sizes() {
        let error = DownloadError::size_mismatch("/tmp/a.bin", 400, 1000);
        assert_eq!(
            error.to_string(),
            "File /tmp/a.bin has a wrong size (400 received / 1000 expected)"
        );
    }

    #[test]
    fn test_unexpected_status_display() {
        let error = DownloadError::unexpected_status("http://x/a.bin", 500);
        let msg = error.to_string();
        assert!(msg.contains("500"), "Expected status in: {msg}");
        assert!(msg.contains("http://x/a.bin"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_insufficient_disk_space_display() {
        let error = DownloadError::insufficient_disk_space("/data/big.iso", 10, 3);
        let msg = error.to_string();
        assert!(msg.contains("/data/big.iso"));
        assert!(msg.contains("10 bytes required"));
        assert!(msg.contains("3 available"));
    }

    #[test]
    fn test_transport_error_keeps_source() {
        use std::error::Error as _;

        let error = DownloadError::transport(
            "http://x/a.bin",
            TransportError::network("http://x/a.bin", "connection reset"),
        );
        assert!(error.source().is_some());
        assert!(error.to_string().contains("connection reset"));
    }

    #[test]
    fn test_timeouts_display_seconds() {
        assert!(
            DownloadError::connect_timeout("http://x/", 60)
                .to_string()
                .contains("60s")
        );
        assert!(
            DownloadError::stalled("http://x/", 300)
                .to_string()
                .contains("300s")
        );
    }
}
