//! Error types for URL lists, templates and batch files.

use thiserror::Error;

/// Maximum URL length to accept.
pub const MAX_URL_LENGTH: usize = 2000;

/// Errors that can occur while turning input into download batches.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    /// URL is malformed or uses an unsupported scheme
    #[error("invalid URL '{url}': {reason}\n  Suggestion: {suggestion}")]
    InvalidUrl {
        /// The URL that failed validation
        url: String,
        /// Why the URL is invalid
        reason: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// URL exceeds maximum allowed length
    #[error("URL too long ({length} chars, max {max}): {url_preview}...")]
    UrlTooLong {
        /// Truncated URL for display
        url_preview: String,
        /// Actual length
        length: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Number range that cannot be expanded
    #[error("invalid range {first}..={last} step {step}\n  Suggestion: {suggestion}")]
    InvalidRange {
        /// First number
        first: u32,
        /// Last number
        last: u32,
        /// Increment
        step: u32,
        /// How to fix the issue
        suggestion: String,
    },

    /// Batch file is not in the expected CSV layout
    #[error("batch file line {line}: {reason}")]
    InvalidBatch {
        /// 1-based line number
        line: usize,
        /// What was wrong
        reason: String,
    },
}

impl ParseError {
    /// Creates an `InvalidUrl` error for a non-web URL scheme.
    #[must_use]
    pub fn unsupported_scheme(url: &str, scheme: &str) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: format!("scheme '{scheme}' is not supported"),
            suggestion: "Use http:// or https:// URLs".to_string(),
        }
    }

    /// Creates an `InvalidUrl` error for a malformed URL.
    #[must_use]
    pub fn malformed(url: &str, parse_error: &str) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: parse_error.to_string(),
            suggestion: "Check the URL format and try again".to_string(),
        }
    }

    /// Creates an `InvalidUrl` error for a URL without a host.
    #[must_use]
    pub fn no_host(url: &str) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: "URL has no host".to_string(),
            suggestion: "Ensure the URL includes a domain (e.g., example.com)".to_string(),
        }
    }

    /// Creates a `UrlTooLong` error for URLs exceeding the maximum length.
    #[must_use]
    pub fn too_long(url: &str) -> Self {
        Self::UrlTooLong {
            url_preview: url.chars().take(50).collect(),
            length: url.len(),
            max: MAX_URL_LENGTH,
        }
    }

    /// Creates an `InvalidRange` error for a zero step.
    #[must_use]
    pub fn zero_step(first: u32, last: u32) -> Self {
        Self::InvalidRange {
            first,
            last,
            step: 0,
            suggestion: "Use a step of at least 1".to_string(),
        }
    }

    /// Creates an `InvalidRange` error for a reversed range.
    #[must_use]
    pub fn reversed_range(first: u32, last: u32, step: u32) -> Self {
        Self::InvalidRange {
            first,
            last,
            step,
            suggestion: format!("Use --last {first} or greater"),
        }
    }

    /// Creates an `InvalidBatch` error.
    #[must_use]
    pub fn batch(line: usize, reason: impl Into<String>) -> Self {
        Self::InvalidBatch {
            line,
            reason: reason.into(),
        }
    }
}
