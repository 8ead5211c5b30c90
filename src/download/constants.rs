//! Constants for the download module (timeouts, request defaults, limits).

use std::time::Duration;

/// Time allowed for a request to produce response headers (60 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 60;

/// Longest gap allowed between two body chunks once data flows (5 minutes).
pub const STALL_TIMEOUT_SECS: u64 = 300;

/// Maximum number of redirect hops followed for a single entry.
pub const MAX_REDIRECTS: u32 = 10;

/// `Accept` header sent when the entry does not carry its own.
pub const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// `Accept-Language` header sent with every request.
pub const ACCEPT_LANGUAGE: &str = "fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7";

/// Content type used when POST parameters are form-encoded.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

/// Port assumed when a proxy is given without one.
pub const DEFAULT_PROXY_PORT: u16 = 80;

/// Convenience for [`CONNECT_TIMEOUT_SECS`] as a [`Duration`].
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// Convenience for [`STALL_TIMEOUT_SECS`] as a [`Duration`].
pub const STALL_TIMEOUT: Duration = Duration::from_secs(STALL_TIMEOUT_SECS);
