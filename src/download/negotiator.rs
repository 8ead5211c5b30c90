//! Resume negotiation.
//!
//! Decides which request an entry needs next and interprets response headers
//! (`Accept-Ranges`, `Content-Range`, `Content-Length`, `Last-Modified`,
//! `Content-Disposition`, `Location`). Everything here is synchronous and only
//! touches the entry and the file metadata; the queue manager executes the
//! decisions.

use std::sync::LazyLock;
use std::time::SystemTime;

use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, LAST_MODIFIED,
};
use tracing::{debug, trace};
use url::Url;

use super::entry::{Entry, EntryPhase, Method};
use super::request::{closed_range, open_range};
use super::transport::header_str;

#[allow(clippy::expect_used)]
static CONTENT_RANGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^bytes ([0-9]+)-([0-9]+)/([0-9]+)$").expect("Content-Range regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static DISPOSITION_BOTH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^attachment; filename="([a-zA-Z0-9._-]+)"; filename\*=utf-8''([a-zA-Z0-9._-]+)$"#)
        .expect("Content-Disposition regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static DISPOSITION_ASCII_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^attachment; filename="([a-zA-Z0-9._-]+)"$"#)
        .expect("Content-Disposition regex is valid") // Static pattern, safe to panic
});

/// Parsed `Content-Range: bytes start-end/total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// First byte of the range.
    pub start: u64,
    /// Last byte of the range, inclusive.
    pub end: u64,
    /// Size of the complete representation.
    pub total: u64,
}

/// Parses a `Content-Range` value.
#[must_use]
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let caps = CONTENT_RANGE_PATTERN.captures(value.trim())?;
    Some(ContentRange {
        start: caps[1].parse().ok()?,
        end: caps[2].parse().ok()?,
        total: caps[3].parse().ok()?,
    })
}

/// Attachment name(s) from a `Content-Disposition` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// The `filename="..."` value.
    pub ascii: String,
    /// The `filename*=utf-8''...` value, when present.
    pub utf8: Option<String>,
}

/// Parses the two `Content-Disposition` shapes the downloader understands.
#[must_use]
pub fn parse_content_disposition(value: &str) -> Option<Attachment> {
    if let Some(caps) = DISPOSITION_BOTH_PATTERN.captures(value) {
        return Some(Attachment {
            ascii: caps[1].to_string(),
            utf8: Some(caps[2].to_string()),
        });
    }
    DISPOSITION_ASCII_PATTERN
        .captures(value)
        .map(|caps| Attachment {
            ascii: caps[1].to_string(),
            utf8: None,
        })
}

/// Resolves a `Location` header against the current URL.
///
/// Absolute URLs are taken as-is; values starting with `/` keep the current
/// scheme, host and port. Anything else is not followed.
#[must_use]
pub fn resolve_redirect(current: &Url, location: &str) -> Option<Url> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }
    if let Ok(absolute) = Url::parse(location) {
        return matches!(absolute.scheme(), "http" | "https").then_some(absolute);
    }
    if location.starts_with('/') {
        return current.join(location).ok();
    }
    None
}

/// Whether `status` is one of the redirects the queue follows.
#[must_use]
pub fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 305 | 307 | 308)
}

/// Server `Last-Modified`, when present and valid.
#[must_use]
pub fn last_modified(headers: &HeaderMap) -> Option<SystemTime> {
    header_str(headers, LAST_MODIFIED).and_then(|v| httpdate::parse_http_date(v).ok())
}

/// `Content-Length` header value.
#[must_use]
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, CONTENT_LENGTH).and_then(|v| v.trim().parse().ok())
}

fn accepts_byte_ranges(headers: &HeaderMap) -> bool {
    header_str(headers, ACCEPT_RANGES).is_some_and(|v| v.trim().eq_ignore_ascii_case("bytes"))
}

/// What the queue should do before issuing anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Plan {
    /// Issue the entry's method with an optional `Range` value.
    Send { range: Option<String> },
    /// The bytes on disk already cover `filesize`; verify instead of requesting.
    VerifyExisting,
}

/// Decides the next request for an entry at the front of the queue.
///
/// For streaming entries the offset is taken from the partial file on disk,
/// except when an earlier probe already confirmed range support. A zero or
/// negative range is never requested.
pub(crate) fn plan_request(entry: &mut Entry) -> Plan {
    if !entry.is_streaming() {
        if entry.method != Method::Head {
            entry.phase = EntryPhase::Downloading;
        }
        return Plan::Send { range: None };
    }

    match (entry.method, entry.phase) {
        (Method::Head, EntryPhase::RangingHead) => {
            // A retried ranged probe resumes from what is on disk.
            entry.fileoffset = entry.size_on_disk();
            if entry.fileoffset == 0 {
                restart_from_zero(entry);
                return Plan::Send { range: None };
            }
            Plan::Send {
                range: Some(open_range(entry.fileoffset)),
            }
        }
        (Method::Head, _) => {
            let confirmed = entry.fileoffset > 0 && entry.filesize > 0 && entry.supports_accept_ranges;
            if confirmed {
                entry.phase = EntryPhase::RangingHead;
                return Plan::Send {
                    range: Some(open_range(entry.fileoffset)),
                };
            }
            entry.fileoffset = entry.size_on_disk();
            entry.phase = EntryPhase::Probing;
            if entry.filesize > 0 && entry.fileoffset >= entry.filesize {
                return Plan::VerifyExisting;
            }
            Plan::Send { range: None }
        }
        _ => {
            entry.phase = EntryPhase::Downloading;
            if entry.filesize > 0 && entry.fileoffset >= entry.filesize {
                return Plan::VerifyExisting;
            }
            let range = (entry.supports_resume() && entry.fileoffset > 0)
                .then(|| closed_range(entry.fileoffset, entry.filesize));
            Plan::Send { range }
        }
    }
}

/// Outcome of a HEAD response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HeadOutcome {
    /// The entry was updated and must be issued again.
    Reissue,
    /// The complete file is already on disk.
    AlreadySaved,
    /// The file on disk is larger than the remote one.
    Oversized { on_disk: u64, expected: u64 },
    /// Follow `Location`.
    Redirect,
    /// 407 from the proxy.
    ProxyAuthentication,
    /// Any other status.
    Unexpected(u16),
}

/// Interprets a HEAD response, mutating the entry.
///
/// Human-readable remarks (filename or size conflicts) are pushed to `notes`.
pub(crate) fn on_head_response(
    entry: &mut Entry,
    status: StatusCode,
    headers: &HeaderMap,
    notes: &mut Vec<String>,
) -> HeadOutcome {
    if is_redirect(status) {
        return HeadOutcome::Redirect;
    }
    match status.as_u16() {
        200 => {}
        206 => {
            apply_common_headers(entry, headers, notes);
            process_content_range(entry, headers, notes);
            entry.method = Method::Get;
            entry.phase = EntryPhase::Downloading;
            return HeadOutcome::Reissue;
        }
        407 => return HeadOutcome::ProxyAuthentication,
        other => return HeadOutcome::Unexpected(other),
    }

    apply_common_headers(entry, headers, notes);
    if let Some(length) = content_length(headers) {
        entry.filesize = length;
    }

    if entry.phase == EntryPhase::RangingHead {
        // Ranges are advertised but ignored: fetch everything again.
        debug!(url = %entry.url, "ranged HEAD answered with 200, restarting from zero");
        notes.push(format!(
            "Server ignored the range request for {}, downloading it again",
            entry.url
        ));
        restart_from_zero(entry);
        return HeadOutcome::Reissue;
    }

    if entry.is_streaming() && entry.filesize > 0 {
        let on_disk = entry.size_on_disk();
        if on_disk == entry.filesize {
            return HeadOutcome::AlreadySaved;
        }
        if on_disk > entry.filesize {
            return HeadOutcome::Oversized {
                on_disk,
                expected: entry.filesize,
            };
        }
    }

    if accepts_byte_ranges(headers) && entry.fileoffset > 0 {
        entry.supports_accept_ranges = true;
        entry.phase = EntryPhase::RangingHead;
        trace!(url = %entry.url, offset = entry.fileoffset, "server accepts byte ranges");
        return HeadOutcome::Reissue;
    }

    restart_from_zero(entry);
    HeadOutcome::Reissue
}

/// Outcome of the response to a GET or POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BodyOutcome {
    /// Read the body. `restart` means a requested range was ignored and the
    /// destination must be truncated first.
    Read { restart: bool, expected: Option<u64> },
    /// Follow `Location` (GET) or report it (POST).
    Redirect,
    /// 401/403: the server wants a CAPTCHA or an account verification.
    AuthorizationFailed,
    /// 407 from the proxy.
    ProxyAuthentication,
    /// Any other status.
    Unexpected(u16),
}

/// Interprets the status and headers of a body response, mutating the entry.
pub(crate) fn on_body_response(
    entry: &mut Entry,
    status: StatusCode,
    headers: &HeaderMap,
    range_requested: bool,
    notes: &mut Vec<String>,
) -> BodyOutcome {
    if is_redirect(status) {
        return BodyOutcome::Redirect;
    }
    let code = status.as_u16();
    match code {
        200 | 206 => {}
        401 | 403 => return BodyOutcome::AuthorizationFailed,
        407 => return BodyOutcome::ProxyAuthentication,
        other => return BodyOutcome::Unexpected(other),
    }
    if entry.method == Method::Post && code != 200 {
        return BodyOutcome::Unexpected(code);
    }

    apply_common_headers(entry, headers, notes);
    let length = content_length(headers);

    let mut restart = false;
    if code == 200 {
        if range_requested {
            notes.push(format!(
                "Server sent the whole of {} instead of the requested range, downloading it again",
                entry.url
            ));
            restart_from_zero(entry);
            restart = true;
        }
        if let Some(length) = length
            && (entry.filesize == 0 || restart)
        {
            entry.filesize = length;
        }
    } else if entry.filesize == 0
        && let Some(range) = header_str(headers, CONTENT_RANGE).and_then(parse_content_range)
    {
        entry.filesize = range.total;
    }

    BodyOutcome::Read {
        restart,
        expected: length,
    }
}

/// Points the entry at a redirect target and resets what was learned about
/// the old one. Streaming entries go back to probing.
pub(crate) fn follow_redirect(entry: &mut Entry, target: &Url) {
    entry.referer = std::mem::replace(&mut entry.url, target.to_string());
    entry.reset_resume_state();
    entry.redirects += 1;
    if entry.is_streaming() {
        entry.method = Method::Head;
        entry.phase = EntryPhase::Probing;
    }
}

fn restart_from_zero(entry: &mut Entry) {
    entry.supports_accept_ranges = false;
    entry.supports_content_range = false;
    entry.fileoffset = 0;
    entry.method = Method::Get;
    entry.phase = EntryPhase::Downloading;
}

fn apply_common_headers(entry: &mut Entry, headers: &HeaderMap, notes: &mut Vec<String>) {
    if let Some(time) = last_modified(headers) {
        entry.time = Some(time);
    }
    if let Some(value) = header_str(headers, CONTENT_DISPOSITION) {
        apply_content_disposition(entry, value, notes);
    }
}

fn apply_content_disposition(entry: &mut Entry, value: &str, notes: &mut Vec<String>) {
    let Some(attachment) = parse_content_disposition(value) else {
        trace!(value, "unrecognized Content-Disposition");
        return;
    };
    if let Some(utf8) = &attachment.utf8
        && *utf8 != attachment.ascii
    {
        notes.push(format!(
            "UTF-8 and ASCII filenames are different (ASCII = '{}', UTF-8 = '{}')",
            attachment.ascii, utf8
        ));
    }
    if entry.filename != attachment.ascii {
        notes.push(format!(
            "Attachment filename is different (original = '{}', attachment = '{}')",
            entry.filename, attachment.ascii
        ));
        entry.filename = attachment.ascii;
    }
}

fn process_content_range(entry: &mut Entry, headers: &HeaderMap, notes: &mut Vec<String>) {
    match header_str(headers, CONTENT_RANGE).and_then(parse_content_range) {
        Some(range) => {
            entry.supports_content_range = true;
            entry.fileoffset = range.start;
            if entry.filesize > 0 && entry.filesize != range.total {
                notes.push(format!(
                    "Size from Content-Range ({}) differs from the previous one ({})",
                    range.total, entry.filesize
                ));
            }
            entry.filesize = range.total;
        }
        None => {
            notes.push(format!("Unable to parse Content-Range for {}", entry.url));
            entry.supports_content_range = false;
            entry.filesize = content_length(headers).unwrap_or(0);
            entry.fileoffset = 0;
        }
    }
}
