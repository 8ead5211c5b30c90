//! Netscape cookie files and the shared cookie jar.
//!
//! Cookie files use the Netscape/wget layout (7 TAB-separated fields per
//! line). Loading is lenient: malformed lines are skipped with a diagnostic
//! and the rest of the file is still used.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use regex::Regex;
use reqwest::cookie::{CookieStore, Jar};
use tracing::{debug, instrument, trace, warn};
use url::Url;

#[allow(clippy::expect_used)]
static COOKIE_FILE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\.txt$")
        .expect("cookie file name regex is valid") // Static pattern, safe to panic
});

/// A single cookie read from a cookie file.
///
/// The value is redacted in Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Cookie {
    /// Domain the cookie belongs to (e.g. `.example.com`). Empty means host-only.
    pub domain: String,
    /// Whether subdomains match.
    pub tailmatch: bool,
    /// URL path scope.
    pub path: String,
    /// HTTPS only.
    pub secure: bool,
    /// Unix timestamp of expiry, 0 for a session cookie.
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    value: String,
}

impl Cookie {
    /// Creates a session cookie for `domain` with path `/`.
    #[must_use]
    pub fn new(domain: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            tailmatch: true,
            path: "/".to_string(),
            secure: false,
            expires: 0,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Cookie value. Avoid logging it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    fn to_set_cookie(&self) -> String {
        let mut parts = vec![format!("{}={}", self.name, self.value)];
        if !self.domain.is_empty() {
            parts.push(format!("Domain={}", self.domain));
        }
        let path = if self.path.is_empty() { "/" } else { &self.path };
        parts.push(format!("Path={path}"));
        if self.secure {
            parts.push("Secure".to_string());
        }
        if self.expires > 0 {
            match UNIX_EPOCH.checked_add(Duration::from_secs(self.expires)) {
                Some(time) => parts.push(format!("Expires={}", httpdate::fmt_http_date(time))),
                None => warn!(
                    domain = %self.domain,
                    name = %self.name,
                    expires = self.expires,
                    "cookie expiry overflows, keeping it as a session cookie"
                ),
            }
        }
        parts.join("; ")
    }

    /// Origin used to register the cookie when no request URL is given.
    fn origin(&self) -> Option<Url> {
        let domain = self.domain.strip_prefix('.').unwrap_or(&self.domain);
        if domain.is_empty() {
            return None;
        }
        let scheme = if self.secure { "https" } else { "http" };
        let path = if self.path.starts_with('/') { self.path.as_str() } else { "/" };
        Url::parse(&format!("{scheme}://{domain}{path}")).ok()
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("domain", &self.domain)
            .field("tailmatch", &self.tailmatch)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Errors while loading cookie files.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// The file or directory could not be read.
    #[error("failed to read cookies from {path}: {source}")]
    Io {
        /// File or directory being read.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The directory holds no readable cookie file.
    #[error("no cookie file found in {dir}")]
    NoCookieFile {
        /// Directory that was scanned.
        dir: PathBuf,
    },
}

/// Cookies parsed from one file plus diagnostics for skipped lines.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Cookies that passed the domain filter.
    pub cookies: Vec<Cookie>,
    /// Skipped lines as (1-based line number, reason).
    pub warnings: Vec<(usize, String)>,
}

/// Parses a Netscape cookie file.
///
/// Fields are `domain`, `tailmatch`, `path`, `secure`, `expires`, `name`,
/// `value`. Flags are true only when spelled `TRUE`; an unreadable expiry is
/// treated as a session cookie. With `domain_filter`, only cookies whose
/// domain contains it are kept.
///
/// # Errors
///
/// Returns [`CookieError::Io`] when reading fails.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(
    reader: impl BufRead,
    domain_filter: Option<&str>,
) -> Result<ParseResult, CookieError> {
    let mut result = ParseResult::default();

    for (idx, line) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line.map_err(|source| CookieError::Io {
            path: PathBuf::new(),
            source,
        })?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 {
            debug!(line = line_number, fields = fields.len(), "skipping cookie line");
            result.warnings.push((
                line_number,
                format!("expected 7 TAB-separated fields, found {}", fields.len()),
            ));
            continue;
        }
        if fields[5].is_empty() {
            result
                .warnings
                .push((line_number, "cookie name field is empty".to_string()));
            continue;
        }

        let cookie = Cookie {
            domain: fields[0].to_string(),
            tailmatch: fields[1] == "TRUE",
            path: fields[2].to_string(),
            secure: fields[3] == "TRUE",
            expires: fields[4].parse::<i64>().map_or(0, |secs| secs.max(0).unsigned_abs()),
            name: fields[5].to_string(),
            value: fields[6].to_string(),
        };

        if let Some(filter) = domain_filter
            && !filter.is_empty()
            && !cookie.domain.contains(filter)
        {
            trace!(domain = %cookie.domain, "cookie filtered out by domain");
            continue;
        }
        trace!(line = line_number, domain = %cookie.domain, name = %cookie.name, "parsed cookie");
        result.cookies.push(cookie);
    }

    Ok(result)
}

/// Parses the cookie file at `path`.
///
/// # Errors
///
/// Returns [`CookieError::Io`] when the file cannot be opened or read.
pub fn load_cookies_from_file(
    path: &Path,
    domain_filter: Option<&str>,
) -> Result<ParseResult, CookieError> {
    let file = File::open(path).map_err(|source| CookieError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_netscape_cookies(BufReader::new(file), domain_filter).map_err(|error| match error {
        CookieError::Io { source, .. } => CookieError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

/// Loads the newest UUID-named `*.txt` cookie file in `dir`.
///
/// Files are tried newest first; the first one that can be read wins.
/// Returns its path with the parsed cookies.
///
/// # Errors
///
/// Returns [`CookieError::Io`] when `dir` cannot be listed, or
/// [`CookieError::NoCookieFile`] when no candidate could be read.
pub fn load_cookies_from_directory(
    dir: &Path,
    domain_filter: Option<&str>,
) -> Result<(PathBuf, ParseResult), CookieError> {
    let entries = std::fs::read_dir(dir).map_err(|source| CookieError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut candidates: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| COOKIE_FILE_NAME_PATTERN.is_match(name))
        })
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            metadata
                .is_file()
                .then(|| (metadata.modified().unwrap_or(UNIX_EPOCH), entry.path()))
        })
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, path) in candidates {
        match load_cookies_from_file(&path, domain_filter) {
            Ok(result) => {
                debug!(path = %path.display(), cookies = result.cookies.len(), "loaded cookie file");
                return Ok((path, result));
            }
            Err(error) => warn!(error = %error, "skipping unreadable cookie file"),
        }
    }
    Err(CookieError::NoCookieFile {
        dir: dir.to_path_buf(),
    })
}

/// Cookie jar shared between the caller and the HTTP transport.
#[derive(Clone, Default)]
pub struct CookieJar {
    jar: Arc<Jar>,
}

impl CookieJar {
    /// Creates an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store handed to `reqwest::ClientBuilder::cookie_provider`.
    #[must_use]
    pub fn store(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }

    /// Adds cookies scoped by their own domain. Returns how many were added.
    pub fn add_cookies(&self, cookies: &[Cookie]) -> usize {
        let mut added = 0;
        for cookie in cookies {
            let Some(origin) = cookie.origin() else {
                warn!(name = %cookie.name, "skipping cookie without a usable domain");
                continue;
            };
            self.jar.add_cookie_str(&cookie.to_set_cookie(), &origin);
            added += 1;
        }
        debug!(added, "cookies added to jar");
        added
    }

    /// Adds cookies as if `url` had set them.
    pub fn set_cookies(&self, cookies: &[Cookie], url: &Url) {
        for cookie in cookies {
            self.jar.add_cookie_str(&cookie.to_set_cookie(), url);
        }
    }

    /// Name/value pairs the jar would send to `url`.
    #[must_use]
    pub fn get_cookies(&self, url: &Url) -> Vec<(String, String)> {
        let Some(header) = self.jar.cookies(url) else {
            return Vec::new();
        };
        header
            .to_str()
            .unwrap_or_default()
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }

    /// Logs the names of the cookies sent to `url`.
    pub fn dump(&self, url: &Url) {
        let names: Vec<String> = self.get_cookies(url).into_iter().map(|(name, _)| name).collect();
        trace!(url = %url, cookies = ?names, "cookies for URL");
    }
}

impl fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieJar").finish_non_exhaustive()
    }
}
