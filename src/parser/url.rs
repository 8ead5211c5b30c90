//! URL validation.

use url::Url;

use super::error::{MAX_URL_LENGTH, ParseError};

/// Validates a URL string and normalizes it.
///
/// # Validation rules:
/// - Must not exceed `MAX_URL_LENGTH` (2000 chars)
/// - Must be parseable by the `url` crate
/// - Must use http or https scheme (no ftp, file, etc.)
/// - Must have a host (domain or IP)
///
/// # Errors
///
/// Returns [`ParseError::UrlTooLong`] or [`ParseError::InvalidUrl`].
pub fn validate_url(raw: &str) -> Result<String, ParseError> {
    if raw.len() > MAX_URL_LENGTH {
        return Err(ParseError::too_long(raw));
    }

    let parsed = Url::parse(raw).map_err(|e| ParseError::malformed(raw, &e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(ParseError::unsupported_scheme(raw, scheme)),
    }

    if parsed.host().is_none() {
        return Err(ParseError::no_host(raw));
    }

    Ok(parsed.to_string())
}
