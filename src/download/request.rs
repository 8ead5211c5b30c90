//! Shapes an [`Entry`] into a [`TransportRequest`].

use bytes::Bytes;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RANGE, REFERER,
    USER_AGENT,
};
use tracing::warn;
use url::Url;
use url::form_urlencoded;

use super::constants::{ACCEPT_LANGUAGE as ACCEPT_LANGUAGE_VALUE, DEFAULT_ACCEPT, FORM_CONTENT_TYPE};
use super::entry::{Entry, Method};
use super::error::DownloadError;
use super::transport::TransportRequest;

/// Parses the entry URL, accepting only `http` and `https`.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidUrl`] otherwise.
pub(crate) fn parse_entry_url(raw: &str) -> Result<Url, DownloadError> {
    let url = Url::parse(raw).map_err(|_| DownloadError::invalid_url(raw))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(DownloadError::invalid_url(raw)),
    }
}

/// Builds the request for the entry's current method.
///
/// GET and HEAD carry parameters (and the pagination parameters) in the query.
/// POST sends `data` as-is when the caller supplied a `Content-Type` header,
/// otherwise the same fields form-encoded.
///
/// # Errors
///
/// Returns [`DownloadError::InvalidUrl`] when the URL cannot be used.
pub(crate) fn build_request(
    entry: &Entry,
    user_agent: &str,
    range: Option<&str>,
) -> Result<TransportRequest, DownloadError> {
    let mut url = parse_entry_url(&entry.url)?;
    let mut headers = base_headers(entry, user_agent);

    if let Some(range) = range
        && let Ok(value) = HeaderValue::from_str(range)
    {
        headers.insert(RANGE, value);
    }

    let fields = request_fields(entry);
    let mut body = None;
    match entry.method {
        Method::Post => {
            let has_content_type = entry
                .headers
                .keys()
                .any(|name| name.eq_ignore_ascii_case("Content-Type"));
            if has_content_type && !entry.data.is_empty() {
                body = Some(entry.data.clone());
            } else {
                let encoded = form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                    .finish();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
                body = Some(Bytes::from(encoded));
            }
        }
        _ => {
            if !fields.is_empty() {
                url.query_pairs_mut()
                    .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            }
        }
    }

    Ok(TransportRequest {
        method: entry.method,
        url,
        headers,
        body,
    })
}

fn base_headers(entry: &Entry, user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if !entry.referer.is_empty() {
        insert_lenient(&mut headers, REFERER, &entry.referer);
    }
    if !user_agent.is_empty() {
        insert_lenient(&mut headers, USER_AGENT, user_agent);
    }

    let accept = entry
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("Accept"))
        .map_or(DEFAULT_ACCEPT, |(_, value)| value.as_str());
    insert_lenient(&mut headers, ACCEPT, accept);
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(ACCEPT_LANGUAGE_VALUE),
    );

    for (name, value) in &entry.headers {
        if name.eq_ignore_ascii_case("Accept") {
            continue;
        }
        match HeaderName::from_bytes(name.as_bytes()) {
            Ok(header_name) => insert_lenient(&mut headers, header_name, value),
            Err(_) => warn!(header = %name, url = %entry.url, "skipping invalid header name"),
        }
    }

    headers
}

fn insert_lenient(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => warn!(header = %name, "skipping header with invalid value"),
    }
}

/// Parameters plus the pagination parameters, when named.
fn request_fields(entry: &Entry) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = entry
        .parameters
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !entry.offset_parameter.is_empty() {
        fields.push((entry.offset_parameter.clone(), entry.offset.to_string()));
    }
    if !entry.count_parameter.is_empty() {
        fields.push((entry.count_parameter.clone(), entry.count.to_string()));
    }
    fields
}

/// `Range` header value for a ranged HEAD.
pub(crate) fn open_range(start: u64) -> String {
    format!("bytes={start}-")
}

/// `Range` header value for a resumed GET of the remaining bytes.
pub(crate) fn closed_range(start: u64, filesize: u64) -> String {
    format!("bytes={start}-{}", filesize.saturating_sub(1))
}
