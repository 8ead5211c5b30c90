//! Destination file names derived from URLs.

use tracing::trace;

use super::template::UrlTemplate;

/// Maximum length of a generated file name, in characters.
pub const MAX_FILENAME_LEN: usize = 100;

/// Characters replaced by a space in file names.
const INVALID_CHARS: &[char] = &['\n', '\r', '\\', '/', ':', '*', '$', '?', '"', '<', '>', '|'];

/// Extension used when a numbered name has none.
const FALLBACK_EXTENSION: &str = "jpg";

/// Makes `name` safe to use as a file name.
///
/// Invalid characters become spaces, trailing dots are dropped, runs of
/// spaces collapse, and long names are cut at the last space within
/// [`MAX_FILENAME_LEN`] characters.
#[must_use]
pub fn fix_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if INVALID_CHARS.contains(&c) || c.is_control() || u32::from(c) > 1000 {
                ' '
            } else {
                c
            }
        })
        .collect();
    let without_dots = replaced.trim_end_matches('.');

    let mut collapsed = String::with_capacity(without_dots.len());
    for c in without_dots.chars() {
        if c == ' ' && collapsed.ends_with(' ') {
            continue;
        }
        collapsed.push(c);
    }

    if collapsed.chars().count() > MAX_FILENAME_LEN {
        let head: String = collapsed.chars().take(MAX_FILENAME_LEN + 1).collect();
        collapsed = match head.rfind(' ') {
            Some(pos) => head[..pos].to_string(),
            None => head.chars().take(MAX_FILENAME_LEN).collect(),
        };
    }
    collapsed.trim().to_string()
}

/// Last path segment of `url`, without query or fragment, percent-decoded
/// and sanitized. Empty when the URL ends with `/`.
#[must_use]
pub fn filename_from_url(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let path = &url[..end];
    let basename = path.rsplit('/').next().unwrap_or(path);
    let decoded = urlencoding::decode(basename)
        .map_or_else(|_| basename.to_string(), std::borrow::Cow::into_owned);
    fix_filename(&decoded)
}

/// Inserts the zero-padded `number` before the extension of `name`.
///
/// A name without extension becomes `{number}.jpg`.
#[must_use]
pub fn numbered_filename(name: &str, number: u32, width: usize) -> String {
    match name.rsplit_once('.') {
        Some((base, ext)) if !ext.is_empty() => format!("{base}{number:0width$}.{ext}"),
        _ => format!("{number:0width$}.{FALLBACK_EXTENSION}"),
    }
}

/// File name for the URL expanded from `template` with `number`.
///
/// When the mask is not in the file name, every expanded URL would share it,
/// so the number is appended to keep the files apart.
#[must_use]
pub fn filename_for(template: &UrlTemplate, url: &str, number: u32) -> String {
    let name = filename_from_url(url);
    if template.is_masked() && !template.masks_file_name() {
        let numbered = numbered_filename(&name, number, template.mask_width());
        trace!(url, name = %numbered, "numbered static file name");
        return numbered;
    }
    name
}
