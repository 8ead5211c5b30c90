//! Numbered URL templates.
//!
//! A run of `#` in a URL is a number mask: `img###.jpg` expands to
//! `img001.jpg`, `img002.jpg`, ... The width of the run is the minimum number
//! of digits; larger numbers are written in full.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use super::error::ParseError;

#[allow(clippy::expect_used)]
static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("number regex is valid")); // Static pattern, safe to panic

/// Numbers outside this range are not considered page counters.
const DETECTABLE_NUMBERS: std::ops::RangeInclusive<u32> = 2..=999;

/// A URL (or referer) that may contain a `#` number mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    raw: String,
    /// Byte range of the first `#` run.
    mask: Option<(usize, usize)>,
}

impl UrlTemplate {
    /// Parses `raw`, locating the first run of `#`.
    #[must_use]
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let mask = raw.find('#').map(|start| {
            let len = raw[start..].chars().take_while(|&c| c == '#').count();
            (start, start + len)
        });
        Self { raw, mask }
    }

    /// The template text, mask included.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the template has a mask.
    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Number of `#` in the mask, 0 without one.
    #[must_use]
    pub fn mask_width(&self) -> usize {
        self.mask.map_or(0, |(start, end)| end - start)
    }

    /// Substitutes `number`, zero-padded to the mask width.
    #[must_use]
    pub fn render(&self, number: u32) -> String {
        match self.mask {
            Some((start, end)) => format!(
                "{}{:0width$}{}",
                &self.raw[..start],
                number,
                &self.raw[end..],
                width = end - start
            ),
            None => self.raw.clone(),
        }
    }

    /// Whether the mask sits in the last path segment.
    ///
    /// When it does not, every expanded URL ends with the same file name.
    #[must_use]
    pub fn masks_file_name(&self) -> bool {
        let Some((start, _)) = self.mask else {
            return false;
        };
        let path_end = self.raw.find('?').unwrap_or(self.raw.len());
        let last_slash = self.raw[..path_end].rfind('/').unwrap_or(0);
        start > last_slash && start < path_end
    }
}

/// Numbers `first..=last` by `step`.
///
/// # Errors
///
/// Returns [`ParseError::InvalidRange`] for a zero step or `first > last`.
pub fn number_range(first: u32, last: u32, step: u32) -> Result<Vec<u32>, ParseError> {
    if step == 0 {
        return Err(ParseError::zero_step(first, last));
    }
    if first > last {
        return Err(ParseError::reversed_range(first, last, step));
    }
    Ok((first..=last).step_by(step as usize).collect())
}

/// Result of [`detect_number_mask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedMask {
    /// The URL with the detected number replaced by `#`s.
    pub template: String,
    /// The detected number, used as the last page.
    pub last: u32,
}

/// Turns the most likely page counter in `url` into a mask.
///
/// Candidates are numbers between 2 and 999; the longest wins, the first one
/// on ties. URLs that already contain `#` are left alone.
#[must_use]
pub fn detect_number_mask(url: &str) -> Option<DetectedMask> {
    if url.contains('#') {
        return None;
    }

    let mut best: Option<(usize, usize, u32)> = None;
    for found in NUMBER_PATTERN.find_iter(url) {
        let Ok(number) = found.as_str().parse::<u32>() else {
            continue;
        };
        if !DETECTABLE_NUMBERS.contains(&number) {
            continue;
        }
        if best.is_none_or(|(start, end, _)| found.len() > end - start) {
            best = Some((found.start(), found.end(), number));
        }
    }

    let (start, end, last) = best?;
    let template = format!("{}{}{}", &url[..start], "#".repeat(end - start), &url[end..]);
    info!(url, last, "detected numbered files in URL");
    debug!(template = %template, "number mask");
    Some(DetectedMask { template, last })
}
