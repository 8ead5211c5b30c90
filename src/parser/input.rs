//! URL lists and CSV batch files.

use tracing::{debug, warn};

use super::error::ParseError;
use super::filename::filename_for;
use super::template::{UrlTemplate, number_range};

/// One line of work: a URL template with its numbering and options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// URL, possibly with a `#` mask.
    pub url: UrlTemplate,
    /// Referer, which may use the same mask.
    pub referer: UrlTemplate,
    /// Sub-directory of the output directory.
    pub directory: Option<String>,
    /// First number.
    pub first: u32,
    /// Last number, inclusive.
    pub last: u32,
    /// Increment.
    pub step: u32,
}

/// A URL ready to be queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// Mask value used for this item.
    pub number: u32,
    /// Expanded URL.
    pub url: String,
    /// Expanded referer, empty when none.
    pub referer: String,
    /// Destination file name.
    pub filename: String,
}

impl Batch {
    /// Creates a batch for `url` numbered 1 to 1.
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self {
            url: UrlTemplate::parse(url),
            referer: UrlTemplate::parse(""),
            directory: None,
            first: 1,
            last: 1,
            step: 1,
        }
    }

    /// Expands the template into concrete URLs.
    ///
    /// An unmasked URL yields a single item.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidRange`] when the range cannot be walked.
    pub fn expand(&self) -> Result<Vec<BatchItem>, ParseError> {
        let numbers = if self.url.is_masked() {
            number_range(self.first, self.last, self.step)?
        } else {
            vec![self.first]
        };

        let items: Vec<BatchItem> = numbers
            .into_iter()
            .map(|number| {
                let url = self.url.render(number);
                BatchItem {
                    number,
                    filename: filename_for(&self.url, &url, number),
                    referer: self.referer.render(number),
                    url,
                }
            })
            .collect();
        debug!(template = self.url.as_str(), count = items.len(), "batch expanded");
        Ok(items)
    }
}

/// Reads one URL per line. Blank lines and lines starting with `#` are skipped.
#[must_use]
pub fn parse_url_list(input: &str) -> Vec<Batch> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(Batch::new)
        .collect()
}

/// Columns a batch file may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Url,
    Referer,
    Directory,
    First,
    Last,
    Step,
}

impl Column {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "url" => Some(Self::Url),
            "referer" => Some(Self::Referer),
            "directory" => Some(Self::Directory),
            "first" => Some(Self::First),
            "last" => Some(Self::Last),
            "step" => Some(Self::Step),
            _ => None,
        }
    }
}

/// Parses a CSV batch file.
///
/// The first line names the columns (`url`, `referer`, `directory`, `first`,
/// `last`, `step`); only `url` is required. Values may be double-quoted to
/// contain commas. Missing numbers default to 1.
///
/// # Errors
///
/// Returns [`ParseError::InvalidBatch`] for an unknown or missing column, a
/// row with the wrong number of fields, or a number that does not parse.
pub fn parse_batch_csv(input: &str) -> Result<Vec<Batch>, ParseError> {
    let mut lines = input.lines().enumerate();
    let Some((_, header)) = lines.next() else {
        return Err(ParseError::batch(1, "missing header line"));
    };

    let columns = header
        .trim()
        .split(',')
        .map(|name| {
            Column::parse(name.trim())
                .ok_or_else(|| ParseError::batch(1, format!("unknown column '{}'", name.trim())))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if !columns.contains(&Column::Url) {
        return Err(ParseError::batch(1, "the url column is required"));
    }

    let mut batches = Vec::new();
    for (idx, line) in lines {
        let line_number = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields = split_csv_line(line);
        if fields.len() != columns.len() {
            warn!(line = line_number, "wrong number of fields in batch file");
            return Err(ParseError::batch(
                line_number,
                format!("expected {} fields, found {}", columns.len(), fields.len()),
            ));
        }

        let mut batch = Batch::new("");
        for (column, value) in columns.iter().zip(fields) {
            match column {
                Column::Url => batch.url = UrlTemplate::parse(value.trim()),
                Column::Referer => batch.referer = UrlTemplate::parse(value.trim()),
                Column::Directory => {
                    let value = value.trim();
                    batch.directory = (!value.is_empty()).then(|| value.to_string());
                }
                Column::First => batch.first = parse_number(&value, line_number, "first")?,
                Column::Last => batch.last = parse_number(&value, line_number, "last")?,
                Column::Step => batch.step = parse_number(&value, line_number, "step")?,
            }
        }
        batches.push(batch);
    }

    debug!(batches = batches.len(), "batch file parsed");
    Ok(batches)
}

fn parse_number(value: &str, line: usize, column: &str) -> Result<u32, ParseError> {
    value
        .trim()
        .parse()
        .map_err(|_| ParseError::batch(line, format!("{column} must be a non-negative integer, got '{value}'")))
}

/// Splits on commas outside double quotes; quotes are removed.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut value = String::new();
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut value)),
            _ => value.push(c),
        }
    }
    fields.push(value);
    fields
}
