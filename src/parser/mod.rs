//! Input parsing: URL lists, number-mask templates, CSV batch files and the
//! file names derived from URLs.
//!
//! # Example
//!
//! ```
//! use batch_downloader::parser::{Batch, UrlTemplate};
//!
//! let mut batch = Batch::new("https://example.com/scans/page###.png");
//! batch.last = 3;
//! let items = batch.expand().unwrap();
//! assert_eq!(items[2].url, "https://example.com/scans/page003.png");
//! assert_eq!(items[2].filename, "page003.png");
//! assert!(UrlTemplate::parse("https://example.com/a.png").render(1).ends_with("a.png"));
//! ```

mod error;
mod filename;
mod input;
mod template;
mod url;

pub use error::{MAX_URL_LENGTH, ParseError};
pub use filename::{MAX_FILENAME_LEN, filename_for, filename_from_url, fix_filename, numbered_filename};
pub use input::{Batch, BatchItem, parse_batch_csv, parse_url_list};
pub use template::{DetectedMask, UrlTemplate, detect_number_mask, number_range};
pub use url::validate_url;
