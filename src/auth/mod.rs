//! Cookie management.
//!
//! Cookies are loaded from Netscape-format files, as exported by browsers or
//! browser extensions, into a [`CookieJar`] shared with the HTTP transport.

mod cookies;

pub use cookies::{
    Cookie, CookieError, CookieJar, ParseResult, load_cookies_from_directory,
    load_cookies_from_file, parse_netscape_cookies,
};
