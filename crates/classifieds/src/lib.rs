//! Page extraction for the ss.com car classifieds.
//!
//! The crate is transport-agnostic: callers fetch HTML however they like and
//! hand it to the parsers here.
//!
//! - [`search`]: reads the search form of a brand category and fills it from a
//!   [`SearchQuery`], then extracts result rows from the submitted page.
//! - [`detail`]: turns a listing page into a photo plus an HTML caption.

pub mod detail;
pub mod error;
pub mod search;

pub use detail::{ListingDetail, parse_detail};
pub use error::ParseError;
pub use search::{ListingRow, SearchForm, SearchQuery, parse_results};

/// Default site root used to resolve relative listing links.
pub const DEFAULT_BASE_URL: &str = "https://www.ss.com";

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
