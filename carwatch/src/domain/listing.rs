//! Listings as returned by the listing source.

use classifieds_parser::ListingRow;
use serde::{Deserialize, Serialize};

/// One row of a search result: what the source returns per listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Listing {
    pub title: String,
    pub link: String,
}

impl Listing {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
        }
    }

    /// Seen-set key. Title and link together, so an edited listing that
    /// keeps its link is reported again.
    pub fn dedup_key(&self) -> String {
        format!("{}: {}", self.title, self.link)
    }
}

impl From<ListingRow> for Listing {
    fn from(row: ListingRow) -> Self {
        Self {
            title: row.title,
            link: row.link,
        }
    }
}
