//! Pending notifications on a user's dispatch queue.

use classifieds_parser::ListingDetail;
use serde::{Deserialize, Serialize};

use super::{FilterId, UserId};

/// What gets sent: a photo and an HTML caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingPayload {
    pub image: String,
    pub caption: String,
}

impl From<ListingDetail> for ListingPayload {
    fn from(detail: ListingDetail) -> Self {
        Self {
            image: detail.image,
            caption: detail.message,
        }
    }
}

/// A payload addressed to a user. Lives only on the dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub destination: UserId,
    /// Filter that discovered the listing.
    pub filter_id: FilterId,
    /// Listing page, for logging.
    pub link: String,
    pub payload: ListingPayload,
}
