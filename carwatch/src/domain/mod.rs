//! Domain model: identifiers, filter criteria, listings and dedup state.

pub mod criteria;
pub mod filter;
pub mod ids;
pub mod listing;
pub mod notification;
pub mod seen;

pub use criteria::{CriteriaPatch, FieldPatch, FilterCriteria, ListPatch};
pub use filter::{FilterDefinition, FilterSnapshot, FilterState};
pub use ids::{FilterId, UserId};
pub use listing::Listing;
pub use notification::{ListingPayload, Notification};
pub use seen::SeenSet;
