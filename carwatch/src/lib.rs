//! Watches a car classifieds site for many users' search filters and
//! forwards new listings to each user's Telegram chat.

pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod utils;

pub use error::{Error, Result};
