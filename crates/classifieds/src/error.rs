use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("empty page")]
    EmptyPage,
    #[error("search form not found")]
    FormNotFound,
    #[error("missing photo or listing fields")]
    MissingFields,
}
