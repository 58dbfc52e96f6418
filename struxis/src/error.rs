use std::fmt::{Display, Formatter};

/// The core's error taxonomy. `InsufficientData` is deliberately absent:
/// per its own definition it is not an error, components represent it with
/// `Option::None`/empty `Vec` returns instead of a `Result::Err`.
#[derive(Debug)]
pub enum StructureError {
    InvalidBar(String),
    InvalidSequence(String),
    ConfigurationError(String),
    RepositoryError(String),
    CacheInconsistency(String),
}

impl Display for StructureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBar(msg) => write!(f, "invalid bar: {msg}"),
            Self::InvalidSequence(msg) => write!(f, "invalid sequence: {msg}"),
            Self::ConfigurationError(msg) => write!(f, "configuration error: {msg}"),
            Self::RepositoryError(msg) => write!(f, "repository error: {msg}"),
            Self::CacheInconsistency(msg) => write!(f, "cache inconsistency: {msg}"),
        }
    }
}

impl std::error::Error for StructureError {}

impl From<csv::Error> for StructureError {
    fn from(value: csv::Error) -> Self {
        Self::InvalidBar(format!("csv: {value}"))
    }
}

impl From<chrono::ParseError> for StructureError {
    fn from(value: chrono::ParseError) -> Self {
        Self::InvalidBar(format!("datetime: {value}"))
    }
}
