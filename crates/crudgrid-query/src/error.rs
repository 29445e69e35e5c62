use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A user-facing problem with one field's filter expression.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{field}: {message}")]
pub struct FilterError {
    pub field: String,
    pub message: String,
}

impl FilterError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid filter: {}", join(.0))]
    Filter(Vec<FilterError>),
    #[error("malformed query document: {0}")]
    Malformed(String),
    #[error("invalid regex pattern: {0}")]
    Regex(#[from] regex::Error),
}

fn join(errors: &[FilterError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
