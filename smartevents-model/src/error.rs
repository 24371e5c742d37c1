use std::fmt::{self, Display};

/// Errors produced by model parsing and validation routines.
#[derive(Debug)]
pub enum ModelError {
    UnknownStatus(String),
    UnknownResourceType(String),
    UnknownProcessorType(String),
    UnknownConnectorType(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownStatus(raw) => {
                write!(f, "unknown managed resource status: {raw}")
            }
            ModelError::UnknownResourceType(raw) => {
                write!(f, "unknown resource type: {raw}")
            }
            ModelError::UnknownProcessorType(raw) => {
                write!(f, "unknown processor type: {raw}")
            }
            ModelError::UnknownConnectorType(raw) => {
                write!(f, "unknown connector type: {raw}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
