use thiserror::Error;

use crate::convert::ConversionError;

#[derive(Error, Debug)]
pub enum AdHocError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Conversion error for parameter '{parameter}'{}: {source}", at(.position))]
    Conversion {
        parameter: String,
        position: Option<usize>,
        #[source]
        source: ConversionError,
    },
    #[error("Evaluation error in {target}: {message}")]
    Evaluation { target: String, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, AdHocError>;

fn at(position: &Option<usize>) -> String {
    match position {
        Some(p) => format!(" at position {p}"),
        None => String::new(),
    }
}

impl AdHocError {
    pub fn evaluation(target: impl Into<String>, message: impl ToString) -> Self {
        Self::Evaluation {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Attaches the 1-based filter/column position to a conversion failure.
    /// Every other variant passes through untouched.
    pub fn at_position(self, position: usize) -> Self {
        match self {
            Self::Conversion {
                parameter,
                position: None,
                source,
            } => Self::Conversion {
                parameter,
                position: Some(position),
                source,
            },
            other => other,
        }
    }
}

// Helper conversions
impl From<rusqlite::Error> for AdHocError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<serde_json::Error> for AdHocError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
impl From<::config::ConfigError> for AdHocError {
    fn from(e: ::config::ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}
