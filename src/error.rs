//! Error types for blobway

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Codes either backend uses to say "the target does not exist".
const NOT_FOUND_CODES: &[&str] = &[
    "NoSuchBucket",
    "NoSuchKey",
    "NotFound",
    "ContainerNotFound",
    "BlobNotFound",
];

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure reported by the storage backend, carried verbatim.
    #[error("Backend error{}: {message}", code_suffix(.code))]
    Backend {
        code: Option<String>,
        message: String,
    },
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(" ({c})"))
        .unwrap_or_default()
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Error::Backend {
            code: None,
            message: msg.into(),
        }
    }

    pub fn backend_code(code: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Backend {
            code: Some(code.into()),
            message: msg.into(),
        }
    }

    /// Backend error code, if the backend supplied one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Backend { code, .. } => code.as_deref(),
            Error::Configuration(_) => None,
        }
    }

    /// Whether the backend reported that the addressed container or blob
    /// does not exist.
    pub fn is_not_found(&self) -> bool {
        self.code().is_some_and(|code| NOT_FOUND_CODES.contains(&code))
    }
}
