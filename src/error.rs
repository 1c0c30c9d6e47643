use camino::Utf8PathBuf;
use thiserror::Error;

use crate::key::KeyLike;

pub use anyhow::Error as RuntimeError;

/// Errors raised while building a [`Key`](crate::Key).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid key expression: {0:?}")]
    InvalidExpression(String),

    #[error("Conflict: {field} = {given:?} argument vs. {parsed:?} from {origin}")]
    Conflict {
        field: &'static str,
        given: String,
        parsed: String,
        origin: String,
    },
}

fn list_keys(keys: &[KeyLike]) -> String {
    keys.iter()
        .map(|key| format!("{key:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("Key {0} already exists")]
    KeyExists(KeyLike),

    /// Every key that failed to resolve in one validation pass.
    #[error("required keys ({}) not defined", list_keys(.0))]
    MissingKey(Vec<KeyLike>),

    #[error("Key {0} not found")]
    NotFound(KeyLike),

    #[error("Computing {key}:\n{source}")]
    Computation {
        key: KeyLike,
        #[source]
        source: RuntimeError,
    },

    #[error("Generator '{name}':\n{source}")]
    Generator {
        name: String,
        #[source]
        source: RuntimeError,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Usage(String),
}

impl Error {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }

    /// A key was absent, or present when it should not have been. The
    /// insertion queue retries items that fail this way.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            Error::MissingKey(_) | Error::NotFound(_) | Error::KeyExists(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Couldn't hash the arguments.\n{0}")]
    Arguments(#[from] serde_json::Error),

    #[error("Couldn't access cache file {path}.\n{source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't write cached value to {path}.\n{source}")]
    Encode {
        path: Utf8PathBuf,
        #[source]
        source: ciborium::ser::Error<std::io::Error>,
    },

    #[error("Couldn't read cached value from {path}.\n{source}")]
    Decode {
        path: Utf8PathBuf,
        #[source]
        source: ciborium::de::Error<std::io::Error>,
    },

    #[error("Function '{name}':\n{source}")]
    Call {
        name: String,
        #[source]
        source: RuntimeError,
    },
}
