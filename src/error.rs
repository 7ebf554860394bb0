//! Error taxonomy for the receipt system core.
//!
//! `Validation` and `NotFound` abort the operation with no state change.
//! `Storage` means the in-memory mutation was applied but the local write
//! failed. `RemoteSync` is only ever returned from the explicit manual sync;
//! best-effort pushes log it and swallow it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing user input; the operation was aborted.
    #[error("validation: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A duplicate trigger arrived while the same logical operation was
    /// still in flight; the duplicate is ignored.
    #[error("{0} operation already in progress")]
    Busy(&'static str),

    /// Local persistence failed. The in-memory state already carries the
    /// mutation; callers should warn the user.
    #[error("storage: {0}")]
    Storage(String),

    /// The remote adapter call failed.
    #[error("remote sync: {0}")]
    RemoteSync(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(format!("serialize: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
