use std::io;

use thiserror::Error;

use crate::types::UpdateState;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("wifi link is not connected")]
    NotConnected,
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to write request: {0}")]
    Write(#[source] io::Error),
    #[error("no complete response within {0} ms")]
    Timeout(u64),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("incomplete response: {0}")]
    IncompleteResponse(String),
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct StorageError(pub String);

#[derive(Debug, Error)]
#[error("{0}")]
pub struct RadioError(pub String);

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update already in progress ({})", .0.as_str())]
    Busy(UpdateState),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("server returned HTTP {0}")]
    UnexpectedStatus(u16),
    #[error("manifest is not valid JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("manifest is missing required field `{0}`")]
    ManifestIncomplete(&'static str),
    #[error("invalid firmware size: {0}")]
    InvalidSize(i64),
    #[error("failed to open update storage: {0}")]
    StorageOpen(#[source] StorageError),
    #[error("partial storage write: expected {expected} bytes, wrote {actual}")]
    StorageWrite { expected: usize, actual: usize },
    #[error("failed to commit update storage: {0}")]
    StorageCommit(#[source] StorageError),
    #[error("download stalled: no data for {0} ms")]
    Stalled(u64),
    #[error("download exceeded {0} ms")]
    Timeout(u64),
    #[error("connection closed after {written}/{total} bytes")]
    Incomplete { written: u32, total: u32 },
    #[error("sha256 mismatch (expected {expected}, got {actual})")]
    DigestMismatch { expected: String, actual: String },
}
