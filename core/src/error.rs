use std::path::PathBuf;

use thiserror::Error;

use crate::MediaId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The key-value engine failed to read or write.
    #[error(transparent)]
    Storage(#[from] sled::Error),

    #[error("failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A row could not be decoded (bad encoding, unreadable bytes).
    #[error("malformed row in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("snapshot file {} does not exist; fetch it before ingesting", .0.display())]
    MissingSnapshot(PathBuf),

    /// The query text produced no searchable tokens.
    #[error("query {0:?} contains no searchable terms")]
    EmptyQuery(String),

    #[error("stem {0:?} is empty or starts with a reserved key prefix")]
    ReservedStem(String),

    /// The store references data that is not there. Never recovered from.
    #[error("index store is corrupt: {0}")]
    Corrupt(String),

    #[error("media id space exhausted after {0}")]
    MediaIdsExhausted(MediaId),

    #[error("invalid store metadata: {0}")]
    Meta(#[from] serde_json::Error),

    #[error("store format version {found} is not supported (expected {expected})")]
    FormatVersion { found: u32, expected: u32 },

    #[error("an ingestion worker panicked")]
    WorkerPanicked,
}
