use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("no platform data directory for the score database")]
    NoDataDir,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// An update targeted a row that is gone.
    #[error("row not found")]
    NotFound,

    /// A schema step failed, or a stored value no longer fits the schema.
    #[error("schema: {0}")]
    Migration(String),

    /// Bad JSON in a record or group column.
    #[error("json column: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("stored uuid: {0}")]
    Uuid(#[from] uuid::Error),
}

impl From<StoreError> for streak_shared::SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound(err.to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
