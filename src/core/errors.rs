use thiserror::Error;

#[derive(Debug, Error)]
pub enum WrongoDBError {
    #[error("document validation error: {0}")]
    DocumentValidation(#[from] DocumentValidationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bson serialization error: {0}")]
    Bson(#[from] bson::ser::Error),

    #[error("bson deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid transaction state: {0}")]
    InvalidTransactionState(String),

    #[error("transaction already active")]
    TransactionAlreadyActive,

    #[error("no active transaction")]
    NoActiveTransaction,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    #[error("index type mismatch: {0}")]
    IndexTypeMismatch(#[from] IndexError),

    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("maximum nesting depth exceeded: {0}")]
    MaxNestingExceeded(String),

    /// A prior operation left the table in a state where further mutation
    /// would corrupt it (e.g. primary write succeeded but an index update
    /// failed). Set on `Table`'s fatal flag; every mutating method checks it
    /// first and returns this instead of attempting the operation.
    #[error("table is in a fatal state: {0}")]
    Fatal(String),
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DocumentValidationError(pub String);

#[derive(Debug, Error)]
#[error("{0}")]
pub struct StorageError(pub String);

#[derive(Debug, Error)]
#[error("{0}")]
pub struct QueryError(pub String);

#[derive(Debug, Error)]
#[error("{0}")]
pub struct IndexError(pub String);
