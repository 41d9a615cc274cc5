use ulid::Ulid;

/// A store read could not be executed. Never used for "nothing configured".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable,
    #[error("could not read {table}: {detail}")]
    Read { table: &'static str, detail: String },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("hour allocation must sum to 100 (got {total:.2})")]
    InvalidAllocation { total: f64 },
    #[error("invalid daily limit: {0}")]
    InvalidDailyLimit(i64),
    #[error("invalid party size: {0}")]
    InvalidPartySize(i64),
    #[error("invalid hour set: {0}")]
    InvalidHourSet(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}
