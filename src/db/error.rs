/// Outcomes of Persistence Store operations.
///
/// `NotFound` and `NoAffect` are control-flow signals ("nothing to do", "already
/// done"), not failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found in the database")]
    NotFound,

    #[error("operation did not affect anything in the database")]
    NoAffect,

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("invalid guild configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("internal database error: {0}")]
    Internal(#[from] rusqlite::Error),

    #[error("database task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    pub fn is_no_affect(&self) -> bool {
        matches!(self, StoreError::NoAffect)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lifts a `NotFound` into `Ok(None)`.
pub trait OptionalExt<T> {
    fn optional(self) -> StoreResult<Option<T>>;
}

impl<T> OptionalExt<T> for StoreResult<T> {
    fn optional(self) -> StoreResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Treats `NoAffect` as success, for idempotent inserts.
pub trait IdempotentExt {
    fn or_no_affect(self) -> StoreResult<bool>;
}

impl IdempotentExt for StoreResult<()> {
    /// Returns `true` when a row was written, `false` when it already existed.
    fn or_no_affect(self) -> StoreResult<bool> {
        match self {
            Ok(()) => Ok(true),
            Err(StoreError::NoAffect) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
