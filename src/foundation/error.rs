/// Convenience result type used across the crate.
pub type TesseraResult<T> = Result<T, TesseraError>;

/// Top-level error taxonomy used by public APIs.
///
/// Most failure modes never reach this type: stale or corrupt cache data is
/// regenerated, unrenderable sources fall back to an error tile set, and
/// transient I/O problems are logged and retried on the next natural trigger.
/// Only startup and write paths fail outward.
#[derive(thiserror::Error, Debug)]
pub enum TesseraError {
    /// Errors while starting or driving storage services.
    #[error("storage error: {0}")]
    Storage(String),

    /// Errors while decoding a source image.
    #[error("decode error: {0}")]
    Decode(String),

    /// Errors while reading or writing derived cache data.
    #[error("cache error: {0}")]
    Cache(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TesseraError {
    /// Build a [`TesseraError::Storage`] value.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Build a [`TesseraError::Decode`] value.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Build a [`TesseraError::Cache`] value.
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
