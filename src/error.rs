use thiserror::Error;

/// I/O errors that can occur when reading originals from remote storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),
}

/// Errors from the local derivative store
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// No entry exists for the key (possibly evicted by a concurrent sweep)
    #[error("Cache entry not found: {key}")]
    NotFound { key: String },

    /// Filesystem operation failed (disk full, permissions, ...)
    #[error("Cache {op} failed for {path}: {message}")]
    Io {
        op: &'static str,
        path: String,
        message: String,
    },
}

impl CacheError {
    pub(crate) fn io(op: &'static str, path: &std::path::Path, err: std::io::Error) -> Self {
        CacheError::Io {
            op,
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors produced while decoding, resizing or encoding an image
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// The original could not be decoded (corrupt or unsupported format)
    #[error("Failed to decode image: {message}")]
    DecodeError { message: String },

    /// The derivative could not be encoded
    #[error("Failed to encode image: {message}")]
    EncodeError { message: String },
}

/// Errors that can occur while serving a derivative request
#[derive(Debug, Clone, Error)]
pub enum ServeError {
    /// Malformed folder or filename (rendered as 404, nothing is touched)
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The original asset does not exist in the origin store
    #[error("Asset not found: {asset}")]
    NotFound { asset: String },

    /// The origin store did not answer in time (retryable)
    #[error("Timed out after {timeout_ms}ms fetching {asset}")]
    OriginTimeout { asset: String, timeout_ms: u64 },

    /// Any other origin store failure
    #[error("Origin error: {0}")]
    Origin(IoError),

    /// The original exists but cannot be decoded; never cached
    #[error("Bad asset: {message}")]
    BadAsset { message: String },

    /// Encoding the derivative failed
    #[error("Encode error: {message}")]
    EncodeError { message: String },

    /// Unexpected failure (e.g. a generation task panicked)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<TransformError> for ServeError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::DecodeError { message } => ServeError::BadAsset { message },
            TransformError::EncodeError { message } => ServeError::EncodeError { message },
        }
    }
}
