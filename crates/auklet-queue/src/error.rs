use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The backend does not implement this operation (the CSV queue only
    /// supports select/release/count).
    #[error("operation not supported by this queue backend: {0}")]
    Unsupported(&'static str),

    #[error("malformed queue input {path}: {message}")]
    Malformed { path: String, message: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("internal queue error: {0}")]
    Internal(String),
}
