// Error taxonomy for a single upload attempt. Every variant is terminal:
// nothing is retried, the CLI reports it and exits non-zero.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("input file does not exist: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("thumbnail file does not exist: {}", .0.display())]
    ThumbnailNotFound(PathBuf),

    #[error("failed to read last upload timestamp from {}: {reason}", .path.display())]
    RateStateRead { path: PathBuf, reason: String },

    #[error("streaming error: {0}")]
    Streaming(String),

    /// The HTTP client stopped reading the body before it was complete.
    /// Only a consequence of some other failure, never the cause.
    #[error("request body was abandoned before it was fully sent")]
    BodyAborted,

    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("failed to decode response: {0}")]
    MalformedResponse(String),

    #[error("telegram API error: {0}")]
    RemoteRejected(String),

    /// The remote upload went through but the cool-down clock could not
    /// be saved.
    #[error("uploaded as message {message_id} but failed to write last upload timestamp to {}: {source}", .path.display())]
    StateWriteFailed {
        message_id: i64,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, UploadError>;
