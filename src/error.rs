use thiserror::Error;

/// Terminal failure of a single upload task.
///
/// Every variant is scoped to the task it occurred on; a failed task
/// never affects its siblings and nothing here propagates as a panic.
/// Validation rejections are not errors, see
/// [`RejectReason`](crate::upload::RejectReason).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// The request never produced a response (connect failure, broken
    /// stream, timeout).
    #[error("request failed: {0}")]
    Transport(String),

    /// The endpoint answered with a non-2xx status.
    #[error("upload failed with status {0}")]
    Status(u16),

    /// A 2xx response carrying `success: false`.
    #[error("server rejected upload: {0}")]
    Server(String),

    /// A 2xx response whose body could not be interpreted.
    #[error("failed to parse upload response: {0}")]
    Parse(String),
}
