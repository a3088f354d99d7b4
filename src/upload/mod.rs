mod executor;
mod preview;
mod progress;
mod queue;
mod types;
mod validator;

pub use executor::Uploader;
pub use preview::PreviewRegistry;
pub use queue::UploadQueue;
pub use types::{
    CandidateFile, PersistedAttachment, TaskId, TaskState, UploadEvent, UploadTask,
};
pub use validator::{validate, Constraints, RejectReason, Rejection, Validation, DEFAULT_MAX_SIZE_BYTES};
