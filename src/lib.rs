//! File-upload orchestration engine.
//!
//! Takes a caller-selected set of files, validates them against
//! configurable constraints, uploads them concurrently to a remote
//! endpoint, and reports smooth, monotonically increasing per-file
//! progress by fusing a synthetic ramp with real transfer events.
//! Per-file failures never abort sibling uploads, and removal of a task
//! mid-flight aborts its request without disturbing the rest of the
//! batch.
//!
//! The hosting form drives everything through [`UploadEngine`]:
//!
//! ```no_run
//! use upload_engine::{CandidateFile, Constraints, UploadEngine};
//!
//! # async fn demo() {
//! let (engine, events) = UploadEngine::new(
//!     "https://example.com/api/upload",
//!     Constraints {
//!         max_files: Some(5),
//!         ..Constraints::default()
//!     },
//! );
//!
//! engine.add_files(vec![CandidateFile::new(
//!     "report.pdf",
//!     "application/pdf",
//!     std::fs::read("report.pdf").unwrap(),
//! )]);
//! engine.upload();
//! engine.wait_idle().await;
//!
//! for event in events.try_iter() {
//!     println!("{event:?}");
//! }
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod upload;
pub mod utils;

pub use engine::UploadEngine;
pub use error::UploadError;
pub use upload::{
    CandidateFile, Constraints, PersistedAttachment, RejectReason, Rejection, TaskId, TaskState,
    UploadEvent, UploadTask,
};
