use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::UploadError;
use crate::upload::validator::RejectReason;

/// Engine-assigned identifier for one upload task.
///
/// Assigned from a monotonically increasing counter at enqueue time, so
/// two byte-identical selections still get distinct identities and a
/// removed id can never be confused with a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A caller-selected file waiting to be uploaded.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub payload: Bytes,
}

impl CandidateFile {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        let payload = payload.into();
        Self {
            name: name.into(),
            size_bytes: payload.len() as u64,
            mime_type: mime_type.into(),
            payload,
        }
    }
}

/// Where a task is in its lifecycle.
///
/// Removal is not a state: a removed task leaves the queue table
/// entirely, which is what makes late callbacks for it no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Uploading,
    Succeeded,
    Failed,
}

/// One file's journey through validation, upload, and terminal outcome.
///
/// Owned exclusively by the queue; the executor and merger only touch
/// it through the queue's entry points.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: TaskId,
    pub file: CandidateFile,
    pub state: TaskState,
    /// 0..=100, non-decreasing while uploading.
    pub progress: u8,
    pub error: Option<UploadError>,
    /// Temporary local reference for rendering a thumbnail, image files
    /// only. Cleared once the task has a durable remote URL.
    pub preview: Option<String>,
}

/// Durable, server-acknowledged record of an uploaded file.
///
/// Immutable once created. Field names follow the wire contract the
/// hosting form persists (`type` rather than `mime_type`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAttachment {
    pub name: String,
    pub url: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub mime_type: String,
}

/// Wire shape of the upload endpoint's JSON response.
#[derive(Debug, Deserialize)]
pub(crate) struct UploadResponse {
    pub success: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Notifications delivered to the hosting form through the event
/// channel.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// A selected file failed validation. `name` is already truncated
    /// for display; one event is sent per rejected file.
    Rejected { name: String, reason: RejectReason },
    /// Forward progress for an uploading task.
    Progress { id: TaskId, pct: u8 },
    /// Fired exactly once per successful upload. The host merges the
    /// attachment into its own persisted list.
    Succeeded {
        id: TaskId,
        attachment: PersistedAttachment,
    },
    /// The task failed and will not emit anything further.
    Failed { id: TaskId, error: UploadError },
    /// The task was detached from the visible queue.
    Removed { id: TaskId },
}
