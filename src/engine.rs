use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::upload::{
    validate, CandidateFile, Constraints, PersistedAttachment, PreviewRegistry, Rejection, TaskId,
    UploadEvent, UploadQueue, UploadTask, Uploader,
};
use crate::utils::truncate_name;

/// Longest file name echoed back in a rejection notice.
const NOTICE_NAME_LEN: usize = 30;

/// The contract exposed to the hosting form.
///
/// The engine owns the task queue, preview references, and upload
/// pipelines; the host owns long-term storage and merges each
/// [`UploadEvent::Succeeded`] attachment into its own persisted list.
/// Dropping the engine aborts whatever is still in flight and releases
/// every preview reference.
pub struct UploadEngine {
    constraints: Constraints,
    queue: UploadQueue,
    previews: PreviewRegistry,
    uploader: Uploader,
    existing: Mutex<Vec<PersistedAttachment>>,
    pipelines: Mutex<Vec<JoinHandle<()>>>,
    events: Sender<UploadEvent>,
}

impl UploadEngine {
    /// Build an engine for one upload endpoint, handing back the event
    /// receiver the host polls for progress, rejection, and completion
    /// notifications.
    pub fn new(
        endpoint: impl Into<String>,
        constraints: Constraints,
    ) -> (Self, Receiver<UploadEvent>) {
        let (tx, rx) = channel();
        let previews = PreviewRegistry::new();
        let queue = UploadQueue::new(previews.clone());
        queue.set_events(tx.clone());
        let engine = Self {
            constraints,
            queue,
            previews,
            uploader: Uploader::new(endpoint),
            existing: Mutex::new(Vec::new()),
            pipelines: Mutex::new(Vec::new()),
            events: tx,
        };
        (engine, rx)
    }

    /// Seed the already-persisted attachment list, e.g. when editing a
    /// record that was saved with attachments in an earlier session.
    pub fn set_existing(&self, attachments: Vec<PersistedAttachment>) {
        *self.existing.lock().unwrap() = attachments;
    }

    /// Validate and enqueue a new selection.
    ///
    /// Accepted files become pending tasks (image files get a preview
    /// reference). Rejected files are handed back and also announced on
    /// the event channel, one notice each with a truncated name.
    pub fn add_files(&self, candidates: Vec<CandidateFile>) -> Vec<Rejection> {
        // Admission check and enqueue hold the same guard; two
        // concurrent callers cannot both pass the ceiling.
        let rejected = {
            let existing = self.existing.lock().unwrap();
            let taken = existing.len() + self.queue.live_count();
            let outcome = validate(candidates, taken, &self.constraints);

            for file in outcome.accepted {
                let name = file.name.clone();
                let mime_type = file.mime_type.clone();
                let id = self.queue.enqueue(file);
                if let Some(uri) = self.previews.create(id, &name, &mime_type) {
                    self.queue.set_preview(id, uri);
                }
                debug!(%id, name = %name, "queued file");
            }
            outcome.rejected
        };

        for rejection in &rejected {
            let name = truncate_name(&rejection.file.name, NOTICE_NAME_LEN);
            warn!(name = %name, reason = rejection.reason.as_str(), "rejected file");
            let _ = self.events.send(UploadEvent::Rejected {
                name,
                reason: rejection.reason.clone(),
            });
        }

        rejected
    }

    /// Start every pending task, all at once.
    ///
    /// Must be called from within a tokio runtime. Tasks already
    /// uploading or finished are left alone, so a double invocation
    /// cannot double-submit.
    pub fn upload(&self) {
        let ids = self.queue.pending_ids();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "starting upload batch");
        let handles = self.uploader.spawn_all(&self.queue, ids);
        self.pipelines.lock().unwrap().extend(handles);
    }

    /// Detach a task in any state: it disappears from the visible
    /// queue, its in-flight request (if any) is aborted, and its
    /// preview reference is revoked.
    pub fn remove_pending(&self, id: TaskId) -> bool {
        self.queue.remove(id)
    }

    /// Drop an existing attachment by position. Pure list edit; any
    /// server-side deletion is the host's concern.
    pub fn remove_existing(&self, index: usize) -> Option<PersistedAttachment> {
        let mut existing = self.existing.lock().unwrap();
        if index < existing.len() {
            Some(existing.remove(index))
        } else {
            None
        }
    }

    /// Visible task queue, in selection order.
    pub fn tasks(&self) -> Vec<UploadTask> {
        self.queue.tasks()
    }

    /// Existing attachments plus everything uploaded this session,
    /// deduplicated by url.
    pub fn attachments(&self) -> Vec<PersistedAttachment> {
        let mut combined = self.existing.lock().unwrap().clone();
        for attachment in self.queue.uploaded() {
            if !combined.iter().any(|a| a.url == attachment.url) {
                combined.push(attachment);
            }
        }
        combined
    }

    /// Wait for every spawned pipeline to settle. Aborted pipelines
    /// count as settled.
    pub async fn wait_idle(&self) {
        let handles: Vec<JoinHandle<()>> = self.pipelines.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Drop for UploadEngine {
    fn drop(&mut self) {
        for handle in self.pipelines.lock().unwrap().drain(..) {
            handle.abort();
        }
        let revoked = self.previews.revoke_all();
        if revoked > 0 {
            debug!(revoked, "revoked outstanding preview references");
        }
    }
}
