use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::UploadError;
use crate::upload::preview::PreviewRegistry;
use crate::upload::types::{
    CandidateFile, PersistedAttachment, TaskId, TaskState, UploadEvent, UploadTask,
};

/// Snapshot handed to the executor when a task is claimed.
///
/// The payload is a cheap `Bytes` clone; the queue keeps ownership of
/// the task record itself.
#[derive(Debug, Clone)]
pub(crate) struct UploadJob {
    pub id: TaskId,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub payload: Bytes,
}

struct TaskEntry {
    task: UploadTask,
    abort: Option<AbortHandle>,
}

#[derive(Default)]
struct QueueInner {
    tasks: HashMap<TaskId, TaskEntry>,
    order: Vec<TaskId>,
    uploaded: Vec<PersistedAttachment>,
    next_id: u64,
    events: Option<Sender<UploadEvent>>,
}

/// Single source of truth for task state.
///
/// All mutation flows through these entry points; the executor and
/// merger never touch a task directly. Once `remove` has run for an id,
/// every later call for that id finds no entry and is a no-op, so a
/// late progress or completion callback can never resurrect a removed
/// task.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<Mutex<QueueInner>>,
    previews: PreviewRegistry,
}

impl UploadQueue {
    pub fn new(previews: PreviewRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner::default())),
            previews,
        }
    }

    pub(crate) fn set_events(&self, tx: Sender<UploadEvent>) {
        self.inner.lock().unwrap().events = Some(tx);
    }

    // The host may have dropped the receiver; delivery is best effort.
    fn emit(inner: &QueueInner, event: UploadEvent) {
        if let Some(tx) = &inner.events {
            let _ = tx.send(event);
        }
    }

    /// Admit a validated file as a pending task and assign its id.
    pub fn enqueue(&self, file: CandidateFile) -> TaskId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = TaskId(inner.next_id);
        inner.order.push(id);
        inner.tasks.insert(
            id,
            TaskEntry {
                task: UploadTask {
                    id,
                    file,
                    state: TaskState::Pending,
                    progress: 0,
                    error: None,
                    preview: None,
                },
                abort: None,
            },
        );
        id
    }

    pub(crate) fn set_preview(&self, id: TaskId, uri: String) {
        if let Some(entry) = self.inner.lock().unwrap().tasks.get_mut(&id) {
            entry.task.preview = Some(uri);
        }
    }

    /// Claim a pending task for upload.
    ///
    /// Returns None if the task is already uploading, finished, or
    /// gone, so duplicate submissions fall through harmlessly.
    pub(crate) fn try_begin(&self, id: TaskId) -> Option<UploadJob> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.tasks.get_mut(&id)?;
        if entry.task.state != TaskState::Pending {
            return None;
        }
        entry.task.state = TaskState::Uploading;
        Some(UploadJob {
            id,
            name: entry.task.file.name.clone(),
            mime_type: entry.task.file.mime_type.clone(),
            size_bytes: entry.task.file.size_bytes,
            payload: entry.task.file.payload.clone(),
        })
    }

    /// Remember the transport abort handle so removal can cancel the
    /// in-flight request.
    pub(crate) fn attach_abort(&self, id: TaskId, handle: AbortHandle) {
        if let Some(entry) = self.inner.lock().unwrap().tasks.get_mut(&id) {
            entry.abort = Some(handle);
        }
    }

    /// Record forward progress for an uploading task.
    ///
    /// Regressions, values for tasks that are not uploading, and values
    /// for removed tasks are all dropped, which keeps the observable
    /// stream non-decreasing and bounded.
    pub fn set_progress(&self, id: TaskId, pct: u8) {
        let mut inner = self.inner.lock().unwrap();
        let accepted = {
            let Some(entry) = inner.tasks.get_mut(&id) else {
                return;
            };
            if entry.task.state != TaskState::Uploading {
                return;
            }
            let pct = pct.min(100);
            if pct <= entry.task.progress {
                return;
            }
            entry.task.progress = pct;
            pct
        };
        Self::emit(&inner, UploadEvent::Progress { id, pct: accepted });
    }

    /// Promote an uploading task to succeeded.
    ///
    /// Idempotent: a duplicate transport completion finds the task
    /// already terminal and does nothing, so only one attachment is
    /// ever announced. The payload bytes are dropped here; the durable
    /// record replaces them.
    pub fn mark_succeeded(&self, id: TaskId, attachment: PersistedAttachment) {
        let mut inner = self.inner.lock().unwrap();
        {
            let Some(entry) = inner.tasks.get_mut(&id) else {
                return;
            };
            if entry.task.state != TaskState::Uploading {
                return;
            }
            entry.task.state = TaskState::Succeeded;
            entry.task.progress = 100;
            entry.task.file.payload = Bytes::new();
            entry.task.preview = None;
            entry.abort = None;
        }
        self.previews.revoke(id);
        if !inner.uploaded.iter().any(|a| a.url == attachment.url) {
            inner.uploaded.push(attachment.clone());
        }
        debug!(%id, url = %attachment.url, "task succeeded");
        Self::emit(&inner, UploadEvent::Succeeded { id, attachment });
    }

    /// Mark a task failed. Terminal for the task; siblings are
    /// untouched and no further progress will be accepted for it.
    pub fn mark_failed(&self, id: TaskId, error: UploadError) {
        let mut inner = self.inner.lock().unwrap();
        {
            let Some(entry) = inner.tasks.get_mut(&id) else {
                return;
            };
            if !matches!(entry.task.state, TaskState::Pending | TaskState::Uploading) {
                return;
            }
            entry.task.state = TaskState::Failed;
            entry.task.error = Some(error.clone());
            entry.abort = None;
        }
        Self::emit(&inner, UploadEvent::Failed { id, error });
    }

    /// Detach a task in any state.
    ///
    /// Aborts the in-flight transport if one is attached and revokes
    /// the preview reference. Legal to call repeatedly; only the first
    /// call observes the entry.
    pub fn remove(&self, id: TaskId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.tasks.remove(&id) else {
            return false;
        };
        inner.order.retain(|t| *t != id);
        if let Some(abort) = entry.abort {
            abort.abort();
        }
        self.previews.revoke(id);
        debug!(%id, "task removed");
        Self::emit(&inner, UploadEvent::Removed { id });
        true
    }

    /// Visible queue, in selection order.
    pub fn tasks(&self) -> Vec<UploadTask> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id).map(|entry| entry.task.clone()))
            .collect()
    }

    pub fn get(&self, id: TaskId) -> Option<UploadTask> {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .get(&id)
            .map(|entry| entry.task.clone())
    }

    pub(crate) fn is_uploading(&self, id: TaskId) -> bool {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .get(&id)
            .map(|entry| entry.task.state == TaskState::Uploading)
            .unwrap_or(false)
    }

    pub(crate) fn pending_ids(&self) -> Vec<TaskId> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter(|id| {
                inner
                    .tasks
                    .get(id)
                    .map(|entry| entry.task.state == TaskState::Pending)
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }

    /// Pending + Uploading + Succeeded: what counts against
    /// `max_files` alongside existing attachments.
    pub fn live_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .values()
            .filter(|entry| entry.task.state != TaskState::Failed)
            .count()
    }

    /// Attachments produced this session, already deduplicated by url.
    pub fn uploaded(&self) -> Vec<PersistedAttachment> {
        self.inner.lock().unwrap().uploaded.clone()
    }
}

impl Default for UploadQueue {
    fn default() -> Self {
        Self::new(PreviewRegistry::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    fn attachment(url: &str) -> PersistedAttachment {
        PersistedAttachment {
            name: "file.txt".to_string(),
            url: url.to_string(),
            size: 3,
            mime_type: "text/plain".to_string(),
        }
    }

    fn queue_with_events() -> (UploadQueue, std::sync::mpsc::Receiver<UploadEvent>) {
        let queue = UploadQueue::default();
        let (tx, rx) = channel();
        queue.set_events(tx);
        (queue, rx)
    }

    #[test]
    fn progress_never_regresses_and_is_clamped() {
        let (queue, rx) = queue_with_events();
        let id = queue.enqueue(CandidateFile::new("a.txt", "text/plain", "abc"));
        queue.try_begin(id).unwrap();

        queue.set_progress(id, 40);
        queue.set_progress(id, 20);
        queue.set_progress(id, 40);
        queue.set_progress(id, 250);

        assert_eq!(queue.get(id).unwrap().progress, 100);
        let pcts: Vec<u8> = rx
            .try_iter()
            .filter_map(|event| match event {
                UploadEvent::Progress { pct, .. } => Some(pct),
                _ => None,
            })
            .collect();
        assert_eq!(pcts, vec![40, 100]);
    }

    #[test]
    fn progress_before_begin_is_ignored() {
        let (queue, _rx) = queue_with_events();
        let id = queue.enqueue(CandidateFile::new("a.txt", "text/plain", "abc"));

        queue.set_progress(id, 50);

        assert_eq!(queue.get(id).unwrap().progress, 0);
    }

    #[test]
    fn try_begin_claims_only_pending_tasks() {
        let queue = UploadQueue::default();
        let id = queue.enqueue(CandidateFile::new("a.txt", "text/plain", "abc"));

        assert!(queue.try_begin(id).is_some());
        assert!(queue.try_begin(id).is_none());
        assert_eq!(queue.get(id).unwrap().state, TaskState::Uploading);
    }

    #[test]
    fn duplicate_success_announces_one_attachment() {
        let (queue, rx) = queue_with_events();
        let id = queue.enqueue(CandidateFile::new("a.txt", "text/plain", "abc"));
        queue.try_begin(id).unwrap();

        queue.mark_succeeded(id, attachment("/x"));
        queue.mark_succeeded(id, attachment("/x"));

        assert_eq!(queue.uploaded().len(), 1);
        let successes = rx
            .try_iter()
            .filter(|event| matches!(event, UploadEvent::Succeeded { .. }))
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn success_drops_payload_bytes() {
        let queue = UploadQueue::default();
        let id = queue.enqueue(CandidateFile::new("a.txt", "text/plain", "abc"));
        queue.try_begin(id).unwrap();

        queue.mark_succeeded(id, attachment("/x"));

        let task = queue.get(id).unwrap();
        assert_eq!(task.state, TaskState::Succeeded);
        assert!(task.file.payload.is_empty());
        assert_eq!(task.file.size_bytes, 3);
        assert_eq!(task.progress, 100);
    }

    #[test]
    fn removal_makes_every_later_call_a_noop() {
        let (queue, rx) = queue_with_events();
        let id = queue.enqueue(CandidateFile::new("a.txt", "text/plain", "abc"));
        queue.try_begin(id).unwrap();

        assert!(queue.remove(id));
        assert!(!queue.remove(id));

        // stale callbacks arriving after removal
        queue.set_progress(id, 90);
        queue.mark_succeeded(id, attachment("/x"));
        queue.mark_failed(id, UploadError::Transport("late".to_string()));

        assert!(queue.get(id).is_none());
        assert!(queue.tasks().is_empty());
        assert!(queue.uploaded().is_empty());

        let events: Vec<UploadEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], UploadEvent::Removed { .. }));
    }

    #[test]
    fn removal_revokes_the_preview_exactly_once() {
        let previews = PreviewRegistry::new();
        let queue = UploadQueue::new(previews.clone());
        let id = queue.enqueue(CandidateFile::new("a.png", "image/png", "abc"));
        let uri = previews.create(id, "a.png", "image/png").unwrap();
        queue.set_preview(id, uri);

        queue.remove(id);

        assert!(previews.is_empty());
        assert!(!previews.revoke(id));
    }

    #[test]
    fn removing_a_failed_task_revokes_its_preview() {
        let previews = PreviewRegistry::new();
        let queue = UploadQueue::new(previews.clone());
        let id = queue.enqueue(CandidateFile::new("a.png", "image/png", "abc"));
        let uri = previews.create(id, "a.png", "image/png").unwrap();
        queue.set_preview(id, uri);
        queue.try_begin(id).unwrap();

        // failure keeps the preview; only removal releases it
        queue.mark_failed(id, UploadError::Status(500));
        assert_eq!(previews.len(), 1);

        assert!(queue.remove(id));

        assert!(previews.is_empty());
        assert!(!previews.revoke(id));
    }

    #[test]
    fn failure_is_terminal_and_keeps_the_error() {
        let (queue, rx) = queue_with_events();
        let id = queue.enqueue(CandidateFile::new("a.txt", "text/plain", "abc"));
        queue.try_begin(id).unwrap();

        queue.mark_failed(id, UploadError::Status(500));
        queue.set_progress(id, 99);
        queue.mark_succeeded(id, attachment("/x"));

        let task = queue.get(id).unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error, Some(UploadError::Status(500)));
        assert!(queue.uploaded().is_empty());

        let failures = rx
            .try_iter()
            .filter(|event| matches!(event, UploadEvent::Failed { .. }))
            .count();
        assert_eq!(failures, 1);
    }

    #[test]
    fn live_count_excludes_failed_tasks() {
        let queue = UploadQueue::default();
        let a = queue.enqueue(CandidateFile::new("a.txt", "text/plain", "a"));
        let b = queue.enqueue(CandidateFile::new("b.txt", "text/plain", "b"));
        queue.enqueue(CandidateFile::new("c.txt", "text/plain", "c"));

        queue.try_begin(a).unwrap();
        queue.mark_failed(a, UploadError::Status(500));
        queue.try_begin(b).unwrap();
        queue.mark_succeeded(b, attachment("/b"));

        assert_eq!(queue.live_count(), 2);
    }

    #[test]
    fn tasks_keep_selection_order_across_removal() {
        let queue = UploadQueue::default();
        let a = queue.enqueue(CandidateFile::new("a.txt", "text/plain", "a"));
        let b = queue.enqueue(CandidateFile::new("b.txt", "text/plain", "b"));
        let c = queue.enqueue(CandidateFile::new("c.txt", "text/plain", "c"));

        queue.remove(b);

        let names: Vec<String> = queue.tasks().into_iter().map(|t| t.file.name).collect();
        assert_eq!(names, vec!["a.txt", "c.txt"]);
        assert_eq!(queue.pending_ids(), vec![a, c]);
    }
}
