use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::upload::types::TaskId;

/// Tracks temporary preview references for in-flight files.
///
/// A reference exists from enqueue until the task leaves the UI:
/// success, removal, or engine drop each revoke it, and revocation is
/// idempotent so no path revokes twice. Persisted attachments carry a
/// durable remote URL and never pass through here.
#[derive(Clone, Default)]
pub struct PreviewRegistry {
    inner: Arc<Mutex<HashMap<TaskId, String>>>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a preview reference for an image candidate.
    ///
    /// Non-image files render a generic icon host-side and get no
    /// reference.
    pub fn create(&self, id: TaskId, name: &str, mime_type: &str) -> Option<String> {
        if !mime_type.starts_with("image/") {
            return None;
        }
        let uri = format!("preview://{}/{}", id.0, name);
        self.inner.lock().unwrap().insert(id, uri.clone());
        Some(uri)
    }

    /// Drop the reference for `id`. Returns false if it was already
    /// revoked or never existed.
    pub fn revoke(&self, id: TaskId) -> bool {
        self.inner.lock().unwrap().remove(&id).is_some()
    }

    /// Revoke everything still registered; used when the engine is
    /// dropped. Returns how many references were outstanding.
    pub fn revoke_all(&self) -> usize {
        let mut map = self.inner.lock().unwrap();
        let count = map.len();
        map.clear();
        count
    }

    pub fn get(&self, id: TaskId) -> Option<String> {
        self.inner.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
