use bytes::Bytes;
use futures::stream;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::UploadError;
use crate::upload::progress::{run_ticker, ProgressMerger};
use crate::upload::queue::{UploadJob, UploadQueue};
use crate::upload::types::{PersistedAttachment, TaskId, UploadResponse};

/// Bytes handed to the transport per chunk of the streamed body. Each
/// chunk pulled by the transport produces one real progress report.
const CHUNK_SIZE: usize = 64 * 1024;

/// Issues one multipart request per task.
///
/// Stateless apart from the shared HTTP client; per-task state lives in
/// the queue and the merger, so any number of pipelines can run at
/// once and one task's outcome never touches a sibling.
#[derive(Clone)]
pub struct Uploader {
    client: Client,
    endpoint: String,
}

impl Uploader {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Start one pipeline per id, all concurrently.
    ///
    /// Ids that are no longer pending are skipped inside the pipeline,
    /// so calling this twice for the same batch does not double-submit.
    pub(crate) fn spawn_all(&self, queue: &UploadQueue, ids: Vec<TaskId>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            let uploader = self.clone();
            let task_queue = queue.clone();
            let handle = tokio::spawn(async move {
                uploader.run_one(task_queue, id).await;
            });
            handles.push(handle);
        }
        handles
    }

    async fn run_one(&self, queue: UploadQueue, id: TaskId) {
        let Some(job) = queue.try_begin(id) else {
            debug!(%id, "task is not pending, skipping");
            return;
        };
        debug!(%id, name = %job.name, size = job.size_bytes, "starting upload");

        let merger = ProgressMerger::new(queue.clone(), id);
        let ticker = tokio::spawn(run_ticker(merger.clone()));

        // The transfer runs as its own task and the abort handle is
        // attached only after the claim, so a duplicate pipeline can
        // never replace the live handle with its own.
        let transfer = {
            let uploader = self.clone();
            let job = job.clone();
            let merger = merger.clone();
            tokio::spawn(async move { uploader.send(&job, &merger).await })
        };
        queue.attach_abort(id, transfer.abort_handle());

        match transfer.await {
            Ok(Ok(attachment)) => {
                merger.finish().await;
                queue.mark_succeeded(id, attachment);
            }
            Ok(Err(error)) => {
                merger.fail();
                warn!(%id, name = %job.name, %error, "upload failed");
                queue.mark_failed(id, error);
            }
            // aborted by removal; the entry is already gone
            Err(_) => {
                merger.fail();
                debug!(%id, "transfer aborted");
            }
        }
        ticker.abort();
    }

    async fn send(
        &self,
        job: &UploadJob,
        merger: &ProgressMerger,
    ) -> Result<PersistedAttachment, UploadError> {
        let body = progress_body(job.payload.clone(), job.size_bytes, merger.clone());
        let part = Part::stream_with_length(body, job.size_bytes)
            .file_name(job.name.clone())
            .mime_str(&job.mime_type)
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }

        let raw = response
            .bytes()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        let parsed: UploadResponse =
            serde_json::from_slice(&raw).map_err(|e| UploadError::Parse(e.to_string()))?;

        if !parsed.success {
            return Err(UploadError::Server(
                parsed.error.unwrap_or_else(|| "upload failed".to_string()),
            ));
        }
        let url = parsed
            .url
            .ok_or_else(|| UploadError::Parse("response missing url".to_string()))?;

        Ok(PersistedAttachment {
            name: job.name.clone(),
            url,
            size: job.size_bytes,
            mime_type: job.mime_type.clone(),
        })
    }
}

/// Request body that reports cumulative transfer progress to the merger
/// as the transport pulls each chunk.
fn progress_body(payload: Bytes, total: u64, merger: ProgressMerger) -> Body {
    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + CHUNK_SIZE).min(payload.len());
        chunks.push(payload.slice(offset..end));
        offset = end;
    }

    let mut sent: u64 = 0;
    let counted = chunks.into_iter().map(move |chunk| {
        sent += chunk.len() as u64;
        let pct = ((sent * 100) / total.max(1)) as u8;
        merger.on_real_progress(pct);
        Ok::<Bytes, std::io::Error>(chunk)
    });
    Body::wrap_stream(stream::iter(counted))
}
