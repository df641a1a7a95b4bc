use crate::error::RequestError;
use log::debug;
use shared::{DownMsg, LoadStage, UpMsg};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const DEFAULT_FRAME_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_LARGE_FILE_TIMEOUT_MS: u64 = 30_000;

/// Progress callback for a single correlated request. Shared so the inbound
/// dispatcher can invoke it without removing the pending entry.
pub type ProgressFn = Arc<dyn Fn(LoadStage, u8) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseKind {
    LargeFile,
    Frame,
}

struct PendingRequest {
    kind: ResponseKind,
    resolve: oneshot::Sender<DownMsg>,
    on_progress: Option<ProgressFn>,
}

/// Terminal payload of a successful `request_large_file` call.
#[derive(Debug, Clone)]
pub struct LargeFileOutcome {
    pub content: Option<String>,
    pub is_base64: bool,
    pub parsed: Option<shared::ParsedTrajectoryPayload>,
}

/// Correlates outgoing requests with their eventual responses across the
/// unordered channel. Every pending request lives in one map keyed by its
/// correlation id; a single inbound dispatcher settles each entry exactly
/// once, whichever of success, error, or timeout fires first.
pub struct Correlator {
    pending: Mutex<HashMap<String, PendingRequest>>,
    up_tx: mpsc::UnboundedSender<UpMsg>,
    counter: AtomicU64,
}

impl Correlator {
    pub fn new(up_tx: mpsc::UnboundedSender<UpMsg>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            up_tx,
            counter: AtomicU64::new(0),
        }
    }

    fn next_request_id(&self) -> String {
        format!("req-{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Route one inbound message. Correlated messages are consumed; anything
    /// else is handed back to the caller. A terminal message whose id matches
    /// no pending entry is dropped without effect.
    pub fn dispatch(&self, msg: DownMsg) -> Option<DownMsg> {
        match msg {
            DownMsg::LargeFileProgress { ref request_id, stage, progress } => {
                let callback = {
                    let pending = self.lock_pending();
                    match pending.get(request_id) {
                        Some(entry) if entry.kind == ResponseKind::LargeFile => {
                            entry.on_progress.clone()
                        }
                        _ => {
                            debug!("dropping progress for unknown request '{request_id}'");
                            None
                        }
                    }
                };
                if let Some(callback) = callback {
                    callback(stage, progress);
                }
                None
            }
            DownMsg::LargeFileResponse { ref request_id, .. } => {
                let request_id = request_id.clone();
                self.settle(&request_id, ResponseKind::LargeFile, msg);
                None
            }
            DownMsg::FrameResponse { ref request_id, .. } => {
                let request_id = request_id.clone();
                self.settle(&request_id, ResponseKind::Frame, msg);
                None
            }
            other => Some(other),
        }
    }

    fn settle(&self, request_id: &str, kind: ResponseKind, msg: DownMsg) {
        let entry = {
            let mut pending = self.lock_pending();
            match pending.get(request_id) {
                Some(entry) if entry.kind == kind => pending.remove(request_id),
                _ => None,
            }
        };
        match entry {
            // The entry is already out of the map; a duplicate terminal for
            // the same id finds nothing and is ignored.
            Some(entry) => {
                let _ = entry.resolve.send(msg);
            }
            None => debug!("ignoring stray terminal for request '{request_id}'"),
        }
    }

    async fn send_request(
        &self,
        unit: &str,
        kind: ResponseKind,
        timeout_ms: u64,
        on_progress: Option<ProgressFn>,
        build: impl FnOnce(String) -> UpMsg,
    ) -> Result<DownMsg, RequestError> {
        let request_id = self.next_request_id();
        let (resolve, response) = oneshot::channel();
        self.lock_pending().insert(
            request_id.clone(),
            PendingRequest { kind, resolve, on_progress },
        );

        if self.up_tx.send(build(request_id.clone())).is_err() {
            self.lock_pending().remove(&request_id);
            return Err(RequestError::ChannelClosed);
        }

        match tokio::time::timeout(Duration::from_millis(timeout_ms), response).await {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(_)) => {
                self.lock_pending().remove(&request_id);
                Err(RequestError::ChannelClosed)
            }
            Err(_) => {
                // Remove the listener before reporting; repeated timeouts
                // must never accumulate pending entries.
                self.lock_pending().remove(&request_id);
                Err(RequestError::Timeout {
                    unit: unit.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    /// Fetch a large file out-of-band. Progress callbacks may fire any number
    /// of times before the terminal response and never settle the request.
    pub async fn request_large_file(
        &self,
        file_path: &str,
        filename: &str,
        is_compressed: bool,
        timeout_ms: u64,
        on_progress: Option<ProgressFn>,
    ) -> Result<LargeFileOutcome, RequestError> {
        let response = self
            .send_request(
                "Large file",
                ResponseKind::LargeFile,
                timeout_ms,
                on_progress,
                |request_id| UpMsg::RequestLargeFile {
                    request_id,
                    file_path: file_path.to_string(),
                    filename: filename.to_string(),
                    is_compressed,
                },
            )
            .await?;

        match response {
            DownMsg::LargeFileResponse { error: Some(error), .. } => {
                Err(RequestError::Remote(error))
            }
            DownMsg::LargeFileResponse { content, is_base64, parsed, .. } => {
                Ok(LargeFileOutcome { content, is_base64, parsed })
            }
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    /// Fetch a single trajectory frame. `Ok(None)` mirrors the host's "past
    /// the end of the trajectory" answer.
    pub async fn request_frame(
        &self,
        file_path: &str,
        frame_index: u64,
        timeout_ms: u64,
    ) -> Result<Option<serde_json::Value>, RequestError> {
        let unit = format!("Frame {frame_index}");
        let response = self
            .send_request(&unit, ResponseKind::Frame, timeout_ms, None, |request_id| {
                UpMsg::RequestFrame {
                    request_id,
                    file_path: file_path.to_string(),
                    frame_index,
                }
            })
            .await?;

        match response {
            DownMsg::FrameResponse { error: Some(error), .. } => Err(RequestError::Remote(error)),
            DownMsg::FrameResponse { frame, .. } => Ok(frame),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }
}
