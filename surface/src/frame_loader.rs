use crate::correlator::{Correlator, DEFAULT_FRAME_TIMEOUT_MS};
use crate::error::FrameLoaderError;
use shared::TrajectoryFrameHandle;
use std::sync::Arc;

/// Surface-side handle for on-demand frame fetches against a host-held
/// buffer. Bound to one file path; each fetch is a fresh correlated request.
///
/// This is deliberately not a full streaming API: index-wide queries were
/// answered once, during indexing, and the narrow path refuses to pretend
/// otherwise.
pub struct FrameLoader {
    handle: TrajectoryFrameHandle,
    correlator: Arc<Correlator>,
    timeout_ms: u64,
}

impl FrameLoader {
    pub fn new(handle: TrajectoryFrameHandle, correlator: Arc<Correlator>) -> Self {
        Self {
            handle,
            correlator,
            timeout_ms: DEFAULT_FRAME_TIMEOUT_MS,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn handle(&self) -> &TrajectoryFrameHandle {
        &self.handle
    }

    /// Fetch one frame. An index at or past a known frame count fails locally
    /// without a round trip; `Ok(None)` is the host's own past-the-end answer
    /// when the count is unknown.
    pub async fn load_frame(
        &self,
        frame_index: u64,
    ) -> Result<Option<serde_json::Value>, FrameLoaderError> {
        if let Some(total) = self.handle.total_frames {
            if frame_index >= total {
                return Err(FrameLoaderError::IndexOutOfRange {
                    index: frame_index,
                    total,
                });
            }
        }
        Ok(self
            .correlator
            .request_frame(&self.handle.file_path, frame_index, self.timeout_ms)
            .await?)
    }

    pub fn frame_count(&self) -> Result<u64, FrameLoaderError> {
        Err(FrameLoaderError::Unsupported("total frame count"))
    }

    pub fn rebuild_index(&self) -> Result<(), FrameLoaderError> {
        Err(FrameLoaderError::Unsupported("index rebuild"))
    }

    pub fn extract_metadata(&self) -> Result<serde_json::Value, FrameLoaderError> {
        Err(FrameLoaderError::Unsupported("bulk metadata extraction"))
    }
}
