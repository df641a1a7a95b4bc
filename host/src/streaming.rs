use crate::error::HostError;
use log::warn;
use shared::{StreamingProgress, StreamingSection};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;

const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Size-gated, deadline-bounded file reader. Reads the whole file into one
/// pre-allocated buffer so multi-GB trajectories never reallocate mid-read.
pub struct StreamingReader {
    hard_cap_bytes: u64,
    warn_threshold_bytes: u64,
    timeout: Duration,
    chunk_size: usize,
}

impl StreamingReader {
    pub fn new(streaming: &StreamingSection) -> Self {
        Self {
            hard_cap_bytes: streaming.hard_cap_bytes,
            warn_threshold_bytes: streaming.warn_threshold_bytes,
            timeout: Duration::from_millis(streaming.stream_timeout_ms),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Read `path` fully into memory, reporting progress at the start, after
    /// every chunk, and at completion. Files over the hard cap are refused
    /// before a single byte is read; the wall-clock deadline spans the whole
    /// read and releases the file handle on expiry.
    pub async fn stream_to_buffer<F>(
        &self,
        path: &str,
        mut on_progress: F,
    ) -> Result<Vec<u8>, HostError>
    where
        F: FnMut(StreamingProgress),
    {
        let metadata = tokio::fs::metadata(path).await.map_err(|source| HostError::Stat {
            path: path.to_string(),
            source,
        })?;
        let total_size = metadata.len();

        if total_size > self.hard_cap_bytes {
            return Err(HostError::SizeLimitExceeded {
                path: path.to_string(),
                size: total_size,
                limit: self.hard_cap_bytes,
            });
        }
        if total_size > self.warn_threshold_bytes {
            warn!(
                "'{path}' is {total_size} bytes, above the {} byte warn threshold",
                self.warn_threshold_bytes
            );
        }

        let deadline = Instant::now() + self.timeout;
        let mut file = tokio::fs::File::open(path).await.map_err(|source| HostError::Io {
            path: path.to_string(),
            source,
        })?;

        let mut buffer = vec![0u8; total_size as usize];
        on_progress(StreamingProgress::new(0, total_size));

        let mut bytes_read = 0usize;
        while bytes_read < buffer.len() {
            let end = (bytes_read + self.chunk_size).min(buffer.len());
            let read = tokio::time::timeout_at(deadline, file.read(&mut buffer[bytes_read..end]))
                .await
                .map_err(|_| HostError::StreamTimeout {
                    path: path.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })?
                .map_err(|source| HostError::Io {
                    path: path.to_string(),
                    source,
                })?;
            if read == 0 {
                return Err(HostError::Io {
                    path: path.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "file shorter than its reported size",
                    ),
                });
            }
            bytes_read += read;
            on_progress(StreamingProgress::new(bytes_read as u64, total_size));
        }

        Ok(buffer)
    }
}
