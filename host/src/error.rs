use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to stat '{path}': {source}")]
    Stat {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("file '{path}' is {size} bytes, over the {limit} byte cap")]
    SizeLimitExceeded { path: String, size: u64, limit: u64 },
    #[error("read of '{path}' timed out after {timeout_ms}ms")]
    StreamTimeout { path: String, timeout_ms: u64 },
    #[error("failed to create watcher for '{path}': {reason}")]
    WatcherCreation { path: String, reason: String },
    #[error("no frame loader for file: {0}")]
    NoFrameLoader(String),
    #[error("failed to parse '{path}': {reason}")]
    Parse { path: String, reason: String },
}
