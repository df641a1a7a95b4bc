use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequestError {
    /// The only cancellation path; no abort notice reaches the host.
    #[error("{unit} timeout after {timeout_ms}ms")]
    Timeout { unit: String, timeout_ms: u64 },
    /// The host packaged a failure into the terminal response's error field.
    #[error("{0}")]
    Remote(String),
    #[error("channel closed before a response arrived")]
    ChannelClosed,
    #[error("terminal response had an unexpected shape")]
    UnexpectedResponse,
}

#[derive(Debug, Error)]
pub enum FrameLoaderError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("frame index {index} is out of range for {total} frame(s)")]
    IndexOutOfRange { index: u64, total: u64 },
    #[error("not implemented: {0} is computed once during indexing")]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("maximum sentinel resolution depth ({0}) exceeded")]
    MaxDepth(u8),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("no parser registered for '{0}'")]
    NoParser(String),
    #[error("failed to parse '{filename}': {reason}")]
    Parse { filename: String, reason: String },
    #[error("failed to decompress '{filename}': {source}")]
    Decompress {
        filename: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid base64 content: {0}")]
    Base64(#[from] base64::DecodeError),
}
