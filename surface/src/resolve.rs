use crate::correlator::{Correlator, DEFAULT_LARGE_FILE_TIMEOUT_MS, ProgressFn};
use crate::error::ResolveError;
use crate::frame_loader::FrameLoader;
use crate::parsers::{ParseInput, ParseOptions, ParserRegistry};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::read::GzDecoder;
use log::debug;
use shared::{LargeFileSentinel, ParsedDocument, TrajectoryFrameHandle};
use std::io::Read;
use std::sync::Arc;

/// A sentinel chain longer than this many out-of-band hops is treated as a
/// misbehaving host.
pub const MAX_SENTINEL_HOPS: u8 = 2;

/// Content entering the pipeline: either literal data or a string that may
/// turn out to be a sentinel.
#[derive(Debug, Clone)]
pub enum ResolveInput {
    Text(String),
    Bytes(Vec<u8>),
}

/// Final pipeline output. `frames` is attached when the host pre-indexed the
/// trajectory and supports per-frame streaming.
pub struct Resolved {
    pub document: ParsedDocument,
    pub frames: Option<FrameLoader>,
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("document", &self.document)
            .field("frames", &self.frames.is_some())
            .finish()
    }
}

/// Orchestrates sentinel resolution, decompression, and parser dispatch.
/// Sentinel hops are an explicit bounded loop over a raw-or-parsed union, so
/// the depth bound is structural rather than a recursion counter.
pub struct ResolutionPipeline {
    correlator: Arc<Correlator>,
    parsers: ParserRegistry,
    large_file_timeout_ms: u64,
}

impl ResolutionPipeline {
    pub fn new(correlator: Arc<Correlator>, parsers: ParserRegistry) -> Self {
        Self {
            correlator,
            parsers,
            large_file_timeout_ms: DEFAULT_LARGE_FILE_TIMEOUT_MS,
        }
    }

    pub fn with_large_file_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.large_file_timeout_ms = timeout_ms;
        self
    }

    pub async fn resolve(
        &self,
        content: ResolveInput,
        filename: &str,
        compressed: bool,
    ) -> Result<Resolved, ResolveError> {
        self.resolve_with_progress(content, filename, compressed, None).await
    }

    pub async fn resolve_with_progress(
        &self,
        content: ResolveInput,
        filename: &str,
        compressed: bool,
        on_progress: Option<ProgressFn>,
    ) -> Result<Resolved, ResolveError> {
        let mut current = content;
        let mut hops = 0u8;

        loop {
            let sentinel = match &current {
                ResolveInput::Text(text) => LargeFileSentinel::parse(text.trim()),
                ResolveInput::Bytes(_) => None,
            };

            let Some(sentinel) = sentinel else {
                let document = self.parse_literal(current, filename, compressed)?;
                return Ok(Resolved { document, frames: None });
            };

            if hops == MAX_SENTINEL_HOPS {
                return Err(ResolveError::MaxDepth(MAX_SENTINEL_HOPS));
            }
            hops += 1;
            debug!(
                "resolving sentinel for '{}' ({} bytes), hop {hops}",
                sentinel.file_path, sentinel.file_size
            );

            let outcome = self
                .correlator
                .request_large_file(
                    &sentinel.file_path,
                    filename,
                    compressed,
                    self.large_file_timeout_ms,
                    on_progress.clone(),
                )
                .await?;

            // A pre-parsed response short-circuits the loop entirely.
            if let Some(parsed) = outcome.parsed {
                let frames = parsed.supports_frame_streaming.then(|| {
                    FrameLoader::new(
                        TrajectoryFrameHandle {
                            filename: filename.to_string(),
                            file_path: parsed.file_path.clone(),
                            total_frames: parsed.total_frames,
                        },
                        Arc::clone(&self.correlator),
                    )
                });
                return Ok(Resolved {
                    document: parsed.parsed_trajectory,
                    frames,
                });
            }

            current = match outcome.content {
                Some(text) if outcome.is_base64 => ResolveInput::Bytes(BASE64.decode(text)?),
                Some(text) => ResolveInput::Text(text),
                None => {
                    return Err(ResolveError::Parse {
                        filename: filename.to_string(),
                        reason: "large file response carried neither content nor error".to_string(),
                    });
                }
            };
        }
    }

    fn parse_literal(
        &self,
        input: ResolveInput,
        filename: &str,
        compressed: bool,
    ) -> Result<ParsedDocument, ResolveError> {
        let owned_bytes;
        let input = if compressed {
            let mut decoder = GzDecoder::new(match &input {
                ResolveInput::Text(text) => text.as_bytes(),
                ResolveInput::Bytes(bytes) => bytes.as_slice(),
            });
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|source| ResolveError::Decompress {
                    filename: filename.to_string(),
                    source,
                })?;
            owned_bytes = decompressed;
            match std::str::from_utf8(&owned_bytes) {
                Ok(text) => ParseInput::Text(text),
                Err(_) => ParseInput::Bytes(&owned_bytes),
            }
        } else {
            match &input {
                ResolveInput::Text(text) => ParseInput::Text(text),
                ResolveInput::Bytes(bytes) => ParseInput::Bytes(bytes),
            }
        };

        let parser = self
            .parsers
            .find(filename, input.as_bytes())
            .ok_or_else(|| ResolveError::NoParser(filename.to_string()))?;
        parser
            .parse(input, filename, &ParseOptions::default())
            .map_err(|reason| ResolveError::Parse {
                filename: filename.to_string(),
                reason,
            })
    }
}
