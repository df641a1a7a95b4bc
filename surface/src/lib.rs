pub mod correlator;
pub mod error;
pub mod frame_loader;
pub mod parsers;
pub mod resolve;

pub use correlator::{
    Correlator, DEFAULT_FRAME_TIMEOUT_MS, DEFAULT_LARGE_FILE_TIMEOUT_MS, LargeFileOutcome,
    ProgressFn,
};
pub use error::{FrameLoaderError, RequestError, ResolveError};
pub use frame_loader::FrameLoader;
pub use parsers::{FormatParser, ParseInput, ParseOptions, ParserRegistry};
pub use resolve::{MAX_SENTINEL_HOPS, Resolved, ResolutionPipeline, ResolveInput};

use log::debug;
use shared::{DownMsg, RenderType, UpMsg};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One-way notifications that are not part of any correlated request.
#[derive(Debug, Clone)]
pub enum FileEvent {
    Updated {
        file_path: String,
        data: Option<String>,
        render_type: Option<RenderType>,
        theme: Option<String>,
    },
    Deleted { file_path: String },
    Error { message: String },
}

/// Surface end of the session channel. Owns the correlator and the single
/// inbound demultiplexer task; watch notifications and user-facing errors
/// come back to the embedder as a [`FileEvent`] stream.
pub struct SurfaceConnection {
    correlator: Arc<Correlator>,
    up_tx: mpsc::UnboundedSender<UpMsg>,
    demux: JoinHandle<()>,
}

impl SurfaceConnection {
    pub fn new(
        up_tx: mpsc::UnboundedSender<UpMsg>,
        mut down_rx: mpsc::UnboundedReceiver<DownMsg>,
    ) -> (Self, mpsc::UnboundedReceiver<FileEvent>) {
        let correlator = Arc::new(Correlator::new(up_tx.clone()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let demux = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                while let Some(msg) = down_rx.recv().await {
                    let Some(event_msg) = correlator.dispatch(msg) else {
                        continue;
                    };
                    let event = match event_msg {
                        DownMsg::FileUpdated { file_path, data, render_type, theme } => {
                            FileEvent::Updated { file_path, data, render_type, theme }
                        }
                        DownMsg::FileDeleted { file_path } => FileEvent::Deleted { file_path },
                        DownMsg::Error { message } => FileEvent::Error { message },
                        other => {
                            debug!("ignoring unhandled message: {other:?}");
                            continue;
                        }
                    };
                    let _ = event_tx.send(event);
                }
            })
        };

        let connection = Self { correlator, up_tx, demux };
        (connection, event_rx)
    }

    pub fn correlator(&self) -> Arc<Correlator> {
        Arc::clone(&self.correlator)
    }

    pub fn pipeline(&self, parsers: ParserRegistry) -> ResolutionPipeline {
        ResolutionPipeline::new(self.correlator(), parsers)
    }

    /// Fire-and-forget watch subscription; change and delete notifications
    /// arrive on the event stream.
    pub fn start_watching(&self, file_path: &str, filename: Option<String>) {
        let _ = self.up_tx.send(UpMsg::StartWatching {
            file_path: file_path.to_string(),
            filename,
            frame_index: None,
        });
    }

    pub fn stop_watching(&self, file_path: &str) {
        let _ = self.up_tx.send(UpMsg::StopWatching {
            file_path: file_path.to_string(),
        });
    }
}

impl Drop for SurfaceConnection {
    fn drop(&mut self) {
        self.demux.abort();
    }
}
