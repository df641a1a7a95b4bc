pub mod config;
pub mod error;
pub mod parsers;
pub mod registry;
pub mod streaming;

pub use error::HostError;
pub use parsers::{IndexedTrajectory, NullPanelFactory, PanelFactory, RenderPanel, TrajectoryIndexer};
pub use registry::{FrameLoaderEntry, ResourceRegistry};
pub use streaming::StreamingReader;

use crate::registry::WatcherEntry;
use log::{debug, error, info, warn};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use shared::{
    AppConfig, DownMsg, LargeFileSentinel, LoadStage, ParsedTrajectoryPayload, UpMsg,
    infer_render_type,
};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Content handed back by [`HostSession::open_file`]: either the literal file
/// content or a large-file sentinel the surface resolves out-of-band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedContent {
    pub content: String,
    pub is_base64: bool,
}

/// The privileged side of one viewing session. Owns the per-path resource
/// registry and is the single dispatch entry point for surface messages;
/// handlers for long-running requests run as spawned tasks so independent
/// requests can complete out of order.
#[derive(Clone)]
pub struct HostSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: RwLock<AppConfig>,
    registry: Mutex<ResourceRegistry>,
    down_tx: mpsc::UnboundedSender<DownMsg>,
    indexers: Vec<Arc<dyn TrajectoryIndexer>>,
    panel_factory: Arc<dyn PanelFactory>,
}

impl HostSession {
    pub fn new(
        config: AppConfig,
        down_tx: mpsc::UnboundedSender<DownMsg>,
        indexers: Vec<Arc<dyn TrajectoryIndexer>>,
        panel_factory: Arc<dyn PanelFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config: RwLock::new(config),
                registry: Mutex::new(ResourceRegistry::new()),
                down_tx,
                indexers,
                panel_factory,
            }),
        }
    }

    /// Drain the surface channel until it closes, dispatching every message.
    pub fn run(&self, mut up_rx: mpsc::UnboundedReceiver<UpMsg>) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = up_rx.recv().await {
                session.handle_up_msg(msg);
            }
            info!("surface channel closed, tearing down session");
            session.teardown();
        })
    }

    /// Single dispatch entry point for inbound surface messages.
    pub fn handle_up_msg(&self, msg: UpMsg) {
        match msg {
            UpMsg::RequestLargeFile { request_id, file_path, filename, is_compressed } => {
                let session = self.clone();
                tokio::spawn(async move {
                    session
                        .handle_request_large_file(request_id, file_path, filename, is_compressed)
                        .await;
                });
            }
            UpMsg::RequestFrame { request_id, file_path, frame_index } => {
                let session = self.clone();
                tokio::spawn(async move {
                    session.handle_request_frame(request_id, file_path, frame_index);
                });
            }
            UpMsg::StartWatching { file_path, filename, frame_index: _ } => {
                debug!("startWatching {} ({:?})", file_path, filename);
                self.start_watching(&file_path);
            }
            UpMsg::StopWatching { file_path } => {
                self.stop_watching(&file_path);
            }
        }
    }

    /// Tolerant entry point for embedders whose channel carries raw JSON.
    /// Malformed or unrecognized messages are dropped, never raised; the
    /// channel has no cheap way to report a bad request.
    pub fn handle_raw(&self, raw: &str) {
        match serde_json::from_str::<UpMsg>(raw) {
            Ok(msg) => self.handle_up_msg(msg),
            Err(err) => debug!("ignoring malformed message: {err}"),
        }
    }

    /// Stat-gated open: small files come back as literal content, anything
    /// over the configured threshold as a sentinel for out-of-band streaming.
    pub async fn open_file(&self, path: &str) -> Result<OpenedContent, HostError> {
        let metadata = tokio::fs::metadata(path).await.map_err(|source| HostError::Stat {
            path: path.to_string(),
            source,
        })?;
        let threshold = self.config_snapshot().streaming.open_threshold_bytes;
        if metadata.len() > threshold {
            info!(
                "'{path}' is {} bytes, over the {threshold} byte open threshold",
                metadata.len()
            );
            return Ok(OpenedContent {
                content: LargeFileSentinel::new(path, metadata.len()).encode(),
                is_base64: false,
            });
        }

        let bytes = tokio::fs::read(path).await.map_err(|source| HostError::Io {
            path: path.to_string(),
            source,
        })?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => OpenedContent { content: text, is_base64: false },
            Err(err) => OpenedContent {
                content: BASE64.encode(err.into_bytes()),
                is_base64: true,
            },
        })
    }

    pub fn config_snapshot(&self) -> AppConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn update_config(&self, config: AppConfig) {
        let mut guard = self
            .inner
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = config;
    }

    /// Dispose every watcher, timer, panel, and frame loader. Safe to call
    /// repeatedly and on an empty session.
    pub fn teardown(&self) {
        self.inner.lock_registry().teardown();
    }

    pub fn with_registry<R>(&self, f: impl FnOnce(&mut ResourceRegistry) -> R) -> R {
        f(&mut self.inner.lock_registry())
    }

    // ===== LARGE FILE STREAMING =====

    async fn handle_request_large_file(
        &self,
        request_id: String,
        file_path: String,
        filename: String,
        is_compressed: bool,
    ) {
        let streaming = self.config_snapshot().streaming;
        let reader = StreamingReader::new(&streaming);

        self.send_progress(&request_id, LoadStage::Reading, 0);
        let progress_tx = self.inner.down_tx.clone();
        let progress_id = request_id.clone();
        let result = reader
            .stream_to_buffer(&file_path, move |progress| {
                // Reading owns 0-90; parsing and the terminal response fill the rest.
                let scaled = (progress.progress * 90.0) as u8;
                let _ = progress_tx.send(DownMsg::LargeFileProgress {
                    request_id: progress_id.clone(),
                    stage: LoadStage::Reading,
                    progress: scaled,
                });
            })
            .await;

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(err) => {
                self.respond_large_file_error(request_id, err.to_string());
                return;
            }
        };

        if !is_compressed {
            if let Some(indexer) = self.indexer_for(&filename) {
                self.send_progress(&request_id, LoadStage::Parsing, 90);
                match catch_unwind(AssertUnwindSafe(|| indexer.index(&bytes, &filename))) {
                    Ok(Ok(indexed)) => {
                        let entry = FrameLoaderEntry {
                            bytes: Arc::new(bytes),
                            filename: filename.clone(),
                            indexer,
                            total_frames: indexed.total_frames,
                        };
                        self.inner.lock_registry().register_frame_loader(&file_path, entry);
                        self.send_progress(&request_id, LoadStage::Complete, 100);
                        self.send(DownMsg::LargeFileResponse {
                            request_id,
                            content: None,
                            is_base64: false,
                            parsed: Some(ParsedTrajectoryPayload {
                                parsed_trajectory: indexed.document,
                                is_parsed: true,
                                supports_frame_streaming: true,
                                file_path,
                                total_frames: indexed.total_frames,
                            }),
                            error: None,
                        });
                    }
                    Ok(Err(reason)) => {
                        self.respond_large_file_error(
                            request_id,
                            HostError::Parse { path: file_path, reason }.to_string(),
                        );
                    }
                    Err(_) => {
                        self.respond_large_file_error(
                            request_id,
                            HostError::Parse {
                                path: file_path,
                                reason: format!("indexer panicked on '{filename}'"),
                            }
                            .to_string(),
                        );
                    }
                }
                return;
            }
        }

        let (content, is_base64) = if is_compressed {
            (BASE64.encode(&bytes), true)
        } else {
            match String::from_utf8(bytes) {
                Ok(text) => (text, false),
                Err(err) => (BASE64.encode(err.into_bytes()), true),
            }
        };
        self.send_progress(&request_id, LoadStage::Complete, 100);
        self.send(DownMsg::LargeFileResponse {
            request_id,
            content: Some(content),
            is_base64,
            parsed: None,
            error: None,
        });
    }

    fn respond_large_file_error(&self, request_id: String, message: String) {
        self.inner.notify_error(&message);
        self.send(DownMsg::LargeFileResponse {
            request_id,
            content: None,
            is_base64: false,
            parsed: None,
            error: Some(message),
        });
    }

    fn indexer_for(&self, filename: &str) -> Option<Arc<dyn TrajectoryIndexer>> {
        self.inner
            .indexers
            .iter()
            .find(|indexer| indexer.can_index(filename))
            .cloned()
    }

    // ===== FRAME SERVING =====

    fn handle_request_frame(&self, request_id: String, file_path: String, frame_index: u64) {
        let entry = self.inner.lock_registry().frame_loader(&file_path);
        let Some(entry) = entry else {
            self.send(DownMsg::FrameResponse {
                request_id,
                frame_index,
                frame: None,
                error: Some(HostError::NoFrameLoader(file_path).to_string()),
            });
            return;
        };

        let extracted = catch_unwind(AssertUnwindSafe(|| {
            entry.indexer.extract_frame(&entry.bytes, &entry.filename, frame_index)
        }));
        let (frame, error) = match extracted {
            Ok(Ok(frame)) => (frame, None),
            Ok(Err(reason)) => (None, Some(reason)),
            Err(_) => (
                None,
                Some(format!("frame extractor panicked on '{}'", entry.filename)),
            ),
        };
        self.send(DownMsg::FrameResponse { request_id, frame_index, frame, error });
    }

    // ===== FILE WATCHING =====

    /// Start (or restart) watching `path`. Replacing an existing watcher
    /// disposes the previous one before the new entry is stored.
    pub fn start_watching(&self, path: &str) {
        let debounce_ms = self
            .config_snapshot()
            .streaming
            .watch_debounce_ms
            .max(shared::MIN_WATCH_DEBOUNCE_MS);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<()>();

        let watched = path.to_string();
        let mut debouncer = match new_debouncer(
            Duration::from_millis(debounce_ms),
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    if !events.is_empty() {
                        let _ = event_tx.send(());
                    }
                }
                Err(err) => warn!("watcher error for '{watched}': {err}"),
            },
        ) {
            Ok(debouncer) => debouncer,
            Err(err) => {
                self.inner.notify_error(
                    &HostError::WatcherCreation {
                        path: path.to_string(),
                        reason: err.to_string(),
                    }
                    .to_string(),
                );
                return;
            }
        };

        if let Err(err) = debouncer
            .watcher()
            .watch(Path::new(path), RecursiveMode::NonRecursive)
        {
            self.inner.notify_error(
                &HostError::WatcherCreation {
                    path: path.to_string(),
                    reason: err.to_string(),
                }
                .to_string(),
            );
            return;
        }

        let inner = Arc::clone(&self.inner);
        let watched = path.to_string();
        let task = tokio::spawn(async move {
            while event_rx.recv().await.is_some() {
                if Path::new(&watched).exists() {
                    inner.push_file_updated(&watched).await;
                } else {
                    let _ = inner.down_tx.send(DownMsg::FileDeleted {
                        file_path: watched.clone(),
                    });
                    inner.lock_registry().evict_deleted(&watched);
                    break;
                }
            }
        });

        self.inner
            .lock_registry()
            .replace_watcher(path, WatcherEntry { _debouncer: debouncer, task });
    }

    /// Stop watching `path`; the path's frame loader is evicted in the same
    /// lock scope so a frame request cannot race past the stop.
    pub fn stop_watching(&self, path: &str) {
        self.inner.lock_registry().stop_watching(path);
    }

    // ===== AUTO RENDER =====

    /// Debounced reaction to a file-open event: reveal a live panel, or
    /// (re)arm the render timer for this path.
    pub fn file_opened(&self, path: &str) {
        let delay_ms = self.config_snapshot().viewer.auto_render_delay_ms;
        let mut registry = self.inner.lock_registry();
        if let Some(panel) = registry.panel(path) {
            panel.reveal();
            return;
        }
        registry.cancel_render_timer(path);

        let inner = Arc::clone(&self.inner);
        let opened = path.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            SessionInner::materialize_panel(&inner, &opened).await;
        });
        registry.set_render_timer(path, task);
    }

    /// Panel-lifecycle callback: a disposed panel drops both its panel and
    /// (if still present) timer entries.
    pub fn panel_disposed(&self, path: &str) {
        let mut registry = self.inner.lock_registry();
        registry.remove_panel(path);
        registry.cancel_render_timer(path);
    }

    fn send(&self, msg: DownMsg) {
        let _ = self.inner.down_tx.send(msg);
    }

    fn send_progress(&self, request_id: &str, stage: LoadStage, progress: u8) {
        self.send(DownMsg::LargeFileProgress {
            request_id: request_id.to_string(),
            stage,
            progress,
        });
    }
}

impl SessionInner {
    fn lock_registry(&self) -> MutexGuard<'_, ResourceRegistry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify_error(&self, message: &str) {
        error!("{message}");
        let _ = self.down_tx.send(DownMsg::Error {
            message: message.to_string(),
        });
    }

    fn theme(&self) -> String {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .viewer
            .theme
            .clone()
    }

    async fn push_file_updated(&self, path: &str) {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let data = match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(err) => BASE64.encode(err.into_bytes()),
                };
                let _ = self.down_tx.send(DownMsg::FileUpdated {
                    file_path: path.to_string(),
                    data: Some(data),
                    render_type: infer_render_type(path),
                    theme: Some(self.theme()),
                });
            }
            Err(err) => warn!("failed to re-read changed file '{path}': {err}"),
        }
    }

    /// Timer body for auto-render. The timer entry is cleared whether or not
    /// materialization succeeded.
    async fn materialize_panel(inner: &Arc<SessionInner>, path: &str) {
        let outcome = Self::try_materialize(inner, path).await;
        inner.lock_registry().clear_render_timer(path);
        if let Err(message) = outcome {
            inner.notify_error(&message);
        }
    }

    async fn try_materialize(inner: &Arc<SessionInner>, path: &str) -> Result<(), String> {
        let enabled = inner
            .config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .viewer
            .auto_render;
        if !enabled {
            debug!("auto render disabled, skipping '{path}'");
            return Ok(());
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| format!("failed to read '{path}' for rendering: {err}"))?;
        let panel = inner
            .panel_factory
            .create(path, infer_render_type(path), &bytes)
            .map_err(|reason| format!("failed to render '{path}': {reason}"))?;
        inner.lock_registry().insert_panel(path, panel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::time::timeout;

    struct XyzIndexer;

    impl TrajectoryIndexer for XyzIndexer {
        fn can_index(&self, filename: &str) -> bool {
            filename.ends_with(".xyz")
        }

        fn index(&self, bytes: &[u8], _filename: &str) -> Result<IndexedTrajectory, String> {
            if bytes.starts_with(b"corrupt") {
                return Err("not a trajectory".to_string());
            }
            Ok(IndexedTrajectory {
                document: shared::ParsedDocument {
                    doc_type: "trajectory".to_string(),
                    data: json!({ "bytes": bytes.len() }),
                },
                total_frames: Some(3),
            })
        }

        fn extract_frame(
            &self,
            _bytes: &[u8],
            _filename: &str,
            frame_index: u64,
        ) -> Result<Option<serde_json::Value>, String> {
            if frame_index < 3 {
                Ok(Some(json!({ "frame": frame_index })))
            } else {
                Ok(None)
            }
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        revealed: Arc<AtomicUsize>,
        fail: bool,
    }

    struct CountingPanel {
        revealed: Arc<AtomicUsize>,
    }

    impl RenderPanel for CountingPanel {
        fn reveal(&self) {
            self.revealed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl PanelFactory for CountingFactory {
        fn create(
            &self,
            _file_path: &str,
            _render_type: Option<shared::RenderType>,
            _content: &[u8],
        ) -> Result<Box<dyn RenderPanel>, String> {
            if self.fail {
                return Err("renderer unavailable".to_string());
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingPanel {
                revealed: Arc::clone(&self.revealed),
            }))
        }
    }

    struct Harness {
        session: HostSession,
        down_rx: mpsc::UnboundedReceiver<DownMsg>,
        factory: Arc<CountingFactory>,
        dir: PathBuf,
    }

    fn harness(configure: impl FnOnce(&mut AppConfig), fail_factory: bool) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = env::temp_dir().join(format!("molvista_host_test_{suffix}"));
        fs::create_dir_all(&dir).unwrap();

        let mut config = AppConfig::default();
        config.viewer.auto_render_delay_ms = 50;
        config.streaming.watch_debounce_ms = 50;
        configure(&mut config);

        let (down_tx, down_rx) = mpsc::unbounded_channel();
        let factory = Arc::new(CountingFactory {
            fail: fail_factory,
            ..CountingFactory::default()
        });
        let session = HostSession::new(
            config,
            down_tx,
            vec![Arc::new(XyzIndexer)],
            Arc::clone(&factory) as Arc<dyn PanelFactory>,
        );
        Harness { session, down_rx, factory, dir }
    }

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> String {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path.to_string_lossy().to_string()
    }

    async fn next_msg(rx: &mut mpsc::UnboundedReceiver<DownMsg>) -> DownMsg {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("message within timeout")
            .expect("channel open")
    }

    async fn next_terminal(rx: &mut mpsc::UnboundedReceiver<DownMsg>) -> DownMsg {
        loop {
            match next_msg(rx).await {
                DownMsg::LargeFileProgress { .. } => continue,
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn open_file_returns_content_below_threshold() {
        let h = harness(|_| {}, false);
        let path = write_file(&h.dir, "small.pdb", b"ATOM      1");
        let opened = h.session.open_file(&path).await.unwrap();
        assert_eq!(opened.content, "ATOM      1");
        assert!(!opened.is_base64);
    }

    #[tokio::test]
    async fn open_file_returns_sentinel_above_threshold() {
        let h = harness(|config| config.streaming.open_threshold_bytes = 4, false);
        let path = write_file(&h.dir, "big.xyz", &[b'x'; 64]);
        let opened = h.session.open_file(&path).await.unwrap();
        let sentinel = LargeFileSentinel::parse(&opened.content).expect("sentinel");
        assert_eq!(sentinel.file_path, path);
        assert_eq!(sentinel.file_size, 64);
    }

    #[tokio::test]
    async fn large_file_request_indexes_and_registers_loader() {
        let mut h = harness(|_| {}, false);
        let path = write_file(&h.dir, "run.xyz", b"3\nframe data\n");

        h.session.handle_up_msg(UpMsg::RequestLargeFile {
            request_id: "r1".to_string(),
            file_path: path.clone(),
            filename: "run.xyz".to_string(),
            is_compressed: false,
        });

        let mut saw_progress = false;
        let response = loop {
            match next_msg(&mut h.down_rx).await {
                DownMsg::LargeFileProgress { request_id, .. } => {
                    assert_eq!(request_id, "r1");
                    saw_progress = true;
                }
                other => break other,
            }
        };
        assert!(saw_progress);
        match response {
            DownMsg::LargeFileResponse { request_id, parsed, error, .. } => {
                assert_eq!(request_id, "r1");
                assert!(error.is_none());
                let parsed = parsed.expect("parsed payload");
                assert!(parsed.is_parsed);
                assert!(parsed.supports_frame_streaming);
                assert_eq!(parsed.total_frames, Some(3));
                assert_eq!(parsed.file_path, path);
            }
            other => panic!("expected large_file_response, got {other:?}"),
        }
        assert_eq!(h.session.with_registry(|r| r.frame_loader_count()), 1);
    }

    #[tokio::test]
    async fn large_file_request_falls_back_to_raw_text() {
        let mut h = harness(|_| {}, false);
        let path = write_file(&h.dir, "notes.txt", b"hello surface");

        h.session.handle_up_msg(UpMsg::RequestLargeFile {
            request_id: "r2".to_string(),
            file_path: path,
            filename: "notes.txt".to_string(),
            is_compressed: false,
        });

        match next_terminal(&mut h.down_rx).await {
            DownMsg::LargeFileResponse { content, is_base64, parsed, error, .. } => {
                assert_eq!(content.as_deref(), Some("hello surface"));
                assert!(!is_base64);
                assert!(parsed.is_none());
                assert!(error.is_none());
            }
            other => panic!("expected large_file_response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn large_file_request_reports_errors_in_terminal_response() {
        let mut h = harness(|_| {}, false);
        h.session.handle_up_msg(UpMsg::RequestLargeFile {
            request_id: "r3".to_string(),
            file_path: "/missing/file.xyz".to_string(),
            filename: "file.xyz".to_string(),
            is_compressed: false,
        });

        // One user-facing error notification and one terminal response.
        let mut saw_notification = false;
        let mut saw_error_response = false;
        for _ in 0..4 {
            match next_msg(&mut h.down_rx).await {
                DownMsg::Error { .. } => saw_notification = true,
                DownMsg::LargeFileResponse { error, .. } => {
                    assert!(error.unwrap().contains("failed to stat"));
                    saw_error_response = true;
                    break;
                }
                DownMsg::LargeFileProgress { .. } => continue,
                other => panic!("unexpected message {other:?}"),
            }
        }
        assert!(saw_notification);
        assert!(saw_error_response);
    }

    #[tokio::test]
    async fn large_file_request_reports_index_failure() {
        let mut h = harness(|_| {}, false);
        let path = write_file(&h.dir, "bad.xyz", b"corrupt data");

        h.session.handle_up_msg(UpMsg::RequestLargeFile {
            request_id: "r4".to_string(),
            file_path: path,
            filename: "bad.xyz".to_string(),
            is_compressed: false,
        });

        let mut saw_notification = false;
        loop {
            match next_msg(&mut h.down_rx).await {
                DownMsg::LargeFileProgress { .. } => continue,
                DownMsg::Error { .. } => saw_notification = true,
                DownMsg::LargeFileResponse { content, parsed, error, .. } => {
                    assert!(content.is_none());
                    assert!(parsed.is_none());
                    let error = error.expect("error field set");
                    assert!(error.contains("failed to parse"));
                    assert!(error.contains("not a trajectory"));
                    break;
                }
                other => panic!("unexpected message {other:?}"),
            }
        }
        assert!(saw_notification);
        assert_eq!(h.session.with_registry(|r| r.frame_loader_count()), 0);
    }

    #[tokio::test]
    async fn frame_request_without_loader_fails() {
        let mut h = harness(|_| {}, false);
        h.session.handle_up_msg(UpMsg::RequestFrame {
            request_id: "f1".to_string(),
            file_path: "/never/streamed.xyz".to_string(),
            frame_index: 0,
        });
        match next_msg(&mut h.down_rx).await {
            DownMsg::FrameResponse { error, frame, .. } => {
                assert!(frame.is_none());
                assert!(error.unwrap().contains("no frame loader for file"));
            }
            other => panic!("expected frame_response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn frame_request_extracts_from_buffered_bytes() {
        let mut h = harness(|_| {}, false);
        h.session.with_registry(|r| {
            r.register_frame_loader(
                "/buffered.xyz",
                FrameLoaderEntry {
                    bytes: Arc::new(b"data".to_vec()),
                    filename: "buffered.xyz".to_string(),
                    indexer: Arc::new(XyzIndexer),
                    total_frames: Some(3),
                },
            )
        });

        h.session.handle_up_msg(UpMsg::RequestFrame {
            request_id: "f2".to_string(),
            file_path: "/buffered.xyz".to_string(),
            frame_index: 2,
        });
        match next_msg(&mut h.down_rx).await {
            DownMsg::FrameResponse { request_id, frame_index, frame, error } => {
                assert_eq!(request_id, "f2");
                assert_eq!(frame_index, 2);
                assert!(error.is_none());
                assert_eq!(frame.unwrap()["frame"], 2);
            }
            other => panic!("expected frame_response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_watching_twice_keeps_one_entry() {
        let h = harness(|_| {}, false);
        let path = write_file(&h.dir, "watched.cif", b"data_block");
        h.session.start_watching(&path);
        h.session.start_watching(&path);
        assert_eq!(h.session.with_registry(|r| r.watcher_count()), 1);
        h.session.teardown();
    }

    #[tokio::test]
    async fn stop_watching_cascades_to_frame_loader() {
        let h = harness(|_| {}, false);
        let path = write_file(&h.dir, "casc.xyz", b"frames");
        h.session.start_watching(&path);
        h.session.with_registry(|r| {
            r.register_frame_loader(
                &path,
                FrameLoaderEntry {
                    bytes: Arc::new(Vec::new()),
                    filename: "casc.xyz".to_string(),
                    indexer: Arc::new(XyzIndexer),
                    total_frames: None,
                },
            )
        });

        h.session.stop_watching(&path);
        assert_eq!(h.session.with_registry(|r| r.watcher_count()), 0);
        assert_eq!(h.session.with_registry(|r| r.frame_loader_count()), 0);
    }

    #[tokio::test]
    async fn watcher_pushes_update_then_delete() {
        let mut h = harness(|_| {}, false);
        let path = write_file(&h.dir, "live.pdb", b"ATOM 1");
        h.session.start_watching(&path);
        tokio::time::sleep(Duration::from_millis(200)).await;

        fs::write(&path, b"ATOM 1\nATOM 2").unwrap();
        match next_msg(&mut h.down_rx).await {
            DownMsg::FileUpdated { file_path, data, render_type, theme } => {
                assert_eq!(file_path, path);
                assert_eq!(data.as_deref(), Some("ATOM 1\nATOM 2"));
                assert_eq!(render_type, Some(shared::RenderType::Structure));
                assert_eq!(theme.as_deref(), Some("dark"));
            }
            other => panic!("expected fileUpdated, got {other:?}"),
        }

        fs::remove_file(&path).unwrap();
        loop {
            match next_msg(&mut h.down_rx).await {
                DownMsg::FileDeleted { file_path } => {
                    assert_eq!(file_path, path);
                    break;
                }
                // A change event can slip in before the delete settles.
                DownMsg::FileUpdated { .. } => continue,
                other => panic!("expected fileDeleted, got {other:?}"),
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.session.with_registry(|r| r.watcher_count()), 0);
    }

    #[tokio::test]
    async fn watcher_creation_failure_sends_notification_and_stores_nothing() {
        let mut h = harness(|_| {}, false);
        h.session.start_watching("/no/such/dir/file.xyz");
        match next_msg(&mut h.down_rx).await {
            DownMsg::Error { message } => {
                assert!(message.contains("failed to create watcher"));
            }
            other => panic!("expected error notification, got {other:?}"),
        }
        assert_eq!(h.session.with_registry(|r| r.watcher_count()), 0);
    }

    #[tokio::test]
    async fn repeated_opens_yield_one_panel_then_reveal() {
        let h = harness(|_| {}, false);
        let path = write_file(&h.dir, "scene.cif", b"data_");

        h.session.file_opened(&path);
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.session.file_opened(&path);
        assert_eq!(h.session.with_registry(|r| r.render_timer_count()), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(h.session.with_registry(|r| r.panel_count()), 1);
        assert_eq!(h.session.with_registry(|r| r.render_timer_count()), 0);

        h.session.file_opened(&path);
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(h.factory.revealed.load(Ordering::SeqCst), 1);
        assert_eq!(h.session.with_registry(|r| r.render_timer_count()), 0);
    }

    #[tokio::test]
    async fn auto_render_disabled_creates_nothing() {
        let h = harness(|config| config.viewer.auto_render = false, false);
        let path = write_file(&h.dir, "quiet.cif", b"data_");
        h.session.file_opened(&path);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.factory.created.load(Ordering::SeqCst), 0);
        assert_eq!(h.session.with_registry(|r| r.render_timer_count()), 0);
    }

    #[tokio::test]
    async fn auto_render_failure_clears_timer_and_notifies() {
        let mut h = harness(|_| {}, true);
        let path = write_file(&h.dir, "broken.cif", b"data_");
        h.session.file_opened(&path);
        match next_msg(&mut h.down_rx).await {
            DownMsg::Error { message } => assert!(message.contains("failed to render")),
            other => panic!("expected error notification, got {other:?}"),
        }
        assert_eq!(h.session.with_registry(|r| r.render_timer_count()), 0);
        assert_eq!(h.session.with_registry(|r| r.panel_count()), 0);
    }

    #[tokio::test]
    async fn panel_disposal_drops_panel_and_timer() {
        let h = harness(|_| {}, false);
        let path = write_file(&h.dir, "gone.cif", b"data_");
        h.session.file_opened(&path);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.session.with_registry(|r| r.panel_count()), 1);

        h.session.panel_disposed(&path);
        assert_eq!(h.session.with_registry(|r| r.panel_count()), 0);
        assert_eq!(h.session.with_registry(|r| r.render_timer_count()), 0);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let h = harness(|_| {}, false);
        let path = write_file(&h.dir, "down.xyz", b"frames");
        h.session.start_watching(&path);
        h.session.file_opened(&path);
        h.session.teardown();
        h.session.teardown();
        assert_eq!(h.session.with_registry(|r| r.watcher_count()), 0);
        assert_eq!(h.session.with_registry(|r| r.render_timer_count()), 0);
    }

    #[tokio::test]
    async fn malformed_raw_messages_are_ignored() {
        let h = harness(|_| {}, false);
        h.session.handle_raw("{ not json");
        h.session.handle_raw("{\"command\":\"unknown_thing\"}");

        h.session.with_registry(|r| {
            r.register_frame_loader(
                "/raw.xyz",
                FrameLoaderEntry {
                    bytes: Arc::new(Vec::new()),
                    filename: "raw.xyz".to_string(),
                    indexer: Arc::new(XyzIndexer),
                    total_frames: None,
                },
            )
        });
        h.session
            .handle_raw("{\"command\":\"stopWatching\",\"file_path\":\"/raw.xyz\"}");
        assert_eq!(h.session.with_registry(|r| r.frame_loader_count()), 0);
    }
}
