use crate::parsers::{RenderPanel, TrajectoryIndexer};
use notify::RecommendedWatcher;
use notify_debouncer_mini::Debouncer;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Live watcher for one file path: the debouncer owns the OS watch, the task
/// forwards debounced events to the surface.
pub(crate) struct WatcherEntry {
    pub(crate) _debouncer: Debouncer<RecommendedWatcher>,
    pub(crate) task: JoinHandle<()>,
}

impl WatcherEntry {
    fn dispose(self) {
        self.task.abort();
    }
}

/// Buffered bytes plus the indexer that produced the frame index, kept for
/// later single-frame extraction.
#[derive(Clone)]
pub struct FrameLoaderEntry {
    pub bytes: Arc<Vec<u8>>,
    pub filename: String,
    pub indexer: Arc<dyn TrajectoryIndexer>,
    pub total_frames: Option<u64>,
}

/// Per-path resource maps for one session. All four maps are keyed by the
/// absolute file path; distinct paths never share state.
#[derive(Default)]
pub struct ResourceRegistry {
    watchers: HashMap<String, WatcherEntry>,
    frame_loaders: HashMap<String, FrameLoaderEntry>,
    render_timers: HashMap<String, JoinHandle<()>>,
    panels: HashMap<String, Box<dyn RenderPanel>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a watcher for `path`, disposing any previous one first.
    pub(crate) fn replace_watcher(&mut self, path: &str, entry: WatcherEntry) {
        if let Some(previous) = self.watchers.insert(path.to_string(), entry) {
            previous.dispose();
        }
    }

    /// Stop watching `path` and evict its frame loader with it; a stopped
    /// file must not keep serving stale frames.
    pub fn stop_watching(&mut self, path: &str) {
        if let Some(entry) = self.watchers.remove(path) {
            entry.dispose();
        }
        self.frame_loaders.remove(path);
    }

    /// Removal used by a watcher task reacting to its own file's deletion.
    /// The task is the caller, so its handle is dropped rather than aborted;
    /// dropping the debouncer is what stops the OS watch.
    pub(crate) fn evict_deleted(&mut self, path: &str) {
        self.watchers.remove(path);
        self.frame_loaders.remove(path);
    }

    pub fn register_frame_loader(&mut self, path: &str, entry: FrameLoaderEntry) {
        self.frame_loaders.insert(path.to_string(), entry);
    }

    pub fn frame_loader(&self, path: &str) -> Option<FrameLoaderEntry> {
        self.frame_loaders.get(path).cloned()
    }

    pub(crate) fn set_render_timer(&mut self, path: &str, task: JoinHandle<()>) {
        if let Some(previous) = self.render_timers.insert(path.to_string(), task) {
            previous.abort();
        }
    }

    pub(crate) fn cancel_render_timer(&mut self, path: &str) {
        if let Some(task) = self.render_timers.remove(path) {
            task.abort();
        }
    }

    /// Timer-entry removal from inside the fired timer task itself.
    pub(crate) fn clear_render_timer(&mut self, path: &str) {
        self.render_timers.remove(path);
    }

    pub(crate) fn insert_panel(&mut self, path: &str, panel: Box<dyn RenderPanel>) {
        self.panels.insert(path.to_string(), panel);
    }

    pub(crate) fn panel(&self, path: &str) -> Option<&dyn RenderPanel> {
        self.panels.get(path).map(|panel| panel.as_ref())
    }

    pub(crate) fn remove_panel(&mut self, path: &str) {
        self.panels.remove(path);
    }

    /// Dispose everything. Safe on empty registries and idempotent.
    pub fn teardown(&mut self) {
        for (_, entry) in self.watchers.drain() {
            entry.dispose();
        }
        for (_, task) in self.render_timers.drain() {
            task.abort();
        }
        self.frame_loaders.clear();
        self.panels.clear();
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    pub fn frame_loader_count(&self) -> usize {
        self.frame_loaders.len()
    }

    pub fn render_timer_count(&self) -> usize {
        self.render_timers.len()
    }

    pub fn panel_count(&self) -> usize {
        self.panels.len()
    }
}
