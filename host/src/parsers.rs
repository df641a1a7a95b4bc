use shared::{ParsedDocument, RenderType};

/// Result of indexing a trajectory buffer once, up front. Frame payloads are
/// extracted later, one at a time, against the same buffer.
#[derive(Debug, Clone)]
pub struct IndexedTrajectory {
    pub document: ParsedDocument,
    pub total_frames: Option<u64>,
}

/// Seam for the out-of-scope trajectory codecs. Implementations parse the
/// host's already-buffered bytes; errors cross this seam as strings because
/// they ultimately travel the channel in a terminal response's `error` field.
pub trait TrajectoryIndexer: Send + Sync {
    fn can_index(&self, filename: &str) -> bool;

    fn index(&self, bytes: &[u8], filename: &str) -> Result<IndexedTrajectory, String>;

    /// Extract exactly one frame. `Ok(None)` means the index is past the end
    /// of the trajectory.
    fn extract_frame(
        &self,
        bytes: &[u8],
        filename: &str,
        frame_index: u64,
    ) -> Result<Option<serde_json::Value>, String>;
}

/// Seam for the out-of-scope rendering layer. Implementations must not call
/// back into the owning session from `reveal`; it runs under the registry
/// lock.
pub trait RenderPanel: Send + Sync {
    fn reveal(&self);
}

pub trait PanelFactory: Send + Sync {
    fn create(
        &self,
        file_path: &str,
        render_type: Option<RenderType>,
        content: &[u8],
    ) -> Result<Box<dyn RenderPanel>, String>;
}

/// No-op factory for embedders and tooling that do not render.
#[derive(Clone, Default)]
pub struct NullPanelFactory;

struct NullPanel;

impl RenderPanel for NullPanel {
    fn reveal(&self) {}
}

impl PanelFactory for NullPanelFactory {
    fn create(
        &self,
        _file_path: &str,
        _render_type: Option<RenderType>,
        _content: &[u8],
    ) -> Result<Box<dyn RenderPanel>, String> {
        Ok(Box::new(NullPanel))
    }
}
