use serde::{Serialize, Deserialize};

// ===== MESSAGE TYPES =====

/// Surface -> host messages. The `command` tag and the field names are the
/// wire contract; correlated commands carry a `request_id`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "command")]
pub enum UpMsg {
    #[serde(rename = "request_large_file")]
    RequestLargeFile {
        request_id: String,
        file_path: String,
        filename: String,
        is_compressed: bool,
    },
    #[serde(rename = "request_frame")]
    RequestFrame {
        request_id: String,
        file_path: String,
        frame_index: u64,
    },
    #[serde(rename = "startWatching")]
    StartWatching {
        file_path: String,
        filename: Option<String>,
        frame_index: Option<u64>,
    },
    #[serde(rename = "stopWatching")]
    StopWatching { file_path: String },
}

/// Host -> surface messages. Terminal responses carry either a payload or an
/// `error` string, never both.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "command")]
pub enum DownMsg {
    #[serde(rename = "large_file_progress")]
    LargeFileProgress {
        request_id: String,
        stage: LoadStage,
        progress: u8,
    },
    #[serde(rename = "large_file_response")]
    LargeFileResponse {
        request_id: String,
        content: Option<String>,
        #[serde(default)]
        is_base64: bool,
        parsed: Option<ParsedTrajectoryPayload>,
        error: Option<String>,
    },
    #[serde(rename = "frame_response")]
    FrameResponse {
        request_id: String,
        frame_index: u64,
        frame: Option<serde_json::Value>,
        error: Option<String>,
    },
    #[serde(rename = "fileUpdated")]
    FileUpdated {
        file_path: String,
        data: Option<String>,
        #[serde(rename = "type")]
        render_type: Option<RenderType>,
        theme: Option<String>,
    },
    #[serde(rename = "fileDeleted")]
    FileDeleted { file_path: String },
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoadStage {
    Reading,
    Parsing,
    Complete,
}

// ===== PARSED CONTENT TYPES =====

/// Output of the external parser contract: `parse(content, filename, options)
/// -> {type, data}`. The payload shape is owned by the format codecs and is
/// opaque to this layer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub data: serde_json::Value,
}

/// Pre-parsed terminal payload for a large trajectory the host has indexed.
/// `supports_frame_streaming` tells the surface it may fetch frames on demand.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ParsedTrajectoryPayload {
    pub parsed_trajectory: ParsedDocument,
    pub is_parsed: bool,
    pub supports_frame_streaming: bool,
    pub file_path: String,
    pub total_frames: Option<u64>,
}

/// Metadata enabling later per-frame fetches against a host-held buffer.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrajectoryFrameHandle {
    pub filename: String,
    pub file_path: String,
    pub total_frames: Option<u64>,
}

// ===== STREAMING PROGRESS =====

/// Progress of a single host-side read. Successive reports within one read
/// are non-decreasing and the terminal report has `progress == 1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamingProgress {
    pub bytes_read: u64,
    pub total_size: u64,
    pub progress: f64,
}

impl StreamingProgress {
    pub fn new(bytes_read: u64, total_size: u64) -> Self {
        let progress = if total_size == 0 {
            1.0
        } else {
            bytes_read as f64 / total_size as f64
        };
        Self { bytes_read, total_size, progress }
    }
}

// ===== LARGE FILE SENTINEL =====

pub const LARGE_FILE_SENTINEL_PREFIX: &str = "LARGE_FILE:";

/// Placeholder returned in place of file content when the file is too large
/// to hand over directly. Wire format: `LARGE_FILE:<absolute_path>:<bytes>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargeFileSentinel {
    pub file_path: String,
    pub file_size: u64,
}

impl LargeFileSentinel {
    pub fn new(file_path: impl Into<String>, file_size: u64) -> Self {
        Self { file_path: file_path.into(), file_size }
    }

    pub fn encode(&self) -> String {
        format!("{}{}:{}", LARGE_FILE_SENTINEL_PREFIX, self.file_path, self.file_size)
    }

    /// Decode a sentinel string. The size is split off from the right so that
    /// paths containing `:` survive the round trip.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix(LARGE_FILE_SENTINEL_PREFIX)?;
        let (file_path, size_text) = rest.rsplit_once(':')?;
        if file_path.is_empty() {
            return None;
        }
        let file_size = size_text.parse::<u64>().ok()?;
        Some(Self { file_path: file_path.to_string(), file_size })
    }
}

pub fn is_large_file_sentinel(text: &str) -> bool {
    LargeFileSentinel::parse(text).is_some()
}

// ===== RENDER TYPES =====

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RenderType {
    Trajectory,
    Structure,
}

pub fn get_file_extension(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Multi-frame trajectory formats that the frame-indexed path applies to.
pub fn is_trajectory_file(path: &str) -> bool {
    matches!(
        get_file_extension(path).as_deref(),
        Some("xyz" | "dcd" | "xtc" | "trr" | "nc" | "traj" | "lammpstrj")
    )
}

pub fn infer_render_type(path: &str) -> Option<RenderType> {
    match get_file_extension(path)?.as_str() {
        "xyz" | "dcd" | "xtc" | "trr" | "nc" | "traj" | "lammpstrj" => {
            Some(RenderType::Trajectory)
        }
        "pdb" | "cif" | "mmcif" | "gro" | "mol2" | "sdf" => Some(RenderType::Structure),
        _ => None,
    }
}

// ===== CONFIG TYPES =====

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub viewer: ViewerSection,
    #[serde(default)]
    pub streaming: StreamingSection,
}

// AppSection carries configuration metadata, primarily for versioning.
// The version field lets load-time migration recognize stale config files.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppSection {
    pub version: String,
}

impl AppSection {
    /// Current configuration format version
    pub const CURRENT_VERSION: &'static str = "1.0.0";

    pub fn is_supported_version(&self) -> bool {
        match self.version.as_str() {
            "1.0.0" => true,
            _ => false,
        }
    }

    pub fn get_migration_strategy(&self) -> MigrationStrategy {
        if self.is_supported_version() {
            MigrationStrategy::None
        } else {
            MigrationStrategy::Recreate
        }
    }
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationStrategy {
    None,     // No migration needed
    Recreate, // Unknown version, create new config
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ViewerSection {
    pub auto_render: bool,
    pub auto_render_delay_ms: u64,
    pub theme: String,
}

impl Default for ViewerSection {
    fn default() -> Self {
        Self {
            auto_render: true,
            auto_render_delay_ms: 100,
            theme: "dark".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StreamingSection {
    /// Above this many bytes, opening a file yields a sentinel instead of
    /// content.
    pub open_threshold_bytes: u64,
    /// Above this many bytes, streaming reads are refused outright.
    pub hard_cap_bytes: u64,
    /// Above this many bytes, streaming reads proceed with a warning.
    pub warn_threshold_bytes: u64,
    pub frame_timeout_ms: u64,
    pub large_file_timeout_ms: u64,
    pub stream_timeout_ms: u64,
    pub watch_debounce_ms: u64,
}

const GIB: u64 = 1024 * 1024 * 1024;

impl Default for StreamingSection {
    fn default() -> Self {
        Self {
            open_threshold_bytes: GIB,
            hard_cap_bytes: 2 * GIB,
            warn_threshold_bytes: GIB,
            frame_timeout_ms: 10_000,
            large_file_timeout_ms: 30_000,
            stream_timeout_ms: 600_000,
            watch_debounce_ms: 250,
        }
    }
}

/// Floor applied to watcher debounce intervals.
pub const MIN_WATCH_DEBOUNCE_MS: u64 = 50;

impl AppConfig {
    /// Validate the loaded config, fixing what can be fixed in place.
    /// Returns a human-readable warning per applied fix.
    pub fn validate_and_fix(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.app.get_migration_strategy() == MigrationStrategy::Recreate {
            warnings.push(format!(
                "unsupported config version '{}', recreating defaults",
                self.app.version
            ));
            *self = AppConfig::default();
            return warnings;
        }

        let streaming = &mut self.streaming;
        if streaming.hard_cap_bytes == 0 {
            warnings.push("hard_cap_bytes must be positive, restoring default".to_string());
            streaming.hard_cap_bytes = StreamingSection::default().hard_cap_bytes;
        }
        if streaming.warn_threshold_bytes > streaming.hard_cap_bytes {
            warnings.push(format!(
                "warn_threshold_bytes {} exceeds hard_cap_bytes {}, clamping",
                streaming.warn_threshold_bytes, streaming.hard_cap_bytes
            ));
            streaming.warn_threshold_bytes = streaming.hard_cap_bytes;
        }
        if streaming.open_threshold_bytes > streaming.hard_cap_bytes {
            warnings.push(format!(
                "open_threshold_bytes {} exceeds hard_cap_bytes {}, clamping",
                streaming.open_threshold_bytes, streaming.hard_cap_bytes
            ));
            streaming.open_threshold_bytes = streaming.hard_cap_bytes;
        }
        for (label, value, fallback) in [
            ("frame_timeout_ms", &mut streaming.frame_timeout_ms, 10_000u64),
            ("large_file_timeout_ms", &mut streaming.large_file_timeout_ms, 30_000),
            ("stream_timeout_ms", &mut streaming.stream_timeout_ms, 600_000),
        ] {
            if *value == 0 {
                warnings.push(format!("{label} must be positive, restoring default"));
                *value = fallback;
            }
        }
        if streaming.watch_debounce_ms < MIN_WATCH_DEBOUNCE_MS {
            warnings.push(format!(
                "watch_debounce_ms below {MIN_WATCH_DEBOUNCE_MS}ms floor, raising"
            ));
            streaming.watch_debounce_ms = MIN_WATCH_DEBOUNCE_MS;
        }

        if self.viewer.auto_render_delay_ms == 0 {
            warnings.push("auto_render_delay_ms must be positive, restoring default".to_string());
            self.viewer.auto_render_delay_ms = ViewerSection::default().auto_render_delay_ms;
        }

        warnings
    }
}
