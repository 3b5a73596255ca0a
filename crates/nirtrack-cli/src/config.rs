use std::path::PathBuf;

/// Run defaults, loaded from environment variables. Command-line flags win.
pub struct Config {
    /// Output JSON path (default: Output.json).
    pub output: PathBuf,
    /// Frames to skip before the seed frame.
    pub skip_frames: usize,
    /// Frames to record after the seed frame; 0 records until the sequence ends.
    pub max_frames: usize,
}

impl Config {
    /// Load configuration from `NIRTRACK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            output: std::env::var("NIRTRACK_OUTPUT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("Output.json")),
            skip_frames: env_usize("NIRTRACK_SKIP_FRAMES", 0),
            max_frames: env_usize("NIRTRACK_MAX_FRAMES", 500),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
