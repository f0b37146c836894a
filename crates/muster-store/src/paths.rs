//! Project-scoped state directory resolution.
//!
//! XDG-first, `dirs`-fallback resolution, pointed at the state
//! directory since this crate's files (`storage.json`, `runs/`,
//! `adaptive-limits.json`) are mutable runtime state, not configuration.

use std::path::PathBuf;

/// Environment variable that overrides the resolved state directory.
pub const STATE_DIR_ENV: &str = "MUSTER_STATE_DIR";

/// Return the muster state directory.
///
/// Resolution order: `$MUSTER_STATE_DIR` > `$XDG_STATE_HOME/muster` >
/// `~/.local/state/muster`.
pub fn state_dir() -> PathBuf {
    if let Ok(explicit) = std::env::var(STATE_DIR_ENV) {
        return PathBuf::from(explicit);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("muster");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("state")
        .join("muster")
}

/// Path to `storage.json` under the state directory.
pub fn storage_path(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("storage.json")
}

/// Path to the `runs/` directory under the state directory.
pub fn runs_dir(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("runs")
}

/// Path to a single run payload file.
pub fn run_payload_path(state_dir: &std::path::Path, run_id: uuid::Uuid) -> PathBuf {
    runs_dir(state_dir).join(format!("{run_id}.json"))
}

/// Path to `adaptive-limits.json` under the state directory.
pub fn adaptive_limits_path(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("adaptive-limits.json")
}
