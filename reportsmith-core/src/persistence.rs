//! Run artifacts on disk: atomic file writes and the per-run output directory.
//!
//! A finished run is written to `<output dir>/<run id>/` as `report.md` (when a
//! report was produced) and `run.json` (the serialized [`RunState`]).

use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::research::state::RunState;

pub const REPORT_FILE: &str = "report.md";
pub const STATE_FILE: &str = "run.json";

/// Atomically write JSON data to a file.
///
/// Serializes `data` to pretty-printed JSON, writes a `.tmp` sibling, then
/// renames it over the target. Creates parent directories if needed.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Atomically write raw bytes to a file.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}

/// Paths written for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifacts {
    pub dir: PathBuf,
    pub report: Option<PathBuf>,
    pub state: PathBuf,
}

/// Write the artifacts of `state` below `output_dir`.
pub fn write_run(output_dir: &Path, state: &RunState) -> Result<RunArtifacts> {
    let dir = output_dir.join(state.id.to_string());

    let report = match &state.report {
        Some(text) => {
            let path = dir.join(REPORT_FILE);
            atomic_write(&path, text.as_bytes())?;
            Some(path)
        }
        None => None,
    };

    let state_path = dir.join(STATE_FILE);
    atomic_write_json(&state_path, state)?;

    info!(run = %state.id, dir = %dir.display(), "Run artifacts written");
    Ok(RunArtifacts {
        dir,
        report,
        state: state_path,
    })
}

/// Load a previously written `run.json`. Returns `Ok(None)` if it doesn't exist.
pub fn load_run(run_dir: &Path) -> Result<Option<RunState>> {
    let path = run_dir.join(STATE_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(&path)?;
    Ok(Some(serde_json::from_str(&data)?))
}
