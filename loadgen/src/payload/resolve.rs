use std::path::{Path, PathBuf};

use crate::config::ConfigError;

/// Directory holding the payload files bundled with this package.
const BUNDLED_PAYLOAD_DIR: &str = "payloads";

/// Locations tried, in order, for a payload path given on the command line.
///
/// Relative paths are tried against the working directory first, then next to
/// the executable (as given and by file name only) and finally against this
/// package's directory, so the tool runs the same from the repository root,
/// from its own directory or through `cargo run`.
pub fn payload_path_candidates(raw: &Path) -> Vec<PathBuf> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    candidates_in(raw, exe_dir.as_deref(), Path::new(env!("CARGO_MANIFEST_DIR")))
}

pub fn resolve_payload_path(raw: &Path) -> Result<PathBuf, ConfigError> {
    let candidates = payload_path_candidates(raw);
    first_existing(raw, candidates)
}

fn candidates_in(raw: &Path, exe_dir: Option<&Path>, package_dir: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![raw.to_path_buf()];
    if raw.is_absolute() {
        return candidates;
    }

    if let Some(dir) = exe_dir {
        candidates.push(dir.join(raw));
        if let Some(name) = raw.file_name() {
            candidates.push(dir.join(name));
        }
    }

    candidates.push(package_dir.join(raw));
    if let Some(name) = raw.file_name() {
        candidates.push(package_dir.join(BUNDLED_PAYLOAD_DIR).join(name));
    }

    let mut unique = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}

fn first_existing(raw: &Path, candidates: Vec<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(found) = candidates.iter().find(|c| c.is_file()) {
        return Ok(found.clone());
    }

    Err(ConfigError::PayloadNotFound {
        source: raw.display().to_string(),
        tried: candidates
            .iter()
            .map(|c| c.display().to_string())
            .collect(),
    })
}
