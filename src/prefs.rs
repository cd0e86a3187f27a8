//! Saved backend preference
//!
//! The file holds nothing but the backend identifier.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::audio::Backend;

/// Read the saved backend. Missing, unreadable or unknown values yield
/// `None` so the caller falls back to the default.
pub fn load_saved_backend(path: &Path) -> Option<Backend> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!(?path, %e, "no saved backend");
            return None;
        }
    };

    match contents.parse::<Backend>() {
        Ok(backend) => {
            debug!(%backend, "loaded saved backend");
            Some(backend)
        }
        Err(e) => {
            warn!(?path, %e, "ignoring saved backend");
            None
        }
    }
}

/// Persist the chosen backend
pub fn save_backend(path: &Path, backend: Backend) -> Result<()> {
    std::fs::write(path, backend.id())
        .with_context(|| format!("failed to write preferences to {}", path.display()))?;
    info!(%backend, ?path, "saved backend");
    Ok(())
}
