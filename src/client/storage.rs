//! Durable local copy of the selection

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::relay::Selection;

use super::ClientError;

/// One JSON file holding the current selection array.
///
/// Outlives the relay connection and is read back on startup.
#[derive(Debug, Clone)]
pub struct SelectionStore {
    path: PathBuf,
}

impl SelectionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored selection.
    ///
    /// Returns `None` when nothing is stored. Unreadable or malformed content
    /// is logged and treated the same way.
    pub async fn load(&self) -> Option<Selection> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored selection");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read stored selection");
                return None;
            }
        };

        match serde_json::from_str::<Selection>(&raw) {
            Ok(selection) => Some(selection),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring malformed stored selection");
                None
            }
        }
    }

    /// Replace the stored selection
    pub async fn save(&self, selection: &Selection) -> Result<(), ClientError> {
        let json = serde_json::to_vec(selection)?;

        // Write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
