//! Team-scoped file store for uploaded telemetry.
//!
//! Saved files live under `<root>/<team_id>/telemetry/` with a timestamp
//! prefix so repeat uploads of the same filename never collide.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn team_dir(&self, team_id: i64) -> PathBuf {
        self.root.join(team_id.to_string()).join("telemetry")
    }

    /// Copy an uploaded file into the team's store under a
    /// collision-resistant name. Returns the stored path.
    pub fn save(&self, team_id: i64, original_filename: &str, source: &Path) -> Result<PathBuf> {
        let dir = self.team_dir(team_id);
        std::fs::create_dir_all(&dir)?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%f");
        let dest = dir.join(format!("{timestamp}_{original_filename}"));
        std::fs::copy(source, &dest)?;
        log::debug!("Stored upload at {}", dest.display());
        Ok(dest)
    }

    /// Remove a stored file. Missing files are not an error; deletion is
    /// idempotent.
    pub fn remove(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
