//! Last-generated schema snapshot.
//!
//! The snapshot is the schema that the most recent migration brought the
//! database to. The next `generate` diffs against it; a missing snapshot
//! means the next migration is the initial one.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::Result;
use crate::schema::Schema;

/// File name of the snapshot inside the migrations directory.
pub const SNAPSHOT_FILE: &str = ".oxide_schema_snapshot.json";

/// Stores the snapshot next to the migrations it describes.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Creates a store for `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the snapshot path.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    /// Loads the snapshot, or `None` if there is none yet.
    pub fn load(&self) -> Result<Option<Schema>> {
        let path = self.path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No snapshot found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let schema: Schema = serde_json::from_str(&contents)?;
        debug!(path = %path.display(), tables = schema.tables.len(), "Loaded snapshot");
        Ok(Some(schema))
    }

    /// Replaces the snapshot with `schema`.
    ///
    /// The new contents are written to a temporary file in the same directory
    /// and renamed over the old snapshot, so readers see either the old or the
    /// new snapshot in full.
    pub fn save(&self, schema: &Schema) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path();

        let mut file = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut file, schema)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&path).map_err(|e| e.error)?;

        info!(path = %path.display(), tables = schema.tables.len(), "Saved snapshot");
        Ok(path)
    }

    /// Returns true if a snapshot exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path().is_file()
    }
}
