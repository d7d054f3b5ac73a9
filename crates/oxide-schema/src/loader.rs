//! Schema documents on disk.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::merge::{IncludeExpander, IncludeResolver};
use crate::schema::{Include, Schema};

/// Reads a JSON schema document.
pub fn load_schema_file(path: impl AsRef<Path>) -> Result<Schema> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let schema: Schema = serde_json::from_str(&contents)?;
    debug!(
        path = %path.display(),
        schema = %schema.name,
        tables = schema.tables.len(),
        includes = schema.includes.len(),
        "Loaded schema file"
    );
    Ok(schema)
}

/// Resolves includes to schema files relative to a base directory.
#[derive(Debug, Clone)]
pub struct FileIncludeResolver {
    base_dir: PathBuf,
}

impl FileIncludeResolver {
    /// Creates a resolver rooted at `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl IncludeResolver for FileIncludeResolver {
    /// Loads the fragment. Its own includes are rewritten to be relative to
    /// the base directory, so they resolve next to the fragment.
    fn resolve(&self, include: &Include) -> Result<Schema> {
        let mut fragment = load_schema_file(self.base_dir.join(&include.path))?;
        if let Some(dir) = Path::new(&include.path)
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            for nested in &mut fragment.includes {
                nested.path = dir.join(&nested.path).to_string_lossy().into_owned();
            }
        }
        Ok(fragment)
    }
}

/// Loads a schema file and expands its includes, resolved relative to the
/// file's directory. The result is validated.
pub fn load_and_expand(path: impl AsRef<Path>) -> Result<Schema> {
    let path = path.as_ref();
    let root = load_schema_file(path)?;
    let base_dir = path
        .parent()
        .map_or_else(PathBuf::new, Path::to_path_buf);
    let resolver = FileIncludeResolver::new(base_dir);
    IncludeExpander::new(&resolver).expand(&root)
}
