//! Migration file generation.
//!
//! Plans are rendered in the goose annotation format so the files can be
//! applied by any goose-compatible runner.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::plan::MigrationPlan;

/// Turns free text into a filename slug: lowercase ASCII alphanumerics
/// separated by single underscores.
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

fn render_section(out: &mut String, direction: &str, statements: &[String]) {
    out.push_str("-- +goose ");
    out.push_str(direction);
    out.push_str("\n-- +goose StatementBegin\n");
    for statement in statements {
        out.push_str(statement);
        out.push('\n');
    }
    out.push_str("-- +goose StatementEnd\n");
}

impl MigrationPlan {
    /// Renders the migration file contents.
    ///
    /// The Down section is left out when the plan has no Down statements.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        render_section(&mut out, "Up", &self.up);
        if !self.down.is_empty() {
            out.push('\n');
            render_section(&mut out, "Down", &self.down);
        }
        out
    }
}

/// Writes migration files into a directory.
#[derive(Debug, Clone)]
pub struct MigrationWriter {
    dir: PathBuf,
}

impl MigrationWriter {
    /// Creates a writer for `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the migrations directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `plan` to `<dir>/<filename>` and returns the path.
    ///
    /// The directory is created if needed. An existing file is never
    /// overwritten; the call fails with an `AlreadyExists` I/O error instead.
    pub fn write(&self, plan: &MigrationPlan) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(&plan.filename);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(plan.render().as_bytes())?;
        file.sync_all()?;

        info!(
            path = %path.display(),
            statements = plan.up.len(),
            "Wrote migration"
        );
        Ok(path)
    }

    /// Writes `plan` unless it has no Up statements, which happens when every
    /// change was omitted or had no effect on the dialect.
    pub fn write_non_empty(&self, plan: &MigrationPlan) -> Result<Option<PathBuf>> {
        if plan.is_empty() {
            info!(filename = %plan.filename, "Plan has no statements, nothing written");
            return Ok(None);
        }
        self.write(plan).map(Some)
    }
}
