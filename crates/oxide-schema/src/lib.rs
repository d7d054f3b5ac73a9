//! Declarative schema migrations for SQL databases.
//!
//! `oxide-schema` compares two versions of a declarative schema and produces a
//! reversible SQL migration:
//! - Tables are ordered by their foreign keys, with cycles reported or deferred
//! - Changes are classified as safe or destructive before any SQL is emitted
//! - Destructive changes go through a caller-supplied disposition handler
//! - SQL generation is dialect-aware (PostgreSQL, MySQL, SQLite)
//!
//! # Architecture
//!
//! - **Schema** - The declarative data model and its validation
//! - **Merge** - Composes a schema with its included fragments
//! - **Graph** - Dependency graph and table creation order
//! - **Diff** - Ordered change set between two schemas
//! - **Plan** - Turns a change set into paired Up/Down statements
//! - **Provider** - Database-specific SQL rendering
//! - **Writer** - Goose-format migration files
//! - **Snapshot** - The schema of the last generated migration
//!
//! # Example
//!
//! ```rust
//! use oxide_schema::prelude::*;
//!
//! let old = Schema::new("app").table(
//!     Table::new("users").field(Field::new("id", FieldType::Serial).primary_key()),
//! );
//! let new = Schema::new("app").table(
//!     Table::new("users")
//!         .field(Field::new("id", FieldType::Serial).primary_key())
//!         .field(Field::new("email", FieldType::Varchar).length(255)),
//! );
//!
//! let diff = diff_schemas(Some(&old), Some(&new));
//! let provider = PostgresProvider::new();
//! let plan = MigrationPlanner::new(&provider)
//!     .assemble(&diff, Some(&old), &new, &mut AlwaysReview)
//!     .unwrap();
//!
//! assert_eq!(
//!     plan.up,
//!     vec!["ALTER TABLE \"users\" ADD COLUMN \"email\" VARCHAR(255);"]
//! );
//! assert_eq!(plan.down, vec!["ALTER TABLE \"users\" DROP COLUMN \"email\";"]);
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Validate a schema and its includes
//! oxide-schema check schema.json
//!
//! # Show the change set against the last generated migration
//! oxide-schema diff schema.json
//!
//! # Write the next migration
//! oxide-schema --dialect postgresql generate schema.json --destructive prompt
//! ```

pub mod diff;
pub mod error;
pub mod graph;
pub mod loader;
pub mod merge;
pub mod plan;
pub mod provider;
pub mod schema;
pub mod snapshot;
pub mod writer;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::diff::{diff_schemas, Change, ChangeKind, FieldProperty, SchemaDiff};
    pub use crate::error::{Result, SchemaError};
    pub use crate::graph::{CreationOrder, CyclePolicy, DependencyGraph};
    pub use crate::loader::{load_and_expand, load_schema_file, FileIncludeResolver};
    pub use crate::merge::{merge_schemas, ExpansionState, IncludeExpander, IncludeResolver};
    pub use crate::plan::{
        AlwaysReview, DestructiveChangeHandler, Disposition, MigrationPlan, MigrationPlanner,
        PlanOptions,
    };
    pub use crate::provider::{
        provider_for, MySqlProvider, Operation, PostgresProvider, Provider, SqliteProvider,
    };
    pub use crate::schema::{
        Field, FieldType, Include, Index, OnDelete, Reference, Schema, Table,
    };
    pub use crate::snapshot::SnapshotStore;
    pub use crate::writer::{slugify, MigrationWriter};
}
