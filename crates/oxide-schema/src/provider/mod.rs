//! SQL providers.
//!
//! A provider renders the assembler's structural decisions into concrete SQL
//! for one database dialect: quoting, type names and statement templates.
//! The assembler owns which statements are emitted and in what order.

mod mysql;
mod postgres;
mod sqlite;

use std::fmt;

pub use mysql::MySqlProvider;
pub use postgres::PostgresProvider;
pub use sqlite::SqliteProvider;

use crate::error::{Result, SchemaError};
use crate::schema::{FieldType, OnDelete};

/// Operations whose availability differs between dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `ALTER TABLE ... RENAME TO`.
    RenameTable,
    /// `ALTER TABLE ... RENAME COLUMN`.
    RenameColumn,
    /// In-place column alteration (type, nullability, default).
    AlterColumn,
    /// `ALTER TABLE ... DROP COLUMN`.
    DropColumn,
    /// `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY`.
    AddForeignKey,
    /// Dropping a named foreign-key constraint.
    DropForeignKey,
    /// Renaming a foreign-key constraint in place.
    RenameForeignKey,
    /// `ALTER TABLE ... ADD PRIMARY KEY`.
    AddPrimaryKey,
}

impl Operation {
    /// Returns the operation's name as used in messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RenameTable => "RENAME TABLE",
            Self::RenameColumn => "RENAME COLUMN",
            Self::AlterColumn => "ALTER COLUMN",
            Self::DropColumn => "DROP COLUMN",
            Self::AddForeignKey => "ADD FOREIGN KEY",
            Self::DropForeignKey => "DROP FOREIGN KEY",
            Self::RenameForeignKey => "RENAME CONSTRAINT",
            Self::AddPrimaryKey => "ADD PRIMARY KEY",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved column, ready to be rendered.
///
/// Relation fields never reach this type: a foreign key is rendered as a
/// column of its target's key type plus a [`ForeignKeyDef`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Storage type.
    pub data_type: FieldType,
    /// Length for varchar/text.
    pub length: Option<u32>,
    /// Precision for decimal.
    pub precision: Option<u32>,
    /// Scale for decimal.
    pub scale: Option<u32>,
    /// Whether the column accepts NULL.
    pub nullable: bool,
    /// Whether the column is the primary key.
    pub primary_key: bool,
    /// Default expression, already resolved to SQL.
    pub default: Option<String>,
    /// Whether the column is refreshed on update.
    pub auto_update: bool,
}

impl ColumnDef {
    /// Creates a nullable column without default.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: FieldType) -> Self {
        Self {
            name: name.into(),
            data_type,
            length: None,
            precision: None,
            scale: None,
            nullable: true,
            primary_key: false,
            default: None,
            auto_update: false,
        }
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the column as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Sets the default expression.
    #[must_use]
    pub fn default_sql(mut self, sql: impl Into<String>) -> Self {
        self.default = Some(sql.into());
        self
    }

    /// Sets the length.
    #[must_use]
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Renames the column.
    #[must_use]
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Name of the foreign-key constraint on `table.column`.
#[must_use]
pub fn foreign_key_name(table: &str, column: &str) -> String {
    format!("fk_{table}_{column}")
}

/// A foreign-key constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDef {
    /// Constraint name.
    pub name: String,
    /// Table holding the constraint.
    pub table: String,
    /// Referencing column.
    pub column: String,
    /// Referenced table.
    pub ref_table: String,
    /// Referenced column.
    pub ref_column: String,
    /// Action on delete.
    pub on_delete: OnDelete,
}

impl ForeignKeyDef {
    /// Creates a constraint named `fk_<table>_<column>`.
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        ref_table: impl Into<String>,
        ref_column: impl Into<String>,
    ) -> Self {
        let table = table.into();
        let column = column.into();
        Self {
            name: foreign_key_name(&table, &column),
            table,
            column,
            ref_table: ref_table.into(),
            ref_column: ref_column.into(),
            on_delete: OnDelete::default(),
        }
    }

    /// Sets the on-delete action.
    #[must_use]
    pub fn on_delete(mut self, action: OnDelete) -> Self {
        self.on_delete = action;
        self
    }

    /// Overrides the constraint name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A table to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns, in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Foreign keys rendered inline.
    pub foreign_keys: Vec<ForeignKeyDef>,
}

/// An index to create or drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Index name.
    pub name: String,
    /// Indexed table.
    pub table: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether the index is unique.
    pub unique: bool,
}

/// A single in-place column alteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterColumnChange {
    /// Change the column's type to the one of the target definition.
    SetDataType,
    /// Change nullability.
    SetNullable(bool),
    /// Set the default expression.
    SetDefault(String),
    /// Drop the default.
    DropDefault,
}

fn is_numeric(symbol: &str) -> bool {
    symbol.starts_with(|c: char| c.is_ascii_digit() || c == '-') && symbol.parse::<f64>().is_ok()
}

/// Maps well-known default symbols to SQL; numbers pass through and anything
/// else becomes a string literal.
pub(crate) fn default_literal<P: Provider + ?Sized>(provider: &P, symbol: &str) -> String {
    match symbol.to_ascii_lowercase().as_str() {
        "now" | "current_timestamp" => "CURRENT_TIMESTAMP".to_string(),
        "current_date" => "CURRENT_DATE".to_string(),
        "null" => "NULL".to_string(),
        "true" => provider.boolean_literal(true).to_string(),
        "false" => provider.boolean_literal(false).to_string(),
        _ if is_numeric(symbol) => symbol.to_string(),
        _ if symbol.len() > 1 && symbol.starts_with('\'') && symbol.ends_with('\'') => {
            symbol.to_string()
        }
        _ => format!("'{}'", symbol.replace('\'', "''")),
    }
}

pub(crate) fn unsupported(provider: &str, operation: Operation) -> SchemaError {
    SchemaError::conversion(
        operation.as_str(),
        format!("not supported by {provider}"),
    )
}

/// Dialect-specific SQL rendering.
///
/// Statements are returned without a trailing semicolon.
pub trait Provider: Send + Sync {
    /// Returns the dialect name; also the key of the schema's default table.
    fn name(&self) -> &'static str;

    /// Returns whether the dialect can perform `operation` directly.
    fn supports_operation(&self, operation: Operation) -> bool;

    /// Maps a storage type to the dialect's SQL type.
    fn convert_field_type(&self, column: &ColumnDef) -> Result<String>;

    /// Renders an in-place column alteration.
    fn generate_alter_column(
        &self,
        table: &str,
        column: &ColumnDef,
        change: &AlterColumnChange,
    ) -> Result<String>;

    /// Renders dropping a named foreign-key constraint.
    fn generate_drop_foreign_key_constraint(&self, foreign_key: &ForeignKeyDef) -> Result<String>;

    /// Renders dropping an index.
    fn generate_drop_index(&self, index: &IndexDef) -> String;

    /// Returns the identifier quote character.
    fn quote_char(&self) -> char {
        '"'
    }

    /// Quotes an identifier, doubling embedded quote characters.
    fn quote_identifier(&self, name: &str) -> String {
        let q = self.quote_char();
        let escaped = name.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    /// Renders a boolean literal.
    fn boolean_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    /// Resolves a default symbol that the schema's own default table does not
    /// define. Well-known symbols map to dialect expressions, numbers pass
    /// through, anything else becomes a string literal.
    fn resolve_default(&self, symbol: &str) -> String {
        default_literal(self, symbol)
    }

    /// Returns the keyword appended to an auto-incrementing primary key.
    fn auto_increment_suffix(&self, _column: &ColumnDef) -> Option<&'static str> {
        None
    }

    /// Returns the clause refreshing a column on update, if the dialect has one.
    fn on_update_clause(&self, _column: &ColumnDef) -> Option<&'static str> {
        None
    }

    /// Renders a column definition.
    fn column_definition(&self, column: &ColumnDef) -> Result<String> {
        let mut sql = format!(
            "{} {}",
            self.quote_identifier(&column.name),
            self.convert_field_type(column)?
        );

        if column.primary_key {
            sql.push_str(" PRIMARY KEY");
            if let Some(suffix) = self.auto_increment_suffix(column) {
                sql.push(' ');
                sql.push_str(suffix);
            }
        } else if !column.nullable {
            sql.push_str(" NOT NULL");
        }

        if let Some(ref default) = column.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }

        if column.auto_update {
            if let Some(clause) = self.on_update_clause(column) {
                sql.push(' ');
                sql.push_str(clause);
            }
        }

        Ok(sql)
    }

    /// Renders the `FOREIGN KEY ... REFERENCES ...` clause shared by inline
    /// and added constraints.
    fn foreign_key_clause(&self, foreign_key: &ForeignKeyDef) -> String {
        let mut sql = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote_identifier(&foreign_key.name),
            self.quote_identifier(&foreign_key.column),
            self.quote_identifier(&foreign_key.ref_table),
            self.quote_identifier(&foreign_key.ref_column),
        );
        if foreign_key.on_delete != OnDelete::NoAction {
            sql.push_str(" ON DELETE ");
            sql.push_str(foreign_key.on_delete.to_sql());
        }
        sql
    }

    /// Renders CREATE TABLE.
    fn generate_create_table(&self, table: &TableDef) -> Result<String> {
        let mut sql = format!("CREATE TABLE {} (\n", self.quote_identifier(&table.name));

        let mut lines = Vec::with_capacity(table.columns.len() + table.foreign_keys.len());
        for column in &table.columns {
            lines.push(format!("    {}", self.column_definition(column)?));
        }
        for foreign_key in &table.foreign_keys {
            lines.push(format!("    {}", self.foreign_key_clause(foreign_key)));
        }
        sql.push_str(&lines.join(",\n"));

        sql.push_str("\n)");
        Ok(sql)
    }

    /// Renders DROP TABLE.
    fn generate_drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.quote_identifier(table))
    }

    /// Renders ADD COLUMN.
    fn generate_add_column(&self, table: &str, column: &ColumnDef) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table),
            self.column_definition(column)?
        ))
    }

    /// Renders DROP COLUMN.
    fn generate_drop_column(&self, table: &str, column: &str) -> Result<String> {
        if !self.supports_operation(Operation::DropColumn) {
            return Err(unsupported(self.name(), Operation::DropColumn));
        }
        Ok(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(column)
        ))
    }

    /// Renders a table rename.
    fn generate_rename_table(&self, from: &str, to: &str) -> Result<String> {
        if !self.supports_operation(Operation::RenameTable) {
            return Err(unsupported(self.name(), Operation::RenameTable));
        }
        Ok(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(from),
            self.quote_identifier(to)
        ))
    }

    /// Renders a column rename.
    fn generate_rename_column(&self, table: &str, from: &str, to: &str) -> Result<String> {
        if !self.supports_operation(Operation::RenameColumn) {
            return Err(unsupported(self.name(), Operation::RenameColumn));
        }
        Ok(format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote_identifier(table),
            self.quote_identifier(from),
            self.quote_identifier(to)
        ))
    }

    /// Renders CREATE INDEX.
    fn generate_create_index(&self, index: &IndexDef) -> String {
        let columns: Vec<String> = index
            .columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote_identifier(&index.name),
            self.quote_identifier(&index.table),
            columns.join(", ")
        )
    }

    /// Renders adding a foreign-key constraint to an existing table.
    fn generate_foreign_key_constraint(&self, foreign_key: &ForeignKeyDef) -> Result<String> {
        if !self.supports_operation(Operation::AddForeignKey) {
            return Err(unsupported(self.name(), Operation::AddForeignKey));
        }
        Ok(format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(&foreign_key.table),
            self.foreign_key_clause(foreign_key)
        ))
    }

    /// Renders renaming a foreign-key constraint.
    fn generate_rename_foreign_key_constraint(
        &self,
        table: &str,
        from: &str,
        to: &str,
    ) -> Result<String> {
        if !self.supports_operation(Operation::RenameForeignKey) {
            return Err(unsupported(self.name(), Operation::RenameForeignKey));
        }
        Ok(format!(
            "ALTER TABLE {} RENAME CONSTRAINT {} TO {}",
            self.quote_identifier(table),
            self.quote_identifier(from),
            self.quote_identifier(to)
        ))
    }

    /// Renders adding a primary key over `columns`.
    fn generate_add_primary_key(&self, table: &str, columns: &[String]) -> Result<String> {
        if !self.supports_operation(Operation::AddPrimaryKey) {
            return Err(unsupported(self.name(), Operation::AddPrimaryKey));
        }
        let columns: Vec<String> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        Ok(format!(
            "ALTER TABLE {} ADD PRIMARY KEY ({})",
            self.quote_identifier(table),
            columns.join(", ")
        ))
    }
}

/// Dialect names accepted by [`provider_for`].
pub const DIALECTS: &[&str] = &["postgresql", "mysql", "sqlite"];

/// Returns the provider for a dialect name (`postgres` is accepted as an alias).
#[must_use]
pub fn provider_for(dialect: &str) -> Option<Box<dyn Provider>> {
    match dialect.to_ascii_lowercase().as_str() {
        "postgresql" | "postgres" => Some(Box::new(PostgresProvider::new())),
        "mysql" => Some(Box::new(MySqlProvider::new())),
        "sqlite" => Some(Box::new(SqliteProvider::new())),
        _ => None,
    }
}

/// Error for rendering a relation type as a column type.
pub(crate) fn relation_type_error(column: &ColumnDef) -> SchemaError {
    SchemaError::conversion(
        format!("column '{}'", column.name),
        format!(
            "{} is a relation and has no column type of its own",
            column.data_type
        ),
    )
}
