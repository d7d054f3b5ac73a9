//! Schema representation types.
//!
//! These types describe the declarative form of a database: tables, fields,
//! indexes, relationships and included fragments. They are what the parser
//! produces, what the merge engine composes, what the diff engine compares and
//! what the snapshot file stores between runs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// Separator marking a namespaced (cross-module) table reference.
pub const NAMESPACE_SEPARATOR: char = '.';

/// Returns true if `table` refers to a table in another module.
#[must_use]
pub fn is_namespaced(table: &str) -> bool {
    table.contains(NAMESPACE_SEPARATOR)
}

/// Field types supported by the declarative schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Variable-length character string.
    Varchar,
    /// Unbounded text.
    Text,
    /// Integer (32-bit).
    Integer,
    /// Big integer (64-bit).
    Bigint,
    /// Floating point.
    Float,
    /// Fixed-point decimal with precision and scale.
    Decimal,
    /// Boolean.
    Boolean,
    /// Date only.
    Date,
    /// Time only.
    Time,
    /// Date and time.
    Timestamp,
    /// UUID.
    Uuid,
    /// JSON document.
    Json,
    /// Binary JSON document.
    Jsonb,
    /// Auto-incrementing integer.
    Serial,
    /// Reference to another table's primary key.
    ForeignKey,
    /// Many-to-many relation, materialized as a junction table.
    ManyToMany,
}

impl FieldType {
    /// Safe promotions: transitions that never lose data.
    const SAFE_PROMOTIONS: &'static [(Self, Self)] = &[
        (Self::Integer, Self::Bigint),
        (Self::Varchar, Self::Text),
        (Self::Float, Self::Decimal),
    ];

    /// Returns true if converting a column from `self` to `to` cannot lose data.
    #[must_use]
    pub fn promotes_to(self, to: Self) -> bool {
        Self::SAFE_PROMOTIONS.contains(&(self, to))
    }

    /// Returns true for relation types that carry a reference.
    #[must_use]
    pub fn is_relation(self) -> bool {
        matches!(self, Self::ForeignKey | Self::ManyToMany)
    }

    /// Returns true for types whose length is meaningful.
    #[must_use]
    pub fn has_length(self) -> bool {
        matches!(self, Self::Varchar | Self::Text)
    }

    /// Returns the declarative name of the type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Varchar => "varchar",
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Bigint => "bigint",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::Uuid => "uuid",
            Self::Json => "json",
            Self::Jsonb => "jsonb",
            Self::Serial => "serial",
            Self::ForeignKey => "foreign_key",
            Self::ManyToMany => "many_to_many",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Foreign key action on delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    /// No action (error if referenced row is deleted).
    #[default]
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete to referencing rows.
    Cascade,
    /// Set the referencing column to NULL.
    SetNull,
    /// Set the referencing column to its default value.
    SetDefault,
}

impl OnDelete {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// Target of a foreign key or many-to-many field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Referenced table name.
    pub table: String,
    /// Action on delete.
    #[serde(default)]
    pub on_delete: OnDelete,
}

impl Reference {
    /// Creates a reference with the default on-delete policy.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            on_delete: OnDelete::default(),
        }
    }
}

/// Schema definition for a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field (column) name.
    pub name: String,
    /// Declarative type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Nullability; unset means nullable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
    /// Length for varchar/text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    /// Precision for decimal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    /// Scale for decimal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
    /// Whether this field is the primary key.
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,
    /// Timestamp set on insert.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_create: bool,
    /// Timestamp refreshed on update.
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_update: bool,
    /// Symbolic default, resolved through the dialect's default table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Target of a foreign_key or many_to_many field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Reference>,
    /// Previous name, when this field was renamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

impl Field {
    /// Creates a new field.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: None,
            length: None,
            precision: None,
            scale: None,
            primary_key: false,
            auto_create: false,
            auto_update: false,
            default: None,
            references: None,
            renamed_from: None,
        }
    }

    /// Creates a foreign key field referencing `table`.
    #[must_use]
    pub fn foreign_key(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self::new(name, FieldType::ForeignKey).references(Reference::new(table))
    }

    /// Creates a many-to-many field referencing `table`.
    #[must_use]
    pub fn many_to_many(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self::new(name, FieldType::ManyToMany).references(Reference::new(table))
    }

    /// Sets the field as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = Some(false);
        self
    }

    /// Sets the field as explicitly nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = Some(true);
        self
    }

    /// Sets the length.
    #[must_use]
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Sets precision and scale.
    #[must_use]
    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Sets the field as the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Sets the field to be filled on insert.
    #[must_use]
    pub fn auto_create(mut self) -> Self {
        self.auto_create = true;
        self
    }

    /// Sets the field to be refreshed on update.
    #[must_use]
    pub fn auto_update(mut self) -> Self {
        self.auto_update = true;
        self
    }

    /// Sets the symbolic default.
    #[must_use]
    pub fn default_value(mut self, symbol: impl Into<String>) -> Self {
        self.default = Some(symbol.into());
        self
    }

    /// Sets the reference target.
    #[must_use]
    pub fn references(mut self, reference: Reference) -> Self {
        self.references = Some(reference);
        self
    }

    /// Sets the on-delete policy of the reference, if any.
    #[must_use]
    pub fn on_delete(mut self, action: OnDelete) -> Self {
        if let Some(reference) = self.references.as_mut() {
            reference.on_delete = action;
        }
        self
    }

    /// Marks the field as renamed from `old_name`.
    #[must_use]
    pub fn renamed_from(mut self, old_name: impl Into<String>) -> Self {
        self.renamed_from = Some(old_name.into());
        self
    }

    /// Returns the effective nullability (unset means nullable).
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable.unwrap_or(true)
    }

    /// Returns the default symbol, treating an empty string as no default.
    #[must_use]
    pub fn default_symbol(&self) -> Option<&str> {
        self.default.as_deref().filter(|d| !d.is_empty())
    }

    /// Returns the referenced table of a foreign_key field.
    ///
    /// Many-to-many fields are excluded: they never create a column.
    #[must_use]
    pub fn foreign_key_target(&self) -> Option<&str> {
        match (self.field_type, &self.references) {
            (FieldType::ForeignKey, Some(reference)) => Some(reference.table.as_str()),
            _ => None,
        }
    }

    /// Returns a short human-readable type description (e.g. `varchar(255)`).
    #[must_use]
    pub fn type_label(&self) -> String {
        match (self.field_type, self.length, self.precision, self.scale) {
            (t, Some(len), _, _) if t.has_length() => format!("{t}({len})"),
            (FieldType::Decimal, _, Some(p), Some(s)) => format!("decimal({p}, {s})"),
            (FieldType::Decimal, _, Some(p), None) => format!("decimal({p})"),
            (t, ..) if t.is_relation() => match &self.references {
                Some(reference) => format!("{t}({})", reference.table),
                None => t.to_string(),
            },
            (t, ..) => t.to_string(),
        }
    }
}

/// Schema definition for an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Fields included in the index, in order.
    pub fields: Vec<String>,
    /// Whether this is a unique index.
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
}

impl Index {
    /// Creates a new non-unique index.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            name: name.into(),
            fields,
            unique: false,
        }
    }

    /// Makes this a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Returns true if the two indexes have the same shape (fields and uniqueness).
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.fields == other.fields && self.unique == other.unique
    }
}

/// Schema definition for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Field definitions, in declaration order.
    #[serde(default)]
    pub fields: Vec<Field>,
    /// Index definitions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Index>,
    /// Previous name, when this table was renamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renamed_from: Option<String>,
}

impl Table {
    /// Creates a new table schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            indexes: Vec::new(),
            renamed_from: None,
        }
    }

    /// Adds a field to the table.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Marks the table as renamed from `old_name`.
    #[must_use]
    pub fn renamed_from(mut self, old_name: impl Into<String>) -> Self {
        self.renamed_from = Some(old_name.into());
        self
    }

    /// Gets a field by name.
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Gets a mutable field by name.
    #[must_use]
    pub fn get_field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// Gets an index by name.
    #[must_use]
    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Returns the primary key field, if any.
    #[must_use]
    pub fn primary_key(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Returns the foreign_key fields of this table.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|f| f.foreign_key_target().is_some())
    }

    /// Returns the many_to_many fields of this table.
    pub fn many_to_many_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|f| f.field_type == FieldType::ManyToMany)
    }
}

/// Reference to an external schema fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Include {
    /// Module identifier.
    pub module: String,
    /// Path of the fragment, interpreted by the resolver.
    pub path: String,
}

impl Include {
    /// Creates a new include.
    #[must_use]
    pub fn new(module: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            path: path.into(),
        }
    }

    /// Returns the identity used to detect repeated and cyclic includes.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}:{}", self.module, self.path)
    }
}

/// The complete declarative schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Database name.
    pub name: String,
    /// Schema version.
    #[serde(default)]
    pub version: String,
    /// Default-value symbol table, keyed by dialect name then symbol.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defaults: BTreeMap<String, BTreeMap<String, String>>,
    /// Tables, in declaration order.
    #[serde(default)]
    pub tables: Vec<Table>,
    /// Included fragments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<Include>,
}

impl Schema {
    /// Creates a new empty schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Adds a table to the schema.
    #[must_use]
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// Adds an include.
    #[must_use]
    pub fn include(mut self, include: Include) -> Self {
        self.includes.push(include);
        self
    }

    /// Registers a dialect-specific value for a default symbol.
    #[must_use]
    pub fn default_symbol(
        mut self,
        dialect: impl Into<String>,
        symbol: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        self.defaults
            .entry(dialect.into())
            .or_default()
            .insert(symbol.into(), sql.into());
        self
    }

    /// Looks up a default symbol in this schema's table for `dialect`.
    #[must_use]
    pub fn lookup_default(&self, dialect: &str, symbol: &str) -> Option<&str> {
        self.defaults
            .get(dialect)
            .and_then(|symbols| symbols.get(symbol))
            .map(String::as_str)
    }

    /// Gets a table by name.
    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Gets a mutable table by name.
    #[must_use]
    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    /// Returns table names.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    /// Checks the structural invariants of the schema.
    ///
    /// Every violation is collected; a single one is returned as is, several are
    /// wrapped in [`SchemaError::Multiple`].
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(SchemaError::validation("name", "schema name is empty"));
        }
        if self.tables.is_empty() && self.includes.is_empty() {
            errors.push(SchemaError::validation(
                "tables",
                "schema declares no tables and no includes",
            ));
        }

        let table_names: BTreeSet<&str> = self.table_names().collect();
        let mut seen_tables = BTreeSet::new();
        for table in &self.tables {
            if table.name.trim().is_empty() {
                errors.push(SchemaError::validation("table", "table name is empty"));
                continue;
            }
            if !seen_tables.insert(table.name.as_str()) {
                errors.push(SchemaError::validation(
                    table.name.clone(),
                    "duplicate table name",
                ));
            }
            validate_table(table, &table_names, &mut errors);
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(SchemaError::Multiple(errors)),
        }
    }
}

fn validate_table(table: &Table, table_names: &BTreeSet<&str>, errors: &mut Vec<SchemaError>) {
    let mut seen_fields = BTreeSet::new();
    let mut primary_keys = 0usize;

    for field in &table.fields {
        let path = format!("{}.{}", table.name, field.name);
        if field.name.trim().is_empty() {
            errors.push(SchemaError::validation(
                table.name.clone(),
                "field name is empty",
            ));
            continue;
        }
        if !seen_fields.insert(field.name.as_str()) {
            errors.push(SchemaError::validation(path.clone(), "duplicate field name"));
        }
        if field.primary_key {
            primary_keys += 1;
        }

        match (&field.references, field.field_type.is_relation()) {
            (None, true) => errors.push(SchemaError::validation(
                path.clone(),
                format!("{} field has no reference target", field.field_type),
            )),
            (Some(_), false) => errors.push(SchemaError::validation(
                path.clone(),
                format!("{} field cannot carry a reference", field.field_type),
            )),
            (Some(reference), true) => {
                if !is_namespaced(&reference.table)
                    && !table_names.contains(reference.table.as_str())
                {
                    errors.push(SchemaError::validation(
                        path.clone(),
                        format!("references unknown table '{}'", reference.table),
                    ));
                }
            }
            (None, false) => {}
        }

        if let (Some(precision), Some(scale)) = (field.precision, field.scale) {
            if scale > precision {
                errors.push(SchemaError::validation(
                    path,
                    format!("scale {scale} exceeds precision {precision}"),
                ));
            }
        }
    }

    if primary_keys > 1 {
        errors.push(SchemaError::validation(
            table.name.clone(),
            format!("{primary_keys} fields are marked primary key, at most one is allowed"),
        ));
    }

    for index in &table.indexes {
        let path = format!("{}.{}", table.name, index.name);
        if index.name.trim().is_empty() {
            errors.push(SchemaError::validation(
                table.name.clone(),
                "index name is empty",
            ));
        }
        if index.fields.is_empty() {
            errors.push(SchemaError::validation(path.clone(), "index covers no fields"));
        }
        for field in &index.fields {
            if table.get_field(field).is_none() {
                errors.push(SchemaError::validation(
                    path.clone(),
                    format!("index references unknown field '{field}'"),
                ));
            }
        }
    }
}
