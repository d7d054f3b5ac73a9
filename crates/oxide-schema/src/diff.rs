//! Schema diff engine.
//!
//! Compares an "old" schema (usually the last snapshot) with a "new" one and
//! produces the list of [`Change`]s needed to go from one to the other. Every
//! change carries a destructive flag so the plan assembler can route it
//! through the destructive-change handler.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::schema::{Field, FieldType, Index, Schema, Table};

// ================================================================
// Public types
// ================================================================

/// A single property of a field that can change between versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldProperty {
    /// Declarative type.
    Type,
    /// Length of a varchar/text column.
    Length,
    /// Precision or scale of a decimal column.
    Precision,
    /// Nullability.
    Nullable,
    /// Primary-key flag.
    PrimaryKey,
    /// Default value (including auto-create/auto-update timestamps).
    Default,
    /// Foreign-key target or on-delete policy.
    Reference,
}

impl FieldProperty {
    fn label(self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Length => "length",
            Self::Precision => "precision",
            Self::Nullable => "nullability",
            Self::PrimaryKey => "primary key",
            Self::Default => "default",
            Self::Reference => "reference",
        }
    }
}

/// What changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// A table was added.
    TableAdded {
        /// The new table.
        table: Table,
    },
    /// A table was removed.
    TableRemoved {
        /// The removed table, as it was declared.
        table: Table,
    },
    /// A table was renamed.
    TableRenamed {
        /// Old name.
        from: String,
        /// New name.
        to: String,
    },
    /// A field was added.
    FieldAdded {
        /// The new field.
        field: Field,
    },
    /// A field was removed.
    FieldRemoved {
        /// The removed field, as it was declared.
        field: Field,
    },
    /// A field was renamed.
    FieldRenamed {
        /// Old name.
        from: String,
        /// New name.
        to: String,
    },
    /// One property of a field changed.
    FieldModified {
        /// Which property changed.
        property: FieldProperty,
        /// Old declaration.
        old: Field,
        /// New declaration.
        new: Field,
    },
    /// An index was added.
    IndexAdded {
        /// The new index.
        index: Index,
    },
    /// An index was removed.
    IndexRemoved {
        /// The removed index.
        index: Index,
    },
}

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Table the change applies to (the new name for renamed tables).
    pub table: String,
    /// What changed.
    pub kind: ChangeKind,
    /// Human-readable description.
    pub description: String,
    /// Whether applying the change can lose data or violate constraints.
    pub destructive: bool,
}

impl Change {
    fn new(table: impl Into<String>, kind: ChangeKind, destructive: bool) -> Self {
        let table = table.into();
        let description = describe(&table, &kind);
        Self {
            table,
            kind,
            description,
            destructive,
        }
    }

    /// Returns the field or index the change is about, if any.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        match &self.kind {
            ChangeKind::TableAdded { .. }
            | ChangeKind::TableRemoved { .. }
            | ChangeKind::TableRenamed { .. } => None,
            ChangeKind::FieldAdded { field } | ChangeKind::FieldRemoved { field } => {
                Some(&field.name)
            }
            ChangeKind::FieldRenamed { to, .. } => Some(to),
            ChangeKind::FieldModified { new, .. } => Some(&new.name),
            ChangeKind::IndexAdded { index } | ChangeKind::IndexRemoved { index } => {
                Some(&index.name)
            }
        }
    }

    /// Emission class: additive changes come before destructive ones.
    #[must_use]
    pub fn priority(&self) -> u8 {
        match self.kind {
            ChangeKind::TableRenamed { .. } | ChangeKind::FieldRenamed { .. } => 0,
            ChangeKind::TableAdded { .. } => 1,
            ChangeKind::FieldAdded { .. } => 2,
            ChangeKind::FieldModified { .. }
            | ChangeKind::IndexRemoved { .. }
            | ChangeKind::IndexAdded { .. } => 3,
            ChangeKind::FieldRemoved { .. } => 4,
            ChangeKind::TableRemoved { .. } => 5,
        }
    }

    /// Tie-break inside a priority class for the same table and subject.
    fn rank(&self) -> u8 {
        match &self.kind {
            ChangeKind::TableRenamed { .. } | ChangeKind::IndexRemoved { .. } => 0,
            ChangeKind::FieldRenamed { .. } => 1,
            ChangeKind::FieldModified { property, .. } => 2 + *property as u8,
            ChangeKind::IndexAdded { .. } => 20,
            _ => 0,
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.destructive {
            write!(f, "[destructive] {}", self.description)
        } else {
            f.write_str(&self.description)
        }
    }
}

/// Result of comparing two schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    /// Changes, in emission order.
    pub changes: Vec<Change>,
}

impl SchemaDiff {
    /// Returns `true` if anything changed.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Returns `true` if any change is destructive.
    #[must_use]
    pub fn is_destructive(&self) -> bool {
        self.changes.iter().any(|c| c.destructive)
    }

    /// Returns the destructive changes.
    pub fn destructive_changes(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| c.destructive)
    }

    /// Returns `true` if every change adds a table.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.has_changes()
            && self
                .changes
                .iter()
                .all(|c| matches!(c.kind, ChangeKind::TableAdded { .. }))
    }
}

// ================================================================
// Diff entry point
// ================================================================

/// Compares two schemas.
///
/// `old = None` means there is no baseline yet: every table in `new` is added.
/// `new = None` means everything in `old` is removed.
#[must_use]
pub fn diff_schemas(old: Option<&Schema>, new: Option<&Schema>) -> SchemaDiff {
    let mut changes = Vec::new();

    match (old, new) {
        (None, None) => {}
        (None, Some(new)) => {
            for table in &new.tables {
                changes.push(Change::new(
                    &table.name,
                    ChangeKind::TableAdded {
                        table: table.clone(),
                    },
                    false,
                ));
            }
        }
        (Some(old), None) => {
            for table in &old.tables {
                changes.push(Change::new(
                    &table.name,
                    ChangeKind::TableRemoved {
                        table: table.clone(),
                    },
                    true,
                ));
            }
        }
        (Some(old), Some(new)) => diff_tables(old, new, &mut changes),
    }

    changes.sort_by(|a, b| {
        (a.priority(), &a.table, a.subject(), a.rank()).cmp(&(
            b.priority(),
            &b.table,
            b.subject(),
            b.rank(),
        ))
    });

    SchemaDiff { changes }
}

fn diff_tables(old: &Schema, new: &Schema, changes: &mut Vec<Change>) {
    let new_names: BTreeSet<&str> = new.table_names().collect();

    // Old name -> new name of every annotated table rename.
    let mut renames: BTreeMap<&str, &str> = BTreeMap::new();
    for table in &new.tables {
        if old.get_table(&table.name).is_some() {
            continue;
        }
        let renamed = table
            .renamed_from
            .as_deref()
            .filter(|from| !new_names.contains(from) && !renames.contains_key(from))
            .and_then(|from| old.get_table(from));
        if let Some(previous) = renamed {
            renames.insert(previous.name.as_str(), table.name.as_str());
        }
    }
    let renamed_from: BTreeMap<&str, &str> = renames.iter().map(|(o, n)| (*n, *o)).collect();

    for table in &new.tables {
        if let Some(previous) = old.get_table(&table.name) {
            diff_table(previous, table, &renames, changes);
            continue;
        }

        match renamed_from.get(table.name.as_str()).and_then(|from| old.get_table(from)) {
            Some(previous) => {
                changes.push(Change::new(
                    &table.name,
                    ChangeKind::TableRenamed {
                        from: previous.name.clone(),
                        to: table.name.clone(),
                    },
                    false,
                ));
                diff_table(previous, table, &renames, changes);
            }
            None => changes.push(Change::new(
                &table.name,
                ChangeKind::TableAdded {
                    table: table.clone(),
                },
                false,
            )),
        }
    }

    for table in &old.tables {
        let name = table.name.as_str();
        if !new_names.contains(name) && !renames.contains_key(name) {
            changes.push(Change::new(
                name,
                ChangeKind::TableRemoved {
                    table: table.clone(),
                },
                true,
            ));
        }
    }
}

/// Compares two versions of the same table. Changes are reported under the
/// new table's name.
fn diff_table(
    old: &Table,
    new: &Table,
    renames: &BTreeMap<&str, &str>,
    changes: &mut Vec<Change>,
) {
    let table = new.name.as_str();
    let new_fields: BTreeSet<&str> = new.fields.iter().map(|f| f.name.as_str()).collect();
    let mut claimed: BTreeSet<&str> = BTreeSet::new();

    for field in &new.fields {
        if let Some(previous) = old.get_field(&field.name) {
            diff_field(table, previous, field, renames, changes);
            continue;
        }

        let renamed = field
            .renamed_from
            .as_deref()
            .filter(|from| !new_fields.contains(from) && !claimed.contains(from))
            .and_then(|from| old.get_field(from));

        match renamed {
            Some(previous) => {
                claimed.insert(previous.name.as_str());
                changes.push(Change::new(
                    table,
                    ChangeKind::FieldRenamed {
                        from: previous.name.clone(),
                        to: field.name.clone(),
                    },
                    false,
                ));
                diff_field(table, previous, field, renames, changes);
            }
            None => changes.push(Change::new(
                table,
                ChangeKind::FieldAdded {
                    field: field.clone(),
                },
                false,
            )),
        }
    }

    for field in &old.fields {
        let name = field.name.as_str();
        if !new_fields.contains(name) && !claimed.contains(name) {
            changes.push(Change::new(
                table,
                ChangeKind::FieldRemoved {
                    field: field.clone(),
                },
                true,
            ));
        }
    }

    diff_indexes(table, old, new, changes);
}

fn diff_indexes(table: &str, old: &Table, new: &Table, changes: &mut Vec<Change>) {
    for index in &new.indexes {
        match old.get_index(&index.name) {
            Some(previous) if previous.same_shape(index) => {}
            Some(previous) => {
                // A reshaped index is dropped and recreated.
                changes.push(Change::new(
                    table,
                    ChangeKind::IndexRemoved {
                        index: previous.clone(),
                    },
                    true,
                ));
                changes.push(Change::new(
                    table,
                    ChangeKind::IndexAdded {
                        index: index.clone(),
                    },
                    false,
                ));
            }
            None => changes.push(Change::new(
                table,
                ChangeKind::IndexAdded {
                    index: index.clone(),
                },
                false,
            )),
        }
    }

    for index in &old.indexes {
        if new.get_index(&index.name).is_none() {
            changes.push(Change::new(
                table,
                ChangeKind::IndexRemoved {
                    index: index.clone(),
                },
                true,
            ));
        }
    }
}

// ================================================================
// Field comparison
// ================================================================

fn diff_field(
    table: &str,
    old: &Field,
    new: &Field,
    renames: &BTreeMap<&str, &str>,
    changes: &mut Vec<Change>,
) {
    let mut modified = |property: FieldProperty, destructive: bool| {
        changes.push(Change::new(
            table,
            ChangeKind::FieldModified {
                property,
                old: old.clone(),
                new: new.clone(),
            },
            destructive,
        ));
    };

    if old.field_type == FieldType::ManyToMany || new.field_type == FieldType::ManyToMany {
        // Many-to-many fields have no column; a new type or target swaps the
        // junction table. Junction keys always cascade; on_delete is ignored.
        if old.field_type != new.field_type {
            modified(FieldProperty::Type, true);
        } else if target(old, renames) != target(new, &BTreeMap::new()) {
            modified(FieldProperty::Reference, true);
        }
        return;
    }

    if old.field_type != new.field_type {
        modified(
            FieldProperty::Type,
            !old.field_type.promotes_to(new.field_type),
        );
    }

    if new.field_type.has_length() && old.length != new.length {
        modified(FieldProperty::Length, shrinks(old.length, new.length));
    }

    if new.field_type == FieldType::Decimal
        && (old.precision != new.precision || old.scale != new.scale)
    {
        let destructive = shrinks(old.precision, new.precision) || shrinks(old.scale, new.scale);
        modified(FieldProperty::Precision, destructive);
    }

    if old.is_nullable() != new.is_nullable() {
        modified(FieldProperty::Nullable, !new.is_nullable());
    }

    if old.primary_key != new.primary_key {
        modified(FieldProperty::PrimaryKey, old.primary_key);
    }

    if old.default_symbol() != new.default_symbol()
        || old.auto_create != new.auto_create
        || old.auto_update != new.auto_update
    {
        modified(FieldProperty::Default, false);
    }

    let on_delete = |f: &Field| f.references.as_ref().map(|r| r.on_delete);
    if target(old, renames) != target(new, &BTreeMap::new()) || on_delete(old) != on_delete(new) {
        modified(
            FieldProperty::Reference,
            old.references.is_some() && new.references.is_none(),
        );
    }
}

/// Referenced table of `field`, seen through `renames`.
fn target<'a>(field: &'a Field, renames: &BTreeMap<&str, &'a str>) -> Option<&'a str> {
    let table = field.references.as_ref()?.table.as_str();
    Some(renames.get(table).copied().unwrap_or(table))
}

/// Returns true if a bound tightens. An unset bound is unbounded.
fn shrinks(old: Option<u32>, new: Option<u32>) -> bool {
    match (old, new) {
        (Some(old), Some(new)) => new < old,
        (None, Some(_)) => true,
        (_, None) => false,
    }
}

fn describe(table: &str, kind: &ChangeKind) -> String {
    match kind {
        ChangeKind::TableAdded { .. } => format!("Add table {table}"),
        ChangeKind::TableRemoved { .. } => format!("Remove table {table}"),
        ChangeKind::TableRenamed { from, to } => format!("Rename table {from} to {to}"),
        ChangeKind::FieldAdded { field } => format!("Add field {table}.{}", field.name),
        ChangeKind::FieldRemoved { field } => format!("Remove field {table}.{}", field.name),
        ChangeKind::FieldRenamed { from, to } => {
            format!("Rename field {table}.{from} to {to}")
        }
        ChangeKind::FieldModified { property, old, new } => {
            let (before, after) = match property {
                FieldProperty::Type | FieldProperty::Length | FieldProperty::Precision => {
                    (old.type_label(), new.type_label())
                }
                FieldProperty::Nullable => (null_label(old), null_label(new)),
                FieldProperty::PrimaryKey => {
                    (old.primary_key.to_string(), new.primary_key.to_string())
                }
                FieldProperty::Default => (default_label(old), default_label(new)),
                FieldProperty::Reference => (reference_label(old), reference_label(new)),
            };
            format!(
                "Change {} of {table}.{} from {before} to {after}",
                property.label(),
                new.name
            )
        }
        ChangeKind::IndexAdded { index } => format!("Add index {} on {table}", index.name),
        ChangeKind::IndexRemoved { index } => {
            format!("Remove index {} from {table}", index.name)
        }
    }
}

fn null_label(field: &Field) -> String {
    let label = if field.is_nullable() { "NULL" } else { "NOT NULL" };
    label.to_string()
}

fn default_label(field: &Field) -> String {
    match (field.default_symbol(), field.auto_create, field.auto_update) {
        (Some(symbol), ..) => format!("'{symbol}'"),
        (None, _, true) => "auto_update".to_string(),
        (None, true, false) => "auto_create".to_string(),
        (None, false, false) => "none".to_string(),
    }
}

fn reference_label(field: &Field) -> String {
    match &field.references {
        Some(reference) => format!("{} ({})", reference.table, reference.on_delete.to_sql()),
        None => "none".to_string(),
    }
}
