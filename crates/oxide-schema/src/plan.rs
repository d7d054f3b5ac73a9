//! Migration plan assembly.
//!
//! Turns a [`SchemaDiff`] into paired Up/Down SQL. The assembler decides
//! which statements are needed and how they are ordered; rendering is
//! delegated to a [`Provider`].
//!
//! Each change becomes a step holding its Up statements and the statements
//! that undo it. The Down script is the concatenation of every step's undo
//! statements in reverse step order.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::diff::{Change, ChangeKind, FieldProperty, SchemaDiff};
use crate::error::{Result, SchemaError};
use crate::graph::{CyclePolicy, DependencyGraph};
use crate::provider::{
    foreign_key_name, AlterColumnChange, ColumnDef, ForeignKeyDef, IndexDef, Operation, Provider,
    TableDef,
};
use crate::schema::{
    is_namespaced, Field, FieldType, Index, OnDelete, Schema, Table, NAMESPACE_SEPARATOR,
};
use crate::writer::slugify;

/// Suffix of the temporary column used by safe type changes.
pub const TEMP_COLUMN_SUFFIX: &str = "__tmp";

/// Default marker prefixed to every line of a reviewed statement.
pub const DEFAULT_REVIEW_MARKER: &str = "-- REVIEW: ";

/// Default timestamp format of migration filenames.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// How a destructive change ends up in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Emit the statements unmodified.
    Generate,
    /// Emit the statements commented out with the review marker.
    Review,
    /// Leave the change out of the plan.
    Omit,
    /// Stop assembling; no plan is produced.
    Abort,
}

/// Decides what happens to each destructive change.
pub trait DestructiveChangeHandler {
    /// Returns the disposition of `change`.
    fn decide(&mut self, change: &Change) -> Disposition;
}

impl<F> DestructiveChangeHandler for F
where
    F: FnMut(&Change) -> Disposition,
{
    fn decide(&mut self, change: &Change) -> Disposition {
        self(change)
    }
}

/// Non-interactive handler: every destructive change is emitted for review.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReview;

impl DestructiveChangeHandler for AlwaysReview {
    fn decide(&mut self, _change: &Change) -> Disposition {
        Disposition::Review
    }
}

/// Options for plan assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    /// Use the add/copy/drop/rename sequence for type changes.
    pub safe_type_changes: bool,
    /// How cycles between added or removed tables are handled.
    pub cycle_policy: CyclePolicy,
    /// Prefix of reviewed lines.
    pub review_marker: String,
    /// `chrono` format of the filename timestamp.
    pub timestamp_format: String,
    /// Overrides the derived description.
    pub description: Option<String>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            safe_type_changes: true,
            cycle_policy: CyclePolicy::Defer,
            review_marker: DEFAULT_REVIEW_MARKER.to_string(),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            description: None,
        }
    }
}

impl PlanOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables safe type changes.
    #[must_use]
    pub fn with_safe_type_changes(mut self, enabled: bool) -> Self {
        self.safe_type_changes = enabled;
        self
    }

    /// Sets the cycle policy.
    #[must_use]
    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    /// Sets the review marker.
    #[must_use]
    pub fn with_review_marker(mut self, marker: impl Into<String>) -> Self {
        self.review_marker = marker.into();
        self
    }

    /// Sets the filename timestamp format.
    #[must_use]
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    /// Overrides the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// An assembled migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    /// `<timestamp>_<slug>.sql`.
    pub filename: String,
    /// Description slug.
    pub description: String,
    /// Up statements, in execution order.
    pub up: Vec<String>,
    /// Down statements, in execution order.
    pub down: Vec<String>,
    /// Whether the underlying diff contains destructive changes.
    pub destructive: bool,
}

impl MigrationPlan {
    /// Returns true if the plan has no Up statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }
}

/// Statements for one change and the statements undoing them.
#[derive(Debug, Clone, Default)]
struct Step {
    up: Vec<String>,
    down: Vec<String>,
}

impl Step {
    fn new(up: Vec<String>, down: Vec<String>) -> Self {
        Self { up, down }
    }

    /// Appends `up`; its inverse runs before everything already undone.
    fn push(&mut self, up: String, down: String) {
        self.up.push(up);
        self.down.insert(0, down);
    }

    /// Runs `self` then `next`.
    fn then(mut self, next: Step) -> Self {
        self.up.extend(next.up);
        let mut down = next.down;
        down.extend(self.down);
        self.down = down;
        self
    }

    /// Swaps Up and Down.
    fn inverse(self) -> Self {
        Self {
            up: self.down,
            down: self.up,
        }
    }

    fn is_empty(&self) -> bool {
        self.up.is_empty() && self.down.is_empty()
    }

    fn review(self, marker: &str) -> Self {
        let comment = |statements: Vec<String>| -> Vec<String> {
            statements
                .into_iter()
                .map(|s| {
                    s.lines()
                        .map(|line| format!("{marker}{line}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .collect()
        };
        Self {
            up: comment(self.up),
            down: comment(self.down),
        }
    }
}

fn sql(statement: String) -> String {
    format!("{statement};")
}

/// Name of the junction table of a many-to-many field.
#[must_use]
pub fn junction_table_name(table: &str, field: &str) -> String {
    format!("{table}_{field}")
}

/// Table renames (new name -> old name) and field renames
/// ((table, new name) -> old name) of a diff.
type Renames = (BTreeMap<String, String>, BTreeMap<(String, String), String>);

fn collect_renames(diff: &SchemaDiff) -> Renames {
    let mut tables = BTreeMap::new();
    let mut fields = BTreeMap::new();
    for change in &diff.changes {
        match &change.kind {
            ChangeKind::TableRenamed { from, to } => {
                tables.insert(to.clone(), from.clone());
            }
            ChangeKind::FieldRenamed { from, to } => {
                fields.insert((change.table.clone(), to.clone()), from.clone());
            }
            _ => {}
        }
    }
    (tables, fields)
}

/// `old` with the renames applied: the database as every step after the
/// renames finds it.
fn renamed_view(old: &Schema, (tables, fields): &Renames) -> Schema {
    let new_names: BTreeMap<&str, &str> = tables
        .iter()
        .map(|(new, old)| (old.as_str(), new.as_str()))
        .collect();

    let mut view = old.clone();
    for table in &mut view.tables {
        if let Some(name) = new_names.get(table.name.as_str()) {
            table.name = (*name).to_string();
        }
        let new_fields: BTreeMap<&str, &str> = fields
            .iter()
            .filter(|((t, _), _)| *t == table.name)
            .map(|((_, new), old)| (old.as_str(), new.as_str()))
            .collect();

        for field in &mut table.fields {
            if let Some(name) = new_fields.get(field.name.as_str()) {
                field.name = (*name).to_string();
            }
            if let Some(reference) = field.references.as_mut() {
                if let Some(name) = new_names.get(reference.table.as_str()) {
                    reference.table = (*name).to_string();
                }
            }
        }
        for index in &mut table.indexes {
            for column in &mut index.fields {
                if let Some(name) = new_fields.get(column.as_str()) {
                    *column = (*name).to_string();
                }
            }
        }
    }
    view
}

/// Assembles migration plans for one provider.
pub struct MigrationPlanner<'a> {
    provider: &'a dyn Provider,
    options: PlanOptions,
}

impl<'a> MigrationPlanner<'a> {
    /// Creates a planner with default options.
    #[must_use]
    pub fn new(provider: &'a dyn Provider) -> Self {
        Self {
            provider,
            options: PlanOptions::default(),
        }
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: PlanOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the options in use.
    #[must_use]
    pub fn options(&self) -> &PlanOptions {
        &self.options
    }

    /// Assembles a plan timestamped with the current time.
    pub fn assemble(
        &self,
        diff: &SchemaDiff,
        old: Option<&Schema>,
        new: &Schema,
        handler: &mut dyn DestructiveChangeHandler,
    ) -> Result<MigrationPlan> {
        self.assemble_at(diff, old, new, handler, Utc::now())
    }

    /// Assembles a plan timestamped with `now`.
    ///
    /// Fails with [`SchemaError::UserCancelled`] when the handler aborts; no
    /// partial plan is returned.
    pub fn assemble_at(
        &self,
        diff: &SchemaDiff,
        old: Option<&Schema>,
        new: &Schema,
        handler: &mut dyn DestructiveChangeHandler,
        now: DateTime<Utc>,
    ) -> Result<MigrationPlan> {
        let renames = collect_renames(diff);
        let view = old.map_or_else(Schema::default, |old| renamed_view(old, &renames));
        let (table_renames, field_renames) = renames;
        let renderer = Renderer {
            provider: self.provider,
            old: &view,
            new,
            table_renames,
            field_renames,
        };

        let retyped: BTreeSet<(String, String)> = diff
            .changes
            .iter()
            .filter_map(|c| match &c.kind {
                ChangeKind::FieldModified {
                    property: FieldProperty::Type,
                    new,
                    ..
                } => Some((c.table.clone(), new.name.clone())),
                _ => None,
            })
            .collect();

        let mut steps = Vec::new();
        let mut tables_added = false;
        let mut tables_removed = false;
        let mut renames_followed = false;

        for change in &diff.changes {
            if !renames_followed && change.priority() > 0 {
                renames_followed = true;
                steps.push(renderer.follow_renames()?);
            }
            match change.kind {
                ChangeKind::TableAdded { .. } => {
                    if !tables_added {
                        tables_added = true;
                        steps.extend(self.added_tables(&renderer, diff)?);
                    }
                }
                ChangeKind::TableRemoved { .. } => {
                    if !tables_removed {
                        tables_removed = true;
                        steps.extend(self.removed_tables(&renderer, diff, handler)?);
                    }
                }
                _ => {
                    let disposition = self.disposition(change, handler)?;
                    if disposition == Disposition::Omit {
                        debug!(change = %change.description, "Omitting change");
                        continue;
                    }
                    let step = self.change_step(&renderer, change, &retyped)?;
                    if step.is_empty() {
                        continue;
                    }
                    steps.push(self.apply(step, disposition));
                }
            }
        }
        if !renames_followed {
            steps.push(renderer.follow_renames()?);
        }

        let mut up = Vec::new();
        let mut down = Vec::new();
        for step in &steps {
            up.extend(step.up.iter().cloned());
        }
        for step in steps.into_iter().rev() {
            down.extend(step.down);
        }

        let description = self.description(diff, old);
        let filename = format!(
            "{}_{}.sql",
            now.format(&self.options.timestamp_format),
            description
        );

        info!(
            filename = %filename,
            changes = diff.changes.len(),
            up = up.len(),
            down = down.len(),
            "Assembled migration plan"
        );

        Ok(MigrationPlan {
            filename,
            description,
            up,
            down,
            destructive: diff.is_destructive(),
        })
    }

    fn disposition(
        &self,
        change: &Change,
        handler: &mut dyn DestructiveChangeHandler,
    ) -> Result<Disposition> {
        if !change.destructive {
            return Ok(Disposition::Generate);
        }
        match handler.decide(change) {
            Disposition::Abort => Err(SchemaError::UserCancelled {
                change: change.description.clone(),
            }),
            disposition => {
                debug!(change = %change.description, ?disposition, "Destructive change");
                Ok(disposition)
            }
        }
    }

    fn apply(&self, step: Step, disposition: Disposition) -> Step {
        match disposition {
            Disposition::Review => step.review(&self.options.review_marker),
            _ => step,
        }
    }

    fn description(&self, diff: &SchemaDiff, old: Option<&Schema>) -> String {
        let derived = match &self.options.description {
            Some(description) => slugify(description),
            None if diff.is_initial() && old.map_or(true, |s| s.tables.is_empty()) => {
                "initial".to_string()
            }
            None if diff.changes.len() == 1 => slugify(&diff.changes[0].description),
            None => String::new(),
        };
        if derived.is_empty() {
            "update_schema".to_string()
        } else {
            derived
        }
    }

    // ================================================================
    // Table groups
    // ================================================================

    /// Creates every added table in dependency order, then deferred foreign
    /// keys, then junction tables.
    fn added_tables(&self, r: &Renderer<'_>, diff: &SchemaDiff) -> Result<Vec<Step>> {
        let added: Vec<&Table> = diff
            .changes
            .iter()
            .filter_map(|c| match &c.kind {
                ChangeKind::TableAdded { table } => Some(table),
                _ => None,
            })
            .collect();
        let by_name: BTreeMap<&str, &Table> =
            added.iter().map(|t| (t.name.as_str(), *t)).collect();

        let order = DependencyGraph::from_tables(added.iter().copied())
            .creation_order(self.options.cycle_policy)?;
        let can_defer = self.provider.supports_operation(Operation::AddForeignKey);
        if !order.deferred.is_empty() && !can_defer {
            debug!(
                provider = self.provider.name(),
                "Keeping cyclic foreign keys inline"
            );
        }

        let mut steps = Vec::new();
        let mut deferred = Vec::new();
        for name in &order.tables {
            let Some(table) = by_name.get(name.as_str()) else {
                continue;
            };
            let inline = !(can_defer && order.is_deferred(name));
            if !inline {
                deferred.extend(r.foreign_keys(r.new, table));
            }
            steps.push(Step::new(
                r.create_table(r.new, table, inline)?,
                vec![sql(self.provider.generate_drop_table(&table.name))],
            ));
        }

        for fk in &deferred {
            let mut step = Step::default();
            step.push(r.add_foreign_key(fk)?, r.drop_foreign_key(fk)?);
            steps.push(step);
        }

        for name in &order.tables {
            let Some(table) = by_name.get(name.as_str()) else {
                continue;
            };
            for field in table.many_to_many_fields() {
                steps.push(r.junction_created(r.new, &table.name, field)?);
            }
        }

        Ok(steps)
    }

    /// Drops every removed table: junctions first, then deferred foreign
    /// keys, then the tables in reverse dependency order.
    fn removed_tables(
        &self,
        r: &Renderer<'_>,
        diff: &SchemaDiff,
        handler: &mut dyn DestructiveChangeHandler,
    ) -> Result<Vec<Step>> {
        let mut removed: BTreeMap<&str, (&Table, Disposition)> = BTreeMap::new();
        for change in &diff.changes {
            if let ChangeKind::TableRemoved { table } = &change.kind {
                let disposition = self.disposition(change, handler)?;
                let table = r.old.get_table(&table.name).unwrap_or(table);
                removed.insert(table.name.as_str(), (table, disposition));
            }
        }

        let order = DependencyGraph::from_tables(removed.values().map(|(t, _)| *t))
            .creation_order(self.options.cycle_policy)?;
        let can_defer = self.provider.supports_operation(Operation::DropForeignKey)
            && self.provider.supports_operation(Operation::AddForeignKey);
        let drop_order = order.drop_order();

        let mut junctions = Vec::new();
        let mut constraints = Vec::new();
        let mut tables = Vec::new();

        for name in &drop_order {
            let Some(&(table, disposition)) = removed.get(name.as_str()) else {
                continue;
            };
            if disposition == Disposition::Omit {
                debug!(table = %table.name, "Omitting table removal");
                continue;
            }

            for field in table.many_to_many_fields() {
                let step = r.junction_created(r.old, &table.name, field)?.inverse();
                junctions.push(self.apply(step, disposition));
            }

            let inline = !(can_defer && order.is_deferred(name));
            if !inline {
                for fk in r.foreign_keys(r.old, table) {
                    let mut step = Step::default();
                    step.push(r.drop_foreign_key(&fk)?, r.add_foreign_key(&fk)?);
                    constraints.push(self.apply(step, disposition));
                }
            }

            let step = Step::new(
                vec![sql(self.provider.generate_drop_table(&table.name))],
                r.create_table(r.old, table, inline)?,
            );
            tables.push(self.apply(step, disposition));
        }

        junctions.extend(constraints);
        junctions.extend(tables);
        Ok(junctions)
    }

    // ================================================================
    // Single changes
    // ================================================================

    fn change_step(
        &self,
        r: &Renderer<'_>,
        change: &Change,
        retyped: &BTreeSet<(String, String)>,
    ) -> Result<Step> {
        let table = change.table.as_str();
        let mut step = Step::default();

        match &change.kind {
            ChangeKind::TableAdded { .. } | ChangeKind::TableRemoved { .. } => {}
            ChangeKind::TableRenamed { from, to } => {
                step.push(r.rename_table(from, to)?, r.rename_table(to, from)?);
                let Some(before) = r.old.get_table(to) else {
                    return Ok(step);
                };
                for field in before.many_to_many_fields() {
                    let field = r.original_field(to, &field.name);
                    let old_junction = junction_table_name(from, field);
                    let new_junction = junction_table_name(to, field);
                    step.push(
                        r.rename_table(&old_junction, &new_junction)?,
                        r.rename_table(&new_junction, &old_junction)?,
                    );
                }
            }
            ChangeKind::FieldRenamed { from, to } => {
                let is_junction = r
                    .old
                    .get_table(table)
                    .and_then(|t| t.get_field(to))
                    .is_some_and(|f| f.field_type == FieldType::ManyToMany);
                if is_junction {
                    let old_junction = junction_table_name(table, from);
                    let new_junction = junction_table_name(table, to);
                    step.push(
                        r.rename_table(&old_junction, &new_junction)?,
                        r.rename_table(&new_junction, &old_junction)?,
                    );
                } else {
                    step.push(
                        r.rename_column(table, from, to)?,
                        r.rename_column(table, to, from)?,
                    );
                }
            }
            ChangeKind::FieldAdded { field } => {
                step = r.field_added(r.new, table, field)?;
            }
            ChangeKind::FieldRemoved { field } => {
                let field = r.old_field(table, &field.name).unwrap_or(field);
                step = r.field_added(r.old, table, field)?.inverse();
            }
            ChangeKind::FieldModified { property, old, new } => {
                let old = r.old_field(table, &new.name).cloned().unwrap_or_else(|| Field {
                    name: new.name.clone(),
                    ..old.clone()
                });
                step = self.field_modified(r, table, *property, &old, new, retyped)?;
            }
            ChangeKind::IndexAdded { index } => {
                let index = r.index(table, index);
                step.push(
                    sql(self.provider.generate_create_index(&index)),
                    sql(self.provider.generate_drop_index(&index)),
                );
            }
            ChangeKind::IndexRemoved { index } => {
                let index = r
                    .old
                    .get_table(table)
                    .and_then(|t| t.get_index(&index.name))
                    .unwrap_or(index);
                let index = r.index(table, index);
                step.push(
                    sql(self.provider.generate_drop_index(&index)),
                    sql(self.provider.generate_create_index(&index)),
                );
            }
        }

        Ok(step)
    }

    fn field_modified(
        &self,
        r: &Renderer<'_>,
        table: &str,
        property: FieldProperty,
        old: &Field,
        new: &Field,
        retyped: &BTreeSet<(String, String)>,
    ) -> Result<Step> {
        let junction_involved =
            old.field_type == FieldType::ManyToMany || new.field_type == FieldType::ManyToMany;
        if junction_involved {
            let removal = r.field_added(r.old, table, old)?.inverse();
            return Ok(removal.then(r.field_added(r.new, table, new)?));
        }

        let old_column = r.column(r.old, old)?;
        let new_column = r.column(r.new, new)?;
        let mut step = Step::default();

        match property {
            FieldProperty::Type | FieldProperty::Length | FieldProperty::Precision => {
                let folded = property != FieldProperty::Type
                    && retyped.contains(&(table.to_string(), new.name.clone()));
                if folded {
                    return Ok(step);
                }
                let unchanged = self.provider.convert_field_type(&old_column)?
                    == self.provider.convert_field_type(&new_column)?;
                if unchanged {
                    debug!(table, column = %new.name, "Storage type unchanged");
                    return Ok(step);
                }

                if self.options.safe_type_changes {
                    step = Step::new(
                        r.safe_type_change(r.old, r.new, table, &new_column)?,
                        r.safe_type_change(r.new, r.old, table, &old_column)?,
                    );
                } else {
                    step.push(
                        r.alter_column(table, &new_column, &AlterColumnChange::SetDataType)?,
                        r.alter_column(table, &old_column, &AlterColumnChange::SetDataType)?,
                    );
                }
            }
            FieldProperty::Nullable => {
                step.push(
                    r.alter_column(
                        table,
                        &new_column,
                        &AlterColumnChange::SetNullable(new_column.nullable),
                    )?,
                    r.alter_column(
                        table,
                        &old_column,
                        &AlterColumnChange::SetNullable(old_column.nullable),
                    )?,
                );
            }
            FieldProperty::PrimaryKey => {
                let comment = format!(
                    "-- manual recreation required: primary key change on {table}.{}",
                    new.name
                );
                warn!(table, column = %new.name, "Primary key change needs manual recreation");
                step.push(comment.clone(), comment);
            }
            FieldProperty::Default => {
                if old_column.default == new_column.default {
                    return Ok(step);
                }
                let change_for = |column: &ColumnDef| match &column.default {
                    Some(default) => AlterColumnChange::SetDefault(default.clone()),
                    None => AlterColumnChange::DropDefault,
                };
                step.push(
                    r.alter_column(table, &new_column, &change_for(&new_column))?,
                    r.alter_column(table, &old_column, &change_for(&old_column))?,
                );
            }
            FieldProperty::Reference => {
                if let Some(fk) = r.foreign_key(r.old, table, old) {
                    step.push(r.drop_foreign_key(&fk)?, r.add_foreign_key(&fk)?);
                }
                if let Some(fk) = r.foreign_key(r.new, table, new) {
                    step.push(r.add_foreign_key(&fk)?, r.drop_foreign_key(&fk)?);
                }
            }
        }

        Ok(step)
    }
}

// ================================================================
// Rendering helpers
// ================================================================

/// Resolves schema elements to provider definitions.
///
/// `old` already carries the diff's renames; the rename maps recover the
/// names the database had before them.
struct Renderer<'a> {
    provider: &'a dyn Provider,
    old: &'a Schema,
    new: &'a Schema,
    /// New table name -> old table name.
    table_renames: BTreeMap<String, String>,
    /// (table, new field name) -> old field name.
    field_renames: BTreeMap<(String, String), String>,
}

impl Renderer<'_> {
    fn original_table<'b>(&'b self, table: &'b str) -> &'b str {
        self.table_renames.get(table).map_or(table, String::as_str)
    }

    fn original_field<'b>(&'b self, table: &str, field: &'b str) -> &'b str {
        self.field_renames
            .get(&(table.to_string(), field.to_string()))
            .map_or(field, String::as_str)
    }

    fn old_field(&self, table: &str, field: &str) -> Option<&Field> {
        self.old.get_table(table).and_then(|t| t.get_field(field))
    }

    /// Renames what is named after a renamed table or field: foreign-key
    /// constraints and the key columns of junction tables.
    fn follow_renames(&self) -> Result<Step> {
        let mut step = Step::default();
        if self.table_renames.is_empty() && self.field_renames.is_empty() {
            return Ok(step);
        }

        for table in &self.old.tables {
            let original = self.original_table(&table.name);
            for field in &table.fields {
                if let Some(fk) = self.foreign_key(self.old, &table.name, field) {
                    let name =
                        foreign_key_name(original, self.original_field(&table.name, &field.name));
                    if name != fk.name {
                        let current = fk.clone().named(name);
                        step = step.then(self.rename_foreign_key(&current, &fk.name)?);
                    }
                }

                if field.field_type != FieldType::ManyToMany {
                    continue;
                }
                let junction = junction_table_name(&table.name, &field.name);
                let target = field
                    .references
                    .as_ref()
                    .map_or(table.name.as_str(), |r| r.table.as_str());
                let mut columns = vec![(format!("{original}_id"), format!("{}_id", table.name))];
                if target == table.name {
                    columns.push((
                        format!("{original}_target_id"),
                        format!("{}_target_id", table.name),
                    ));
                } else {
                    columns.push((
                        format!("{}_id", self.original_table(target)),
                        format!("{target}_id"),
                    ));
                }
                for (from, to) in columns {
                    if from != to {
                        step.push(
                            self.rename_column(&junction, &from, &to)?,
                            self.rename_column(&junction, &to, &from)?,
                        );
                    }
                }
            }
        }
        Ok(step)
    }

    /// Returns the name and column shape of `table`'s key, as seen by a
    /// referencing column. Unknown tables and tables without a primary key
    /// are referenced through an integer `id`.
    fn key_column(&self, schema: &Schema, table: &str) -> (String, ColumnDef) {
        match schema.get_table(table).and_then(Table::primary_key) {
            Some(pk) if !pk.field_type.is_relation() => {
                let data_type = match pk.field_type {
                    FieldType::Serial => FieldType::Integer,
                    other => other,
                };
                let mut column = ColumnDef::new(pk.name.clone(), data_type);
                column.length = pk.length;
                column.precision = pk.precision;
                column.scale = pk.scale;
                (pk.name.clone(), column)
            }
            _ => ("id".to_string(), ColumnDef::new("id", FieldType::Integer)),
        }
    }

    fn default_sql(&self, schema: &Schema, field: &Field) -> Option<String> {
        match field.default_symbol() {
            Some(symbol) => Some(
                schema
                    .lookup_default(self.provider.name(), symbol)
                    .map_or_else(|| self.provider.resolve_default(symbol), str::to_string),
            ),
            None if field.auto_create || field.auto_update => {
                Some(self.provider.resolve_default("now"))
            }
            None => None,
        }
    }

    fn column(&self, schema: &Schema, field: &Field) -> Result<ColumnDef> {
        let mut column = match field.foreign_key_target() {
            Some(target) => self.key_column(schema, target).1.renamed(field.name.clone()),
            None => {
                if field.field_type == FieldType::ManyToMany {
                    return Err(SchemaError::conversion(
                        format!("column '{}'", field.name),
                        "many_to_many fields are stored in a junction table",
                    ));
                }
                let mut column = ColumnDef::new(field.name.clone(), field.field_type);
                column.length = field.length;
                column.precision = field.precision;
                column.scale = field.scale;
                column
            }
        };
        column.primary_key = field.primary_key;
        column.nullable = field.is_nullable() && !field.primary_key;
        column.default = self.default_sql(schema, field);
        column.auto_update = field.auto_update;
        Ok(column)
    }

    fn foreign_key(&self, schema: &Schema, table: &str, field: &Field) -> Option<ForeignKeyDef> {
        let target = field.foreign_key_target()?;
        if is_namespaced(target) {
            return None;
        }
        let (key, _) = self.key_column(schema, target);
        let on_delete = field
            .references
            .as_ref()
            .map(|r| r.on_delete)
            .unwrap_or_default();
        Some(ForeignKeyDef::new(table, field.name.clone(), target, key).on_delete(on_delete))
    }

    fn foreign_keys(&self, schema: &Schema, table: &Table) -> Vec<ForeignKeyDef> {
        table
            .foreign_keys()
            .filter_map(|f| self.foreign_key(schema, &table.name, f))
            .collect()
    }

    fn index(&self, table: &str, index: &Index) -> IndexDef {
        IndexDef {
            name: index.name.clone(),
            table: table.to_string(),
            columns: index.fields.clone(),
            unique: index.unique,
        }
    }

    /// CREATE TABLE plus the table's indexes.
    fn create_table(&self, schema: &Schema, table: &Table, inline_fks: bool) -> Result<Vec<String>> {
        let columns = table
            .fields
            .iter()
            .filter(|f| f.field_type != FieldType::ManyToMany)
            .map(|f| self.column(schema, f))
            .collect::<Result<Vec<_>>>()?;
        let foreign_keys = if inline_fks {
            self.foreign_keys(schema, table)
        } else {
            Vec::new()
        };
        let definition = TableDef {
            name: table.name.clone(),
            columns,
            foreign_keys,
        };

        let mut statements = vec![sql(self.provider.generate_create_table(&definition)?)];
        for index in &table.indexes {
            let index = self.index(&table.name, index);
            statements.push(sql(self.provider.generate_create_index(&index)));
        }
        Ok(statements)
    }

    /// The junction table of a many-to-many field on `table`.
    fn junction(&self, schema: &Schema, table: &str, field: &Field) -> TableDef {
        let name = junction_table_name(table, &field.name);
        let target = field
            .references
            .as_ref()
            .map_or(table, |r| r.table.as_str());

        let owner_column = format!("{table}_id");
        let target_column = if target == table {
            format!("{table}_target_id")
        } else {
            format!("{}_id", target.replace(NAMESPACE_SEPARATOR, "_"))
        };

        let (owner_key, owner_shape) = self.key_column(schema, table);
        let (target_key, target_shape) = self.key_column(schema, target);

        let mut foreign_keys = vec![ForeignKeyDef::new(
            name.clone(),
            owner_column.clone(),
            table,
            owner_key,
        )
        .on_delete(OnDelete::Cascade)];
        if !is_namespaced(target) {
            foreign_keys.push(
                ForeignKeyDef::new(name.clone(), target_column.clone(), target, target_key)
                    .on_delete(OnDelete::Cascade),
            );
        }

        TableDef {
            name,
            columns: vec![
                ColumnDef::new("id", FieldType::Serial).primary_key(),
                owner_shape.renamed(owner_column).not_null(),
                target_shape.renamed(target_column).not_null(),
            ],
            foreign_keys,
        }
    }

    fn junction_created(&self, schema: &Schema, table: &str, field: &Field) -> Result<Step> {
        let junction = self.junction(schema, table, field);
        Ok(Step::new(
            vec![sql(self.provider.generate_create_table(&junction)?)],
            vec![sql(self.provider.generate_drop_table(&junction.name))],
        ))
    }

    /// Adds a field: a column (plus its constraint) or a junction table.
    fn field_added(&self, schema: &Schema, table: &str, field: &Field) -> Result<Step> {
        if field.field_type == FieldType::ManyToMany {
            return self.junction_created(schema, table, field);
        }

        let column = self.column(schema, field)?;
        let mut step = Step::default();
        step.push(
            sql(self.provider.generate_add_column(table, &column)?),
            self.drop_column(table, &column.name)?,
        );
        if let Some(fk) = self.foreign_key(schema, table, field) {
            step.push(self.add_foreign_key(&fk)?, self.drop_foreign_key(&fk)?);
        }
        Ok(step)
    }

    /// Converts a column to `target` while moving from the `from` schema to
    /// the `to` schema. Indexes on the column and foreign keys pointing at it
    /// do not survive the column drop; they are dropped first and restored
    /// afterwards.
    fn safe_type_change(
        &self,
        from: &Schema,
        to: &Schema,
        table: &str,
        target: &ColumnDef,
    ) -> Result<Vec<String>> {
        if target.primary_key && !self.provider.supports_operation(Operation::AddPrimaryKey) {
            return Ok(vec![self.unsupported(
                Operation::AddPrimaryKey,
                &format!("{table}.{}", target.name),
            )]);
        }

        let indexes = self.indexes_covering(from, to, table, &target.name);
        let referencing = self.referencing_keys(from, to, table, &target.name)?;

        let mut statements = Vec::new();
        for index in &indexes {
            statements.push(sql(self.provider.generate_drop_index(index)));
        }
        for (fk, _) in &referencing {
            statements.push(self.drop_foreign_key(fk)?);
        }
        statements.extend(self.copy_column(table, target)?);
        for (fk, retyped) in &referencing {
            if let Some(column) = retyped {
                statements.push(self.alter_column(
                    &fk.table,
                    column,
                    &AlterColumnChange::SetDataType,
                )?);
            }
            statements.push(self.add_foreign_key(fk)?);
        }
        for index in &indexes {
            statements.push(sql(self.provider.generate_create_index(index)));
        }
        Ok(statements)
    }

    /// Add/copy/drop/rename sequence, then the column's constraints.
    fn copy_column(&self, table: &str, target: &ColumnDef) -> Result<Vec<String>> {
        let temp_name = format!("{}{TEMP_COLUMN_SUFFIX}", target.name);
        let mut temp = target.clone().renamed(temp_name.clone());
        temp.nullable = true;
        temp.primary_key = false;
        if temp.data_type == FieldType::Serial {
            temp.data_type = FieldType::Integer;
        }
        let cast_type = self.provider.convert_field_type(&temp)?;

        let mut statements = vec![
            sql(self.provider.generate_add_column(table, &temp)?),
            sql(format!(
                "UPDATE {} SET {} = CAST({} AS {cast_type})",
                self.provider.quote_identifier(table),
                self.provider.quote_identifier(&temp_name),
                self.provider.quote_identifier(&target.name),
            )),
            self.drop_column(table, &target.name)?,
            self.rename_column(table, &temp_name, &target.name)?,
        ];
        if target.primary_key {
            let key = [target.name.clone()];
            statements.push(sql(self.provider.generate_add_primary_key(table, &key)?));
        } else if !target.nullable && self.provider.supports_operation(Operation::AlterColumn) {
            statements.push(self.alter_column(
                table,
                target,
                &AlterColumnChange::SetNullable(false),
            )?);
        }
        Ok(statements)
    }

    /// Indexes on `table.column` declared identically in both schemas.
    fn indexes_covering(
        &self,
        from: &Schema,
        to: &Schema,
        table: &str,
        column: &str,
    ) -> Vec<IndexDef> {
        let (Some(before), Some(after)) = (from.get_table(table), to.get_table(table)) else {
            return Vec::new();
        };
        after
            .indexes
            .iter()
            .filter(|index| index.fields.iter().any(|f| f == column))
            .filter(|index| {
                before
                    .get_index(&index.name)
                    .is_some_and(|previous| previous.same_shape(index))
            })
            .map(|index| self.index(table, index))
            .collect()
    }

    /// Foreign keys of `to` referencing `table.column` that also exist in
    /// `from`, each with the referencing column's new shape when its storage
    /// type follows the key.
    fn referencing_keys(
        &self,
        from: &Schema,
        to: &Schema,
        table: &str,
        column: &str,
    ) -> Result<Vec<(ForeignKeyDef, Option<ColumnDef>)>> {
        let mut keys = Vec::new();
        for other in &to.tables {
            for field in other.foreign_keys() {
                if field.foreign_key_target() != Some(table) {
                    continue;
                }
                let Some(before) = from
                    .get_table(&other.name)
                    .and_then(|t| t.get_field(&field.name))
                    .filter(|f| f.foreign_key_target() == Some(table))
                else {
                    continue;
                };
                let Some(fk) = self.foreign_key(to, &other.name, field) else {
                    continue;
                };
                if fk.ref_column != column {
                    continue;
                }

                let current = self.column(from, before)?;
                let wanted = self.column(to, field)?;
                let retyped = (self.provider.convert_field_type(&current)?
                    != self.provider.convert_field_type(&wanted)?)
                .then_some(wanted);
                keys.push((fk, retyped));
            }
        }
        Ok(keys)
    }

    fn unsupported(&self, operation: Operation, target: &str) -> String {
        warn!(
            provider = self.provider.name(),
            operation = %operation,
            target,
            "Operation not supported, emitting comment"
        );
        format!(
            "-- {operation} not supported by {}: manual recreation required for {target}",
            self.provider.name()
        )
    }

    fn alter_column(
        &self,
        table: &str,
        column: &ColumnDef,
        change: &AlterColumnChange,
    ) -> Result<String> {
        if !self.provider.supports_operation(Operation::AlterColumn) {
            return Ok(self.unsupported(
                Operation::AlterColumn,
                &format!("{table}.{}", column.name),
            ));
        }
        Ok(sql(self.provider.generate_alter_column(table, column, change)?))
    }

    fn drop_column(&self, table: &str, column: &str) -> Result<String> {
        if !self.provider.supports_operation(Operation::DropColumn) {
            return Ok(self.unsupported(Operation::DropColumn, &format!("{table}.{column}")));
        }
        Ok(sql(self.provider.generate_drop_column(table, column)?))
    }

    fn rename_table(&self, from: &str, to: &str) -> Result<String> {
        if !self.provider.supports_operation(Operation::RenameTable) {
            return Ok(self.unsupported(Operation::RenameTable, &format!("{from} -> {to}")));
        }
        Ok(sql(self.provider.generate_rename_table(from, to)?))
    }

    fn rename_column(&self, table: &str, from: &str, to: &str) -> Result<String> {
        if !self.provider.supports_operation(Operation::RenameColumn) {
            return Ok(self.unsupported(
                Operation::RenameColumn,
                &format!("{table}.{from} -> {to}"),
            ));
        }
        Ok(sql(self.provider.generate_rename_column(table, from, to)?))
    }

    fn add_foreign_key(&self, fk: &ForeignKeyDef) -> Result<String> {
        if !self.provider.supports_operation(Operation::AddForeignKey) {
            return Ok(self.unsupported(
                Operation::AddForeignKey,
                &format!("{}.{}", fk.table, fk.column),
            ));
        }
        Ok(sql(self.provider.generate_foreign_key_constraint(fk)?))
    }

    /// Renames the constraint `current` to `name`. Dialects that cannot
    /// rename constraints drop and re-add it; dialects that cannot do either
    /// never address constraints by name.
    fn rename_foreign_key(&self, current: &ForeignKeyDef, name: &str) -> Result<Step> {
        let mut step = Step::default();
        if self.provider.supports_operation(Operation::RenameForeignKey) {
            let rename = |from: &str, to: &str| {
                self.provider
                    .generate_rename_foreign_key_constraint(&current.table, from, to)
                    .map(sql)
            };
            step.push(rename(&current.name, name)?, rename(name, &current.name)?);
        } else if self.provider.supports_operation(Operation::DropForeignKey)
            && self.provider.supports_operation(Operation::AddForeignKey)
        {
            let renamed = current.clone().named(name);
            step.push(self.drop_foreign_key(current)?, self.add_foreign_key(current)?);
            step.push(self.add_foreign_key(&renamed)?, self.drop_foreign_key(&renamed)?);
        }
        Ok(step)
    }

    fn drop_foreign_key(&self, fk: &ForeignKeyDef) -> Result<String> {
        if !self.provider.supports_operation(Operation::DropForeignKey) {
            return Ok(self.unsupported(
                Operation::DropForeignKey,
                &format!("{}.{}", fk.table, fk.column),
            ));
        }
        Ok(sql(self.provider.generate_drop_foreign_key_constraint(fk)?))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::diff::diff_schemas;
    use crate::provider::{PostgresProvider, SqliteProvider};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    fn users() -> Table {
        Table::new("users")
            .field(Field::new("id", FieldType::Serial).primary_key())
            .field(Field::new("name", FieldType::Varchar).length(100))
    }

    fn plan(
        provider: &dyn Provider,
        options: PlanOptions,
        old: Option<&Schema>,
        new: &Schema,
    ) -> MigrationPlan {
        let diff = diff_schemas(old, Some(new));
        MigrationPlanner::new(provider)
            .with_options(options)
            .assemble_at(&diff, old, new, &mut AlwaysReview, now())
            .unwrap()
    }

    #[test]
    fn test_initial_plan_orders_tables() {
        let schema = Schema::new("blog")
            .table(
                Table::new("posts")
                    .field(Field::new("id", FieldType::Serial).primary_key())
                    .field(Field::foreign_key("user_id", "users").not_null()),
            )
            .table(users());

        let plan = plan(&PostgresProvider::new(), PlanOptions::new(), None, &schema);

        assert_eq!(plan.filename, "20240301123000_initial.sql");
        assert!(!plan.destructive);
        assert_eq!(plan.up.len(), 2);
        assert!(plan.up[0].starts_with("CREATE TABLE \"users\""));
        assert!(plan.up[1].starts_with("CREATE TABLE \"posts\""));
        assert!(plan.up[1].contains("\"user_id\" INTEGER NOT NULL"));
        assert!(plan.up[1].contains(
            "CONSTRAINT \"fk_posts_user_id\" FOREIGN KEY (\"user_id\") REFERENCES \"users\" (\"id\")"
        ));
        assert_eq!(
            plan.down,
            vec!["DROP TABLE \"posts\";", "DROP TABLE \"users\";"]
        );
    }

    #[test]
    fn test_cycle_deferred_constraints() {
        let schema = Schema::new("app")
            .table(
                Table::new("a")
                    .field(Field::new("id", FieldType::Serial).primary_key())
                    .field(Field::foreign_key("b_id", "b")),
            )
            .table(
                Table::new("b")
                    .field(Field::new("id", FieldType::Serial).primary_key())
                    .field(Field::foreign_key("a_id", "a")),
            );

        let plan = plan(&PostgresProvider::new(), PlanOptions::new(), None, &schema);

        assert_eq!(plan.up.len(), 4);
        assert!(plan.up[0].starts_with("CREATE TABLE \"a\""));
        assert!(!plan.up[0].contains("FOREIGN KEY"));
        assert!(plan.up[0].contains("\"b_id\" INTEGER"));
        assert!(plan.up[1].starts_with("CREATE TABLE \"b\""));
        assert_eq!(
            plan.up[2],
            "ALTER TABLE \"a\" ADD CONSTRAINT \"fk_a_b_id\" FOREIGN KEY (\"b_id\") REFERENCES \"b\" (\"id\");"
        );
        assert_eq!(
            plan.down,
            vec![
                "ALTER TABLE \"b\" DROP CONSTRAINT \"fk_b_a_id\";",
                "ALTER TABLE \"a\" DROP CONSTRAINT \"fk_a_b_id\";",
                "DROP TABLE \"b\";",
                "DROP TABLE \"a\";",
            ]
        );
    }

    #[test]
    fn test_cycle_fail_fast() {
        let schema = Schema::new("app")
            .table(Table::new("a").field(Field::foreign_key("b_id", "b")))
            .table(Table::new("b").field(Field::foreign_key("a_id", "a")));
        let diff = diff_schemas(None, Some(&schema));
        let result = MigrationPlanner::new(&PostgresProvider::new())
            .with_options(PlanOptions::new().with_cycle_policy(CyclePolicy::FailFast))
            .assemble_at(&diff, None, &schema, &mut AlwaysReview, now());
        match result {
            Err(SchemaError::CircularDependency { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("Expected CircularDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_sqlite_keeps_cyclic_keys_inline() {
        let schema = Schema::new("app")
            .table(Table::new("a").field(Field::foreign_key("b_id", "b")))
            .table(Table::new("b").field(Field::foreign_key("a_id", "a")));
        let plan = plan(&SqliteProvider::new(), PlanOptions::new(), None, &schema);
        assert_eq!(plan.up.len(), 2);
        assert!(plan.up.iter().all(|s| s.contains("FOREIGN KEY")));
    }

    #[test]
    fn test_many_to_many_junction() {
        let schema = Schema::new("blog")
            .table(
                Table::new("posts")
                    .field(Field::new("id", FieldType::Serial).primary_key())
                    .field(Field::many_to_many("tags", "tags")),
            )
            .table(Table::new("tags").field(Field::new("id", FieldType::Uuid).primary_key()));

        let plan = plan(&PostgresProvider::new(), PlanOptions::new(), None, &schema);

        assert_eq!(plan.up.len(), 3);
        let junction = &plan.up[2];
        assert!(junction.starts_with("CREATE TABLE \"posts_tags\""));
        assert!(junction.contains("\"id\" SERIAL PRIMARY KEY"));
        assert!(junction.contains("\"posts_id\" INTEGER NOT NULL"));
        assert!(junction.contains("\"tags_id\" UUID NOT NULL"));
        assert!(junction.contains("ON DELETE CASCADE"));
        assert_eq!(plan.down[0], "DROP TABLE \"posts_tags\";");
    }

    #[test]
    fn test_self_referencing_junction() {
        let schema = Schema::new("social").table(
            Table::new("users")
                .field(Field::new("id", FieldType::Serial).primary_key())
                .field(Field::many_to_many("friends", "users")),
        );
        let plan = plan(&PostgresProvider::new(), PlanOptions::new(), None, &schema);
        assert!(plan.up[1].contains("\"users_id\" INTEGER NOT NULL"));
        assert!(plan.up[1].contains("\"users_target_id\" INTEGER NOT NULL"));
    }

    #[test]
    fn test_add_field_pair() {
        let old = Schema::new("app").table(users());
        let new = Schema::new("app").table(
            users().field(
                Field::new("email", FieldType::Varchar)
                    .length(255)
                    .not_null()
                    .default_value("x"),
            ),
        );

        let plan = plan(&PostgresProvider::new(), PlanOptions::new(), Some(&old), &new);

        assert_eq!(plan.description, "add_field_users_email");
        assert_eq!(
            plan.up,
            vec!["ALTER TABLE \"users\" ADD COLUMN \"email\" VARCHAR(255) NOT NULL DEFAULT 'x';"]
        );
        assert_eq!(
            plan.down,
            vec!["ALTER TABLE \"users\" DROP COLUMN \"email\";"]
        );
    }

    #[test]
    fn test_removed_field_restored_exactly() {
        let old = Schema::new("app")
            .default_symbol("postgresql", "active", "'ACTIVE'")
            .table(users().field(
                Field::new("status", FieldType::Varchar)
                    .length(20)
                    .not_null()
                    .default_value("active"),
            ));
        let new = Schema::new("app").table(users());

        let mut generate = |_: &Change| Disposition::Generate;
        let diff = diff_schemas(Some(&old), Some(&new));
        let plan = MigrationPlanner::new(&PostgresProvider::new())
            .assemble_at(&diff, Some(&old), &new, &mut generate, now())
            .unwrap();

        assert_eq!(plan.up, vec!["ALTER TABLE \"users\" DROP COLUMN \"status\";"]);
        assert_eq!(
            plan.down,
            vec![
                "ALTER TABLE \"users\" ADD COLUMN \"status\" VARCHAR(20) NOT NULL DEFAULT 'ACTIVE';"
            ]
        );
    }

    #[test]
    fn test_safe_type_change_is_symmetric() {
        let old = Schema::new("app").table(
            Table::new("events").field(Field::new("count", FieldType::Integer).not_null()),
        );
        let new = Schema::new("app").table(
            Table::new("events").field(Field::new("count", FieldType::Bigint).not_null()),
        );

        let plan = plan(&PostgresProvider::new(), PlanOptions::new(), Some(&old), &new);

        assert_eq!(
            plan.up,
            vec![
                "ALTER TABLE \"events\" ADD COLUMN \"count__tmp\" BIGINT;",
                "UPDATE \"events\" SET \"count__tmp\" = CAST(\"count\" AS BIGINT);",
                "ALTER TABLE \"events\" DROP COLUMN \"count\";",
                "ALTER TABLE \"events\" RENAME COLUMN \"count__tmp\" TO \"count\";",
                "ALTER TABLE \"events\" ALTER COLUMN \"count\" SET NOT NULL;",
            ]
        );
        let mirrored: Vec<String> = plan
            .up
            .iter()
            .map(|s| s.replace("BIGINT", "INTEGER"))
            .collect();
        assert_eq!(plan.down, mirrored);
    }

    #[test]
    fn test_length_change_folded_into_type_change() {
        let old = Schema::new("app").table(users());
        let mut new = old.clone();
        new.tables[0].fields[1] = Field::new("name", FieldType::Text).length(500);

        let plan = plan(
            &PostgresProvider::new(),
            PlanOptions::new().with_safe_type_changes(false),
            Some(&old),
            &new,
        );

        assert_eq!(
            plan.up,
            vec!["ALTER TABLE \"users\" ALTER COLUMN \"name\" TYPE TEXT USING \"name\"::TEXT;"]
        );
    }

    #[test]
    fn test_unsupported_alter_becomes_comment() {
        let old = Schema::new("app").table(users());
        let mut new = old.clone();
        new.tables[0].fields[1] = Field::new("name", FieldType::Integer);

        let plan = plan(
            &SqliteProvider::new(),
            PlanOptions::new()
                .with_safe_type_changes(false)
                .with_review_marker(""),
            Some(&old),
            &new,
        );

        assert_eq!(
            plan.up,
            vec!["-- ALTER COLUMN not supported by sqlite: manual recreation required for users.name"]
        );
    }

    #[test]
    fn test_review_prefixes_every_line() {
        let old = Schema::new("app").table(users()).table(
            Table::new("legacy")
                .field(Field::new("id", FieldType::Serial).primary_key())
                .field(Field::new("data", FieldType::Text)),
        );
        let new = Schema::new("app").table(users());

        let plan = plan(&PostgresProvider::new(), PlanOptions::new(), Some(&old), &new);

        assert!(plan.destructive);
        assert_eq!(plan.up, vec!["-- REVIEW: DROP TABLE \"legacy\";"]);
        assert!(plan.down[0]
            .lines()
            .all(|line| line.starts_with("-- REVIEW: ")));
        assert_eq!(plan.filename, "20240301123000_remove_table_legacy.sql");
    }

    #[test]
    fn test_omit_and_abort() {
        let old = Schema::new("app").table(
            users().field(Field::new("bio", FieldType::Text)),
        );
        let new = Schema::new("app").table(
            users().field(Field::new("email", FieldType::Text)),
        );
        let diff = diff_schemas(Some(&old), Some(&new));
        let provider = PostgresProvider::new();
        let planner = MigrationPlanner::new(&provider);

        let mut omit = |_: &Change| Disposition::Omit;
        let plan = planner
            .assemble_at(&diff, Some(&old), &new, &mut omit, now())
            .unwrap();
        assert_eq!(plan.up.len(), 1);
        assert!(plan.up[0].contains("ADD COLUMN \"email\""));
        assert_eq!(plan.down.len(), 1);

        let mut seen = Vec::new();
        let mut abort = |change: &Change| {
            seen.push(change.description.clone());
            Disposition::Abort
        };
        match planner.assemble_at(&diff, Some(&old), &new, &mut abort, now()) {
            Err(SchemaError::UserCancelled { change }) => {
                assert_eq!(change, "Remove field users.bio");
            }
            other => panic!("Expected UserCancelled, got {:?}", other),
        }
        assert_eq!(seen, vec!["Remove field users.bio"]);
    }

    #[test]
    fn test_removed_tables_dropped_in_reverse_order() {
        let old = Schema::new("blog")
            .table(users())
            .table(
                Table::new("posts")
                    .field(Field::new("id", FieldType::Serial).primary_key())
                    .field(Field::foreign_key("user_id", "users")),
            )
            .table(Table::new("keep").field(Field::new("id", FieldType::Serial).primary_key()));
        let new = Schema::new("blog")
            .table(Table::new("keep").field(Field::new("id", FieldType::Serial).primary_key()));

        let mut generate = |_: &Change| Disposition::Generate;
        let diff = diff_schemas(Some(&old), Some(&new));
        let plan = MigrationPlanner::new(&PostgresProvider::new())
            .assemble_at(&diff, Some(&old), &new, &mut generate, now())
            .unwrap();

        assert_eq!(
            plan.up,
            vec!["DROP TABLE \"posts\";", "DROP TABLE \"users\";"]
        );
        assert!(plan.down[0].starts_with("CREATE TABLE \"users\""));
        assert!(plan.down[1].starts_with("CREATE TABLE \"posts\""));
        assert_eq!(plan.description, "update_schema");
    }

    #[test]
    fn test_rename_field() {
        let old = Schema::new("app").table(users());
        let mut new = old.clone();
        new.tables[0].fields[1] = Field::new("full_name", FieldType::Varchar)
            .length(100)
            .renamed_from("name");

        let plan = plan(&PostgresProvider::new(), PlanOptions::new(), Some(&old), &new);

        assert_eq!(
            plan.up,
            vec!["ALTER TABLE \"users\" RENAME COLUMN \"name\" TO \"full_name\";"]
        );
        assert_eq!(
            plan.down,
            vec!["ALTER TABLE \"users\" RENAME COLUMN \"full_name\" TO \"name\";"]
        );
    }

    #[test]
    fn test_reference_change_swaps_constraint() {
        let base = Schema::new("app")
            .table(users())
            .table(Table::new("teams").field(Field::new("id", FieldType::Serial).primary_key()));
        let old = base.clone().table(
            Table::new("members").field(Field::foreign_key("user_id", "users")),
        );
        let new = base.table(
            Table::new("members")
                .field(Field::foreign_key("user_id", "users").on_delete(OnDelete::Cascade)),
        );

        let plan = plan(&PostgresProvider::new(), PlanOptions::new(), Some(&old), &new);

        assert_eq!(
            plan.up,
            vec![
                "ALTER TABLE \"members\" DROP CONSTRAINT \"fk_members_user_id\";",
                "ALTER TABLE \"members\" ADD CONSTRAINT \"fk_members_user_id\" FOREIGN KEY (\"user_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE;",
            ]
        );
        assert_eq!(
            plan.down,
            vec![
                "ALTER TABLE \"members\" DROP CONSTRAINT \"fk_members_user_id\";",
                "ALTER TABLE \"members\" ADD CONSTRAINT \"fk_members_user_id\" FOREIGN KEY (\"user_id\") REFERENCES \"users\" (\"id\");",
            ]
        );
    }

    #[test]
    fn test_description_override() {
        let schema = Schema::new("app").table(users());
        let plan = plan(
            &PostgresProvider::new(),
            PlanOptions::new()
                .with_description("Create Users!")
                .with_timestamp_format("%Y%m%d"),
            None,
            &schema,
        );
        assert_eq!(plan.filename, "20240301_create_users.sql");
    }

    #[test]
    fn test_safe_type_change_restores_primary_key() {
        let attendees = Table::new("attendees").field(Field::foreign_key("event_id", "events"));
        let old = Schema::new("app")
            .table(Table::new("events").field(Field::new("id", FieldType::Integer).primary_key()))
            .table(attendees.clone());
        let new = Schema::new("app")
            .table(Table::new("events").field(Field::new("id", FieldType::Bigint).primary_key()))
            .table(attendees);

        let plan = plan(&PostgresProvider::new(), PlanOptions::new(), Some(&old), &new);

        assert_eq!(
            plan.up,
            vec![
                "ALTER TABLE \"attendees\" DROP CONSTRAINT \"fk_attendees_event_id\";",
                "ALTER TABLE \"events\" ADD COLUMN \"id__tmp\" BIGINT;",
                "UPDATE \"events\" SET \"id__tmp\" = CAST(\"id\" AS BIGINT);",
                "ALTER TABLE \"events\" DROP COLUMN \"id\";",
                "ALTER TABLE \"events\" RENAME COLUMN \"id__tmp\" TO \"id\";",
                "ALTER TABLE \"events\" ADD PRIMARY KEY (\"id\");",
                "ALTER TABLE \"attendees\" ALTER COLUMN \"event_id\" TYPE BIGINT USING \"event_id\"::BIGINT;",
                "ALTER TABLE \"attendees\" ADD CONSTRAINT \"fk_attendees_event_id\" FOREIGN KEY (\"event_id\") REFERENCES \"events\" (\"id\");",
            ]
        );
        let mirrored: Vec<String> = plan
            .up
            .iter()
            .map(|s| s.replace("BIGINT", "INTEGER"))
            .collect();
        assert_eq!(plan.down, mirrored);
    }

    #[test]
    fn test_safe_type_change_recreates_indexes() {
        let table = |field: Field| {
            Table::new("users")
                .field(Field::new("id", FieldType::Serial).primary_key())
                .field(field)
                .index(Index::new("idx_email", vec!["email".to_string()]).unique())
        };
        let old = Schema::new("app").table(table(Field::new("email", FieldType::Varchar).length(100)));
        let new = Schema::new("app").table(table(Field::new("email", FieldType::Text)));

        let plan = plan(&PostgresProvider::new(), PlanOptions::new(), Some(&old), &new);

        assert_eq!(plan.up.len(), 6, "{:?}", plan.up);
        assert_eq!(plan.up[0], "DROP INDEX \"idx_email\";");
        assert_eq!(plan.up[3], "ALTER TABLE \"users\" DROP COLUMN \"email\";");
        assert_eq!(
            plan.up[5],
            "CREATE UNIQUE INDEX \"idx_email\" ON \"users\" (\"email\");"
        );
        assert_eq!(plan.down.first(), plan.up.first());
        assert_eq!(plan.down.last(), plan.up.last());
        assert!(plan.down[1].ends_with("\"email__tmp\" VARCHAR(100);"));
    }

    #[test]
    fn test_sqlite_primary_key_retype_is_manual() {
        let old = Schema::new("app")
            .table(Table::new("tags").field(Field::new("code", FieldType::Integer).primary_key()));
        let new = Schema::new("app")
            .table(Table::new("tags").field(Field::new("code", FieldType::Text).primary_key()));

        let mut generate = |_: &Change| Disposition::Generate;
        let diff = diff_schemas(Some(&old), Some(&new));
        let plan = MigrationPlanner::new(&SqliteProvider::new())
            .assemble_at(&diff, Some(&old), &new, &mut generate, now())
            .unwrap();

        assert_eq!(
            plan.up,
            vec!["-- ADD PRIMARY KEY not supported by sqlite: manual recreation required for tags.code"]
        );
    }

    #[test]
    fn test_table_rename_renames_constraints() {
        let teams = Table::new("teams").field(Field::new("id", FieldType::Serial).primary_key());
        let v1 = Schema::new("app").table(teams.clone()).table(
            Table::new("people")
                .field(Field::new("id", FieldType::Serial).primary_key())
                .field(Field::foreign_key("team_id", "teams")),
        );
        let v2 = Schema::new("app").table(teams).table(
            Table::new("users")
                .renamed_from("people")
                .field(Field::new("id", FieldType::Serial).primary_key())
                .field(Field::foreign_key("team_id", "teams")),
        );
        let mut v3 = v2.clone();
        v3.tables[1].fields[1] =
            Field::foreign_key("team_id", "teams").on_delete(OnDelete::Cascade);

        let provider = PostgresProvider::new();
        let renamed = plan(&provider, PlanOptions::new(), Some(&v1), &v2);
        assert_eq!(
            renamed.up,
            vec![
                "ALTER TABLE \"people\" RENAME TO \"users\";",
                "ALTER TABLE \"users\" RENAME CONSTRAINT \"fk_people_team_id\" TO \"fk_users_team_id\";",
            ]
        );
        assert_eq!(
            renamed.down,
            vec![
                "ALTER TABLE \"users\" RENAME CONSTRAINT \"fk_users_team_id\" TO \"fk_people_team_id\";",
                "ALTER TABLE \"users\" RENAME TO \"people\";",
            ]
        );

        let cascaded = plan(&provider, PlanOptions::new(), Some(&v2), &v3);
        assert_eq!(
            cascaded.up[0],
            "ALTER TABLE \"users\" DROP CONSTRAINT \"fk_users_team_id\";"
        );
    }

    #[test]
    fn test_table_rename_renames_junction_columns() {
        let v1 = Schema::new("app").table(
            Table::new("people")
                .field(Field::new("id", FieldType::Serial).primary_key())
                .field(Field::many_to_many("friends", "people")),
        );
        let v2 = Schema::new("app").table(
            Table::new("users")
                .renamed_from("people")
                .field(Field::new("id", FieldType::Serial).primary_key())
                .field(Field::many_to_many("friends", "users")),
        );

        let plan = plan(&PostgresProvider::new(), PlanOptions::new(), Some(&v1), &v2);

        assert_eq!(
            plan.up,
            vec![
                "ALTER TABLE \"people\" RENAME TO \"users\";",
                "ALTER TABLE \"people_friends\" RENAME TO \"users_friends\";",
                "ALTER TABLE \"users_friends\" RENAME COLUMN \"people_id\" TO \"users_id\";",
                "ALTER TABLE \"users_friends\" RENAME COLUMN \"people_target_id\" TO \"users_target_id\";",
            ]
        );
        assert_eq!(plan.down.len(), 4);
        assert_eq!(plan.down[3], "ALTER TABLE \"users\" RENAME TO \"people\";");
    }

    #[test]
    fn test_renamed_target_renames_junction_column() {
        let v1 = Schema::new("app")
            .table(Table::new("tags").field(Field::new("id", FieldType::Serial).primary_key()))
            .table(
                Table::new("posts")
                    .field(Field::new("id", FieldType::Serial).primary_key())
                    .field(Field::many_to_many("tags", "tags")),
            );
        let v2 = Schema::new("app")
            .table(
                Table::new("labels")
                    .renamed_from("tags")
                    .field(Field::new("id", FieldType::Serial).primary_key()),
            )
            .table(
                Table::new("posts")
                    .field(Field::new("id", FieldType::Serial).primary_key())
                    .field(Field::many_to_many("tags", "labels")),
            );

        let plan = plan(&PostgresProvider::new(), PlanOptions::new(), Some(&v1), &v2);

        assert_eq!(
            plan.up,
            vec![
                "ALTER TABLE \"tags\" RENAME TO \"labels\";",
                "ALTER TABLE \"posts_tags\" RENAME COLUMN \"tags_id\" TO \"labels_id\";",
            ]
        );
    }

    #[test]
    fn test_many_to_many_on_delete_keeps_junction() {
        let old = Schema::new("app").table(
            Table::new("posts")
                .field(Field::new("id", FieldType::Serial).primary_key())
                .field(Field::many_to_many("tags", "posts")),
        );
        let mut new = old.clone();
        new.tables[0].fields[1] = Field::many_to_many("tags", "posts").on_delete(OnDelete::Cascade);

        let diff = diff_schemas(Some(&old), Some(&new));
        let plan = MigrationPlanner::new(&PostgresProvider::new())
            .assemble_at(&diff, Some(&old), &new, &mut AlwaysReview, now())
            .unwrap();
        assert!(plan.is_empty());
        assert!(!plan.destructive);
    }
}
