//! Schema merge engine.
//!
//! Composes a primary schema with included or vendored fragments. Fragments
//! are folded left to right; the primary schema is folded first, so its
//! declarations win every conflict that the field rules leave open.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::error::{Result, SchemaError};
use crate::schema::{Field, Include, Schema, Table};

/// Resolves an [`Include`] to the schema fragment it points at.
pub trait IncludeResolver {
    /// Loads the fragment referenced by `include`.
    fn resolve(&self, include: &Include) -> Result<Schema>;
}

impl<F> IncludeResolver for F
where
    F: Fn(&Include) -> Result<Schema>,
{
    fn resolve(&self, include: &Include) -> Result<Schema> {
        self(include)
    }
}

/// Merges schemas, the first one being the primary definition.
///
/// A single input is returned unchanged. The result keeps the primary
/// schema's identity; includes are unioned.
pub fn merge_schemas(schemas: &[Schema]) -> Result<Schema> {
    let Some((primary, fragments)) = schemas.split_first() else {
        return Err(SchemaError::validation("schemas", "no schemas to merge"));
    };

    let mut merged = primary.clone();
    for fragment in fragments {
        merge_into(&mut merged, fragment, primary)?;
    }
    Ok(merged)
}

fn merge_into(merged: &mut Schema, incoming: &Schema, primary: &Schema) -> Result<()> {
    for (dialect, symbols) in &incoming.defaults {
        let existing = merged.defaults.entry(dialect.clone()).or_default();
        for (symbol, sql) in symbols {
            existing
                .entry(symbol.clone())
                .or_insert_with(|| sql.clone());
        }
    }

    for table in &incoming.tables {
        let pinned = primary.get_table(&table.name);
        match merged.get_table_mut(&table.name) {
            Some(existing) => merge_table(existing, table, pinned)?,
            None => merged.tables.push(table.clone()),
        }
    }

    for include in &incoming.includes {
        if !merged.includes.contains(include) {
            merged.includes.push(include.clone());
        }
    }

    Ok(())
}

/// `pinned` is the primary schema's declaration of the same table, if any.
fn merge_table(existing: &mut Table, incoming: &Table, pinned: Option<&Table>) -> Result<()> {
    let table_name = existing.name.clone();
    for field in &incoming.fields {
        let primary_default = pinned
            .and_then(|t| t.get_field(&field.name))
            .and_then(Field::default_symbol)
            .is_some();
        match existing.get_field_mut(&field.name) {
            Some(current) => merge_field(&table_name, current, field, primary_default)?,
            None => existing.fields.push(field.clone()),
        }
    }

    for index in &incoming.indexes {
        if existing.get_index(&index.name).is_none() {
            existing.indexes.push(index.clone());
        }
    }

    if existing.renamed_from.is_none() {
        existing.renamed_from.clone_from(&incoming.renamed_from);
    }

    Ok(())
}

fn incompatible(table: &str, existing: &Field, incoming: &Field) -> SchemaError {
    SchemaError::IncompatibleMerge {
        table: table.to_string(),
        field: existing.name.clone(),
        type_a: existing.type_label(),
        type_b: incoming.type_label(),
    }
}

/// Reconciles `incoming` into `existing`.
///
/// `primary_default` is set when the primary schema declares a default for
/// this field; that default is never replaced.
fn merge_field(
    table: &str,
    existing: &mut Field,
    incoming: &Field,
    primary_default: bool,
) -> Result<()> {
    let relational = existing.field_type.is_relation() || incoming.field_type.is_relation();
    if relational {
        // Relations are never promoted: kind and target must agree.
        let same_target = match (&existing.references, &incoming.references) {
            (Some(a), Some(b)) => a.table == b.table,
            _ => false,
        };
        if existing.field_type != incoming.field_type || !same_target {
            return Err(incompatible(table, existing, incoming));
        }
    } else if existing.field_type != incoming.field_type {
        if existing.field_type.promotes_to(incoming.field_type) {
            existing.field_type = incoming.field_type;
        } else if !incoming.field_type.promotes_to(existing.field_type) {
            return Err(incompatible(table, existing, incoming));
        }
    }

    existing.length = larger(existing.length, incoming.length);
    existing.precision = larger(existing.precision, incoming.precision);
    existing.scale = larger(existing.scale, incoming.scale);

    if existing.nullable == Some(false) || incoming.nullable == Some(false) {
        existing.nullable = Some(false);
    } else if existing.nullable.is_none() {
        existing.nullable = incoming.nullable;
    }

    existing.primary_key |= incoming.primary_key;
    existing.auto_create |= incoming.auto_create;
    existing.auto_update |= incoming.auto_update;

    if let Some(default) = incoming.default_symbol().filter(|_| !primary_default) {
        if existing.default_symbol().is_some_and(|current| current != default) {
            debug!(
                table = %table,
                field = %existing.name,
                default = %default,
                "Incoming default replaces existing one"
            );
        }
        existing.default = Some(default.to_string());
    }

    Ok(())
}

fn larger(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Tracks include identities during one expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionState {
    /// Fragments whose expansion is complete.
    pub expanded: BTreeSet<String>,
    /// Fragments currently being expanded (the active include chain).
    pub expanding: BTreeSet<String>,
}

impl ExpansionState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Recursively resolves includes and merges them into the including schema.
pub struct IncludeExpander<'a, R: IncludeResolver + ?Sized> {
    resolver: &'a R,
}

impl<'a, R: IncludeResolver + ?Sized> IncludeExpander<'a, R> {
    /// Creates a new expander backed by `resolver`.
    #[must_use]
    pub fn new(resolver: &'a R) -> Self {
        Self { resolver }
    }

    /// Expands every include of `root`, merges all fragments with `root` as the
    /// primary, and validates the result.
    ///
    /// The merged schema has no includes left.
    pub fn expand(&self, root: &Schema) -> Result<Schema> {
        let mut state = ExpansionState::new();
        let mut fragments = Vec::new();
        self.collect(root, &mut state, &mut fragments)?;

        let mut merged = merge_schemas(&fragments)?;
        merged.includes.clear();
        merged.validate()?;

        debug!(
            schema = %merged.name,
            fragments = fragments.len(),
            tables = merged.tables.len(),
            "Expanded includes"
        );
        Ok(merged)
    }

    /// Flattens `schema` and its includes depth-first into `out`.
    pub fn collect(
        &self,
        schema: &Schema,
        state: &mut ExpansionState,
        out: &mut Vec<Schema>,
    ) -> Result<()> {
        out.push(schema.clone());

        for include in &schema.includes {
            let identity = include.identity();
            if state.expanded.contains(&identity) {
                debug!(include = %identity, "Include already expanded, skipping");
                continue;
            }
            if state.expanding.contains(&identity) {
                warn!(include = %identity, "Include cycle detected, skipping");
                continue;
            }

            state.expanding.insert(identity.clone());
            let fragment = self.resolver.resolve(include)?;
            self.collect(&fragment, state, out)?;
            state.expanding.remove(&identity);
            state.expanded.insert(identity);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::schema::{FieldType, Index, OnDelete, Reference};

    fn users(fields: Vec<Field>) -> Schema {
        let mut table = Table::new("users");
        table.fields = fields;
        Schema::new("app").table(table)
    }

    fn merged_field(schemas: &[Schema], name: &str) -> Field {
        let merged = merge_schemas(schemas).unwrap();
        merged
            .get_table("users")
            .and_then(|t| t.get_field(name))
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_single_schema_unchanged() {
        let schema = users(vec![Field::new("id", FieldType::Serial).primary_key()])
            .include(Include::new("billing", "billing.json"));
        assert_eq!(merge_schemas(&[schema.clone()]).unwrap(), schema);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(merge_schemas(&[]).is_err());
    }

    #[test]
    fn test_tables_and_fields_unioned() {
        let primary = users(vec![Field::new("id", FieldType::Serial).primary_key()]);
        let fragment = users(vec![Field::new("email", FieldType::Text)])
            .table(Table::new("orders").field(Field::new("id", FieldType::Serial)));

        let merged = merge_schemas(&[primary, fragment]).unwrap();
        assert_eq!(merged.table_names().collect::<Vec<_>>(), vec!["users", "orders"]);
        let users = merged.get_table("users").unwrap();
        let names: Vec<&str> = users.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "email"]);
    }

    #[test]
    fn test_type_promotion_either_direction() {
        let a = users(vec![Field::new("count", FieldType::Integer)]);
        let b = users(vec![Field::new("count", FieldType::Bigint)]);
        assert_eq!(
            merged_field(&[a.clone(), b.clone()], "count").field_type,
            FieldType::Bigint
        );
        assert_eq!(merged_field(&[b, a], "count").field_type, FieldType::Bigint);
    }

    #[test]
    fn test_incompatible_types_fail() {
        let a = users(vec![Field::new("flag", FieldType::Boolean)]);
        let b = users(vec![Field::new("flag", FieldType::Uuid)]);
        match merge_schemas(&[a, b]) {
            Err(SchemaError::IncompatibleMerge {
                table,
                field,
                type_a,
                type_b,
            }) => {
                assert_eq!(table, "users");
                assert_eq!(field, "flag");
                assert_eq!(type_a, "boolean");
                assert_eq!(type_b, "uuid");
            }
            other => panic!("Expected IncompatibleMerge, got {:?}", other),
        }
    }

    #[test]
    fn test_larger_length_and_precision_win() {
        let a = users(vec![
            Field::new("name", FieldType::Varchar).length(100),
            Field::new("total", FieldType::Decimal).precision(12, 2),
        ]);
        let b = users(vec![
            Field::new("name", FieldType::Varchar).length(255),
            Field::new("total", FieldType::Decimal).precision(10, 4),
        ]);
        let name = merged_field(&[a.clone(), b.clone()], "name");
        assert_eq!(name.length, Some(255));
        let total = merged_field(&[a, b], "total");
        assert_eq!(total.precision, Some(12));
        assert_eq!(total.scale, Some(4));
    }

    #[test]
    fn test_not_null_and_flags_win() {
        let a = users(vec![Field::new("created", FieldType::Timestamp).nullable()]);
        let b = users(vec![
            Field::new("created", FieldType::Timestamp)
                .not_null()
                .auto_create(),
        ]);
        let created = merged_field(&[a, b], "created");
        assert!(!created.is_nullable());
        assert!(created.auto_create);
        assert!(!created.auto_update);
    }

    #[test]
    fn test_defaults() {
        let primary = users(vec![Field::new("status", FieldType::Text)]);
        let first = users(vec![Field::new("status", FieldType::Text).default_value("active")]);
        let second = users(vec![Field::new("status", FieldType::Text).default_value("pending")]);
        let status = merged_field(&[primary, first, second], "status");
        assert_eq!(status.default.as_deref(), Some("pending"));

        let primary = users(vec![Field::new("status", FieldType::Text).default_value("draft")]);
        let fragment = users(vec![Field::new("status", FieldType::Text)]);
        let status = merged_field(&[primary, fragment], "status");
        assert_eq!(status.default.as_deref(), Some("draft"));

        let primary = users(vec![Field::new("status", FieldType::Text).default_value("draft")]);
        let fragment = users(vec![Field::new("status", FieldType::Text).default_value("active")]);
        let status = merged_field(&[primary, fragment], "status");
        assert_eq!(status.default.as_deref(), Some("draft"));
    }

    #[test]
    fn test_relation_target_must_match() {
        let base = Schema::new("app")
            .table(Table::new("teams").field(Field::new("id", FieldType::Serial).primary_key()))
            .table(Table::new("orgs").field(Field::new("id", FieldType::Serial).primary_key()));
        let mut a = base.clone();
        a.tables.push(Table::new("users").field(Field::foreign_key("team_id", "teams")));
        let b = users(vec![Field::foreign_key("team_id", "orgs")]);

        assert!(matches!(
            merge_schemas(&[a, b]),
            Err(SchemaError::IncompatibleMerge { .. })
        ));
    }

    #[test]
    fn test_relation_not_promoted() {
        let a = users(vec![Field::new("team_id", FieldType::Integer)]);
        let b = users(vec![Field::foreign_key("team_id", "teams")]);
        assert!(matches!(
            merge_schemas(&[a, b]),
            Err(SchemaError::IncompatibleMerge { .. })
        ));
    }

    #[test]
    fn test_relation_same_target_merges() {
        let a = users(vec![Field::foreign_key("team_id", "teams")]);
        let b = users(vec![
            Field::foreign_key("team_id", "teams")
                .on_delete(OnDelete::Cascade)
                .not_null(),
        ]);
        let field = merged_field(&[a, b], "team_id");
        assert_eq!(field.references, Some(Reference::new("teams")));
        assert!(!field.is_nullable());
    }

    #[test]
    fn test_indexes_first_declaration_wins() {
        let mut a = users(vec![Field::new("email", FieldType::Text)]);
        a.tables[0]
            .indexes
            .push(Index::new("idx_email", vec!["email".to_string()]).unique());
        let mut b = users(vec![Field::new("email", FieldType::Text)]);
        b.tables[0]
            .indexes
            .push(Index::new("idx_email", vec!["email".to_string()]));

        let merged = merge_schemas(&[a, b]).unwrap();
        let indexes = &merged.get_table("users").unwrap().indexes;
        assert_eq!(indexes.len(), 1);
        assert!(indexes[0].unique);
    }

    fn fragments() -> BTreeMap<String, Schema> {
        let mut map = BTreeMap::new();
        map.insert(
            "billing.json".to_string(),
            Schema::new("billing")
                .table(
                    Table::new("invoices")
                        .field(Field::new("id", FieldType::Serial).primary_key())
                        .field(Field::foreign_key("user_id", "users")),
                )
                .include(Include::new("shared", "shared.json")),
        );
        map.insert(
            "audit.json".to_string(),
            Schema::new("audit")
                .table(Table::new("events").field(Field::new("id", FieldType::Serial).primary_key()))
                .include(Include::new("shared", "shared.json")),
        );
        map.insert(
            "shared.json".to_string(),
            Schema::new("shared")
                .table(Table::new("users").field(Field::new("email", FieldType::Text)))
                .include(Include::new("billing", "billing.json")),
        );
        map
    }

    fn resolve_from(map: &BTreeMap<String, Schema>, include: &Include) -> Result<Schema> {
        map.get(&include.path).cloned().ok_or_else(|| {
            SchemaError::validation(include.identity(), "fragment not found")
        })
    }

    #[test]
    fn test_expand_diamond_and_cycle() {
        let map = fragments();
        let resolver = |include: &Include| resolve_from(&map, include);
        let root = Schema::new("app")
            .table(Table::new("users").field(Field::new("id", FieldType::Serial).primary_key()))
            .include(Include::new("billing", "billing.json"))
            .include(Include::new("audit", "audit.json"));

        let merged = IncludeExpander::new(&resolver).expand(&root).unwrap();

        assert_eq!(merged.name, "app");
        assert!(merged.includes.is_empty());
        assert_eq!(
            merged.table_names().collect::<Vec<_>>(),
            vec!["users", "invoices", "events"]
        );
        let users = merged.get_table("users").unwrap();
        assert!(users.get_field("email").is_some());
    }

    #[test]
    fn test_collect_threads_state() {
        let map = fragments();
        let resolver = |include: &Include| resolve_from(&map, include);
        let root = Schema::new("app").include(Include::new("billing", "billing.json"));

        let mut state = ExpansionState::new();
        let mut out = Vec::new();
        IncludeExpander::new(&resolver)
            .collect(&root, &mut state, &mut out)
            .unwrap();

        let names: Vec<&str> = out.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["app", "billing", "shared"]);
        assert!(state.expanding.is_empty());
        assert!(state.expanded.contains("billing:billing.json"));
        assert!(state.expanded.contains("shared:shared.json"));
    }

    #[test]
    fn test_expand_validates_result() {
        let resolver = |_: &Include| -> Result<Schema> {
            Ok(Schema::new("frag").table(
                Table::new("posts").field(Field::foreign_key("author_id", "authors")),
            ))
        };
        let root = Schema::new("app").include(Include::new("blog", "blog.json"));
        assert!(matches!(
            IncludeExpander::new(&resolver).expand(&root),
            Err(SchemaError::Validation { .. })
        ));
    }

    #[test]
    fn test_resolver_error_propagates() {
        let resolver =
            |include: &Include| -> Result<Schema> { Err(SchemaError::validation(include.identity(), "missing")) };
        let root = Schema::new("app").include(Include::new("blog", "blog.json"));
        assert!(IncludeExpander::new(&resolver).expand(&root).is_err());
    }
}
