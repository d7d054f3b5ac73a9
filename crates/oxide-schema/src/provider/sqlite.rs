//! SQLite provider.
//!
//! SQLite has limited ALTER TABLE support: columns cannot be altered in
//! place and foreign keys exist only as part of CREATE TABLE. The assembler
//! asks [`Provider::supports_operation`] first and emits a comment instead.

use super::{
    relation_type_error, unsupported, AlterColumnChange, ColumnDef, ForeignKeyDef, IndexDef,
    Operation, Provider,
};
use crate::error::Result;
use crate::schema::FieldType;

/// SQLite SQL provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteProvider;

impl SqliteProvider {
    /// Creates a new SQLite provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Provider for SqliteProvider {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn supports_operation(&self, operation: Operation) -> bool {
        match operation {
            // RENAME COLUMN since 3.25.0, DROP COLUMN since 3.35.0.
            Operation::RenameTable | Operation::RenameColumn | Operation::DropColumn => true,
            Operation::AlterColumn
            | Operation::AddForeignKey
            | Operation::DropForeignKey
            | Operation::RenameForeignKey
            | Operation::AddPrimaryKey => false,
        }
    }

    fn convert_field_type(&self, column: &ColumnDef) -> Result<String> {
        let sql = match column.data_type {
            FieldType::Integer | FieldType::Bigint | FieldType::Serial | FieldType::Boolean => {
                "INTEGER"
            }
            FieldType::Varchar
            | FieldType::Text
            | FieldType::Date
            | FieldType::Time
            | FieldType::Timestamp
            | FieldType::Uuid
            | FieldType::Json
            | FieldType::Jsonb => "TEXT",
            FieldType::Float => "REAL",
            FieldType::Decimal => "NUMERIC",
            FieldType::ForeignKey | FieldType::ManyToMany => {
                return Err(relation_type_error(column))
            }
        };
        Ok(sql.to_string())
    }

    fn boolean_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn auto_increment_suffix(&self, column: &ColumnDef) -> Option<&'static str> {
        (column.data_type == FieldType::Serial).then_some("AUTOINCREMENT")
    }

    fn generate_alter_column(
        &self,
        _table: &str,
        _column: &ColumnDef,
        _change: &AlterColumnChange,
    ) -> Result<String> {
        Err(unsupported(self.name(), Operation::AlterColumn))
    }

    fn generate_drop_foreign_key_constraint(&self, _foreign_key: &ForeignKeyDef) -> Result<String> {
        Err(unsupported(self.name(), Operation::DropForeignKey))
    }

    fn generate_drop_index(&self, index: &IndexDef) -> String {
        format!("DROP INDEX {}", self.quote_identifier(&index.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;
    use crate::provider::TableDef;

    fn provider() -> SqliteProvider {
        SqliteProvider::new()
    }

    #[test]
    fn test_supported_operations() {
        assert!(provider().supports_operation(Operation::RenameColumn));
        assert!(provider().supports_operation(Operation::DropColumn));
        assert!(!provider().supports_operation(Operation::AlterColumn));
        assert!(!provider().supports_operation(Operation::AddForeignKey));
        assert!(!provider().supports_operation(Operation::DropForeignKey));
        assert!(!provider().supports_operation(Operation::AddPrimaryKey));
    }

    #[test]
    fn test_create_table() {
        let table = TableDef {
            name: "users".to_string(),
            columns: vec![
                ColumnDef::new("id", FieldType::Serial).primary_key(),
                ColumnDef::new("active", FieldType::Boolean)
                    .not_null()
                    .default_sql(provider().resolve_default("true")),
            ],
            foreign_keys: Vec::new(),
        };
        assert_eq!(
            provider().generate_create_table(&table).unwrap(),
            "CREATE TABLE \"users\" (\n\
             \x20   \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n\
             \x20   \"active\" INTEGER NOT NULL DEFAULT 1\n\
             )"
        );
    }

    #[test]
    fn test_unsupported_operations_are_conversion_errors() {
        let column = ColumnDef::new("bio", FieldType::Text);
        let result = provider().generate_alter_column("users", &column, &AlterColumnChange::DropDefault);
        assert!(matches!(result, Err(SchemaError::Conversion { .. })));

        let fk = ForeignKeyDef::new("posts", "user_id", "users", "id");
        assert!(provider().generate_foreign_key_constraint(&fk).is_err());
        assert!(provider().generate_drop_foreign_key_constraint(&fk).is_err());
    }

    #[test]
    fn test_drop_column() {
        assert_eq!(
            provider().generate_drop_column("users", "bio").unwrap(),
            "ALTER TABLE \"users\" DROP COLUMN \"bio\""
        );
    }
}
