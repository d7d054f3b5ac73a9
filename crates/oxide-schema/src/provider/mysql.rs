//! MySQL provider.
//!
//! MySQL quotes identifiers with backticks, alters columns by restating the
//! full definition (`MODIFY COLUMN`) and drops indexes and foreign keys with
//! their own statement forms.

use super::{
    relation_type_error, AlterColumnChange, ColumnDef, ForeignKeyDef, IndexDef, Operation,
    Provider,
};
use crate::error::Result;
use crate::schema::FieldType;

/// Length used for a VARCHAR without an explicit one; MySQL requires a length.
const DEFAULT_VARCHAR_LENGTH: u32 = 255;

/// MySQL SQL provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlProvider;

impl MySqlProvider {
    /// Creates a new MySQL provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Provider for MySqlProvider {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn supports_operation(&self, operation: Operation) -> bool {
        // Foreign keys cannot be renamed; they are dropped and re-added.
        operation != Operation::RenameForeignKey
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn convert_field_type(&self, column: &ColumnDef) -> Result<String> {
        let sql = match column.data_type {
            FieldType::Varchar => {
                format!("VARCHAR({})", column.length.unwrap_or(DEFAULT_VARCHAR_LENGTH))
            }
            FieldType::Text => "TEXT".to_string(),
            FieldType::Integer | FieldType::Serial => "INT".to_string(),
            FieldType::Bigint => "BIGINT".to_string(),
            FieldType::Float => "DOUBLE".to_string(),
            FieldType::Decimal => match (column.precision, column.scale) {
                (Some(p), Some(s)) => format!("DECIMAL({p}, {s})"),
                (Some(p), None) => format!("DECIMAL({p})"),
                _ => "DECIMAL".to_string(),
            },
            FieldType::Boolean => "BOOLEAN".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::Time => "TIME".to_string(),
            FieldType::Timestamp => "DATETIME".to_string(),
            FieldType::Uuid => "CHAR(36)".to_string(),
            FieldType::Json | FieldType::Jsonb => "JSON".to_string(),
            FieldType::ForeignKey | FieldType::ManyToMany => {
                return Err(relation_type_error(column))
            }
        };
        Ok(sql)
    }

    fn resolve_default(&self, symbol: &str) -> String {
        match symbol.to_ascii_lowercase().as_str() {
            "uuid" => "(UUID())".to_string(),
            _ => super::default_literal(self, symbol),
        }
    }

    fn auto_increment_suffix(&self, column: &ColumnDef) -> Option<&'static str> {
        (column.data_type == FieldType::Serial).then_some("AUTO_INCREMENT")
    }

    fn on_update_clause(&self, _column: &ColumnDef) -> Option<&'static str> {
        Some("ON UPDATE CURRENT_TIMESTAMP")
    }

    fn generate_rename_table(&self, from: &str, to: &str) -> Result<String> {
        Ok(format!(
            "RENAME TABLE {} TO {}",
            self.quote_identifier(from),
            self.quote_identifier(to)
        ))
    }

    fn generate_alter_column(
        &self,
        table: &str,
        column: &ColumnDef,
        change: &AlterColumnChange,
    ) -> Result<String> {
        let table = self.quote_identifier(table);
        let sql = match change {
            AlterColumnChange::SetDataType | AlterColumnChange::SetNullable(_) => {
                let mut target = column.clone();
                if let AlterColumnChange::SetNullable(nullable) = change {
                    target.nullable = *nullable;
                }
                format!(
                    "ALTER TABLE {table} MODIFY COLUMN {}",
                    self.column_definition(&target)?
                )
            }
            AlterColumnChange::SetDefault(default) => format!(
                "ALTER TABLE {table} ALTER COLUMN {} SET DEFAULT {default}",
                self.quote_identifier(&column.name)
            ),
            AlterColumnChange::DropDefault => format!(
                "ALTER TABLE {table} ALTER COLUMN {} DROP DEFAULT",
                self.quote_identifier(&column.name)
            ),
        };
        Ok(sql)
    }

    fn generate_drop_foreign_key_constraint(&self, foreign_key: &ForeignKeyDef) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            self.quote_identifier(&foreign_key.table),
            self.quote_identifier(&foreign_key.name)
        ))
    }

    fn generate_drop_index(&self, index: &IndexDef) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_identifier(&index.name),
            self.quote_identifier(&index.table)
        )
    }
}
