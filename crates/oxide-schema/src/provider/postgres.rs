//! PostgreSQL provider.

use super::{
    relation_type_error, AlterColumnChange, ColumnDef, ForeignKeyDef, IndexDef, Operation,
    Provider,
};
use crate::error::Result;
use crate::schema::FieldType;

/// PostgreSQL SQL provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresProvider;

impl PostgresProvider {
    /// Creates a new PostgreSQL provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Provider for PostgresProvider {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn supports_operation(&self, _operation: Operation) -> bool {
        true
    }

    fn convert_field_type(&self, column: &ColumnDef) -> Result<String> {
        let sql = match column.data_type {
            FieldType::Varchar => match column.length {
                Some(n) => format!("VARCHAR({n})"),
                None => "VARCHAR".to_string(),
            },
            FieldType::Text => "TEXT".to_string(),
            FieldType::Integer => "INTEGER".to_string(),
            FieldType::Bigint => "BIGINT".to_string(),
            FieldType::Float => "DOUBLE PRECISION".to_string(),
            FieldType::Decimal => match (column.precision, column.scale) {
                (Some(p), Some(s)) => format!("DECIMAL({p}, {s})"),
                (Some(p), None) => format!("DECIMAL({p})"),
                _ => "DECIMAL".to_string(),
            },
            FieldType::Boolean => "BOOLEAN".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::Time => "TIME".to_string(),
            FieldType::Timestamp => "TIMESTAMP".to_string(),
            FieldType::Uuid => "UUID".to_string(),
            FieldType::Json => "JSON".to_string(),
            FieldType::Jsonb => "JSONB".to_string(),
            FieldType::Serial => "SERIAL".to_string(),
            FieldType::ForeignKey | FieldType::ManyToMany => {
                return Err(relation_type_error(column))
            }
        };
        Ok(sql)
    }

    fn resolve_default(&self, symbol: &str) -> String {
        match symbol.to_ascii_lowercase().as_str() {
            "uuid" | "gen_random_uuid" => "gen_random_uuid()".to_string(),
            _ => super::default_literal(self, symbol),
        }
    }

    fn generate_alter_column(
        &self,
        table: &str,
        column: &ColumnDef,
        change: &AlterColumnChange,
    ) -> Result<String> {
        let table = self.quote_identifier(table);
        let name = self.quote_identifier(&column.name);

        let sql = match change {
            AlterColumnChange::SetDataType => {
                let data_type = self.convert_field_type(column)?;
                format!(
                    "ALTER TABLE {table} ALTER COLUMN {name} TYPE {data_type} USING {name}::{data_type}"
                )
            }
            AlterColumnChange::SetNullable(true) => {
                format!("ALTER TABLE {table} ALTER COLUMN {name} DROP NOT NULL")
            }
            AlterColumnChange::SetNullable(false) => {
                format!("ALTER TABLE {table} ALTER COLUMN {name} SET NOT NULL")
            }
            AlterColumnChange::SetDefault(default) => {
                format!("ALTER TABLE {table} ALTER COLUMN {name} SET DEFAULT {default}")
            }
            AlterColumnChange::DropDefault => {
                format!("ALTER TABLE {table} ALTER COLUMN {name} DROP DEFAULT")
            }
        };
        Ok(sql)
    }

    fn generate_drop_foreign_key_constraint(&self, foreign_key: &ForeignKeyDef) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote_identifier(&foreign_key.table),
            self.quote_identifier(&foreign_key.name)
        ))
    }

    fn generate_drop_index(&self, index: &IndexDef) -> String {
        format!("DROP INDEX {}", self.quote_identifier(&index.name))
    }
}
