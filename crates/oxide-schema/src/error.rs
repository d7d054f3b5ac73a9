//! Error types for schema processing and migration generation.

/// Errors that can occur while validating, merging, diffing or planning.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The schema is structurally invalid.
    #[error("Invalid schema at '{field}': {message}")]
    Validation {
        /// Path of the offending element (e.g. `users.email`).
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Tables reference each other in a cycle that the policy does not allow.
    #[error("Circular dependency detected between tables: {}", .cycle.join(" -> "))]
    CircularDependency {
        /// The cycle, starting and ending at the same table.
        cycle: Vec<String>,
    },

    /// Two fragments declare a field in ways that cannot be reconciled.
    #[error("Cannot merge field '{table}.{field}': '{type_a}' is incompatible with '{type_b}'")]
    IncompatibleMerge {
        /// Table name.
        table: String,
        /// Field name.
        field: String,
        /// Type in the already-merged schema.
        type_a: String,
        /// Type in the incoming fragment.
        type_b: String,
    },

    /// A provider cannot render a required statement.
    #[error("Cannot generate SQL for {operation}: {message}")]
    Conversion {
        /// The operation being rendered.
        operation: String,
        /// Why it cannot be rendered.
        message: String,
    },

    /// The destructive-change handler aborted plan assembly.
    #[error("Migration generation cancelled at: {change}")]
    UserCancelled {
        /// Description of the change that was being decided.
        change: String,
    },

    /// IO error (reading schemas, writing migrations or snapshots).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Multiple errors occurred.
    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<SchemaError>),
}

impl SchemaError {
    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a conversion error.
    pub fn conversion(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conversion {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
