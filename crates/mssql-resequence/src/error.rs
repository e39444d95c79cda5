//! Error types for the resequencing library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for invalid arguments.
pub const EXIT_VALIDATION_ERROR: u8 = 2;
/// Exit code for schema errors (missing table/column, duplicate ids).
pub const EXIT_SCHEMA_ERROR: u8 = 3;
/// Exit code for foreign key inconsistencies found at revalidation.
pub const EXIT_CONSTRAINT_ERROR: u8 = 4;
/// Exit code for connection and transaction failures.
pub const EXIT_TRANSACTION_ERROR: u8 = 5;
/// Exit code for connection pool failures.
pub const EXIT_POOL_ERROR: u8 = 6;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for resequencing operations.
#[derive(Error, Debug)]
pub enum ResequenceError {
    /// Malformed or missing arguments, raised before any transaction opens.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Table or column missing, inconclusive identity detection, duplicate
    /// identifier values, or a type/uniqueness failure during reinsertion.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Dependent rows do not match the parent after rewriting.
    #[error("Constraint violation on {table}: {message}")]
    ConstraintViolation { table: String, message: String },

    /// Connection or transaction failure (deadlock, lost connection, commit failure).
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Database error that could not be classified more precisely
    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResequenceError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        ResequenceError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a ConstraintViolation error for a table.
    pub fn constraint(table: impl Into<String>, message: impl Into<String>) -> Self {
        ResequenceError::ConstraintViolation {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            ResequenceError::Config(_) | ResequenceError::Yaml(_) | ResequenceError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            ResequenceError::Validation(_) => EXIT_VALIDATION_ERROR,
            ResequenceError::Schema(_) => EXIT_SCHEMA_ERROR,
            ResequenceError::ConstraintViolation { .. } => EXIT_CONSTRAINT_ERROR,
            ResequenceError::Transaction(_) | ResequenceError::Database(_) => {
                EXIT_TRANSACTION_ERROR
            }
            ResequenceError::Pool { .. } => EXIT_POOL_ERROR,
            ResequenceError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for resequencing operations.
pub type Result<T> = std::result::Result<T, ResequenceError>;
