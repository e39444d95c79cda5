//! Identifier validation and quoting for SQL injection prevention.
//!
//! Table and column names arrive from configuration files and command-line
//! arguments and end up inside dynamically built T-SQL (`ALTER TABLE`,
//! `UPDATE ... FROM`, `SET IDENTITY_INSERT`). Identifiers cannot be passed as
//! statement parameters, so every name goes through this module:
//!
//! 1. Validate the identifier (empty, null bytes, excessive length)
//! 2. Wrap it in brackets
//! 3. Escape closing brackets inside the name

use crate::error::{ResequenceError, Result};

/// Maximum identifier length for SQL Server (`sysname` is `nvarchar(128)`).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty or whitespace-only identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length
///
/// # Errors
///
/// Returns `ResequenceError::Validation` with a descriptive message.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ResequenceError::Validation(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(ResequenceError::Validation(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(ResequenceError::Validation(format!(
            "SECURITY: Identifier exceeds maximum length of {} characters (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.chars().count(),
            name
        )));
    }

    Ok(())
}

/// Quote a SQL Server identifier using brackets.
///
/// ```ignore
/// assert_eq!(quote_mssql("users")?, "[users]");
/// assert_eq!(quote_mssql("table]name")?, "[table]]name]");
/// ```
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Qualify a SQL Server table name with schema.
///
/// Returns `[schema].[table]` with proper quoting.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// Quote a value as an N'...' string literal.
///
/// Only used where T-SQL requires a literal object name (`DBCC CHECKIDENT`).
pub fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}
