//! Configuration validation.

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::error::{ResequenceError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let conn = &config.connection;
    if conn.host.is_empty() {
        return Err(ResequenceError::Config("connection.host is required".into()));
    }
    if conn.database.is_empty() {
        return Err(ResequenceError::Config(
            "connection.database is required".into(),
        ));
    }
    if conn.user.is_empty() {
        return Err(ResequenceError::Config("connection.user is required".into()));
    }
    if conn.pool_size == 0 {
        return Err(ResequenceError::Config(
            "connection.pool_size must be at least 1".into(),
        ));
    }
    validate_identifier(&conn.schema)
        .map_err(|e| ResequenceError::Config(format!("connection.schema: {}", e)))?;

    for (i, job) in config.resequence.jobs.iter().enumerate() {
        if job.table.trim().is_empty() {
            return Err(ResequenceError::Config(format!(
                "resequence.jobs[{}].table is required",
                i
            )));
        }
        if job.id_column.trim().is_empty() {
            return Err(ResequenceError::Config(format!(
                "resequence.jobs[{}].id_column is required",
                i
            )));
        }
    }

    Ok(())
}
