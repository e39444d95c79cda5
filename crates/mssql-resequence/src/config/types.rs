//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQL Server connection.
    pub connection: ConnectionConfig,

    /// Resequencing behavior and configured jobs.
    #[serde(default)]
    pub resequence: ResequenceConfig,
}

/// SQL Server connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. Never written back out.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Schema for unqualified table names (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

/// Resequencing behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResequenceConfig {
    /// Reset the identity seed to the new maximum after reload (default: true).
    #[serde(default = "default_true")]
    pub reseed_identity: bool,

    /// Tables resequenced by `run` when no table is given on the command line.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl Default for ResequenceConfig {
    fn default() -> Self {
        Self {
            reseed_identity: true,
            jobs: Vec::new(),
        }
    }
}

/// One configured resequencing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Parent table (`name` or `schema.name`).
    pub table: String,

    /// Identifier column.
    pub id_column: String,

    /// Dependent columns as `Table.Column` or `Schema.Table.Column`.
    #[serde(default)]
    pub dependents: Vec<String>,

    /// Add every single-column foreign key referencing the table (default: false).
    #[serde(default)]
    pub discover_dependents: bool,
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_true_string() -> String {
    "true".to_string()
}

fn default_pool_size() -> u32 {
    4
}

fn default_true() -> bool {
    true
}
