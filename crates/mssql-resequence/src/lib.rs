//! # mssql-resequence
//!
//! Renumber the integer identifier column of a SQL Server table to the dense
//! sequence 1..N, preserving the original relative order, and rewrite every
//! dependent foreign key column so that references stay intact.
//!
//! The whole operation runs in one transaction:
//!
//! - **Mapping** built from the ascending identifiers (smallest becomes 1)
//! - **Dependents** have their constraints suspended, their foreign key
//!   columns rewritten through the mapping, then revalidated
//! - **Parent rows** are captured, deleted, and reinserted with new
//!   identifiers, under `IDENTITY_INSERT` when the column is an identity
//! - **Identity seed** reset so new rows continue at N + 1
//!
//! Any failure rolls everything back and turns `IDENTITY_INSERT` off again.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_resequence::{resequence_table, Config, MssqlPool};
//!
//! #[tokio::main]
//! async fn main() -> mssql_resequence::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let pool = MssqlPool::new(&config.connection).await?;
//!     let mut store = pool.store().await?;
//!     let report = resequence_table(&mut store, "tbProduct", "pid", &["tbOrder.pid"]).await?;
//!     println!("{} ids moved", report.ids_moved);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod notify;
pub mod resequence;

// Re-exports for convenient access
pub use config::{Config, ConnectionConfig, JobConfig, ResequenceConfig};
pub use crate::core::{
    ColumnRewrite, DependentReference, GenerationMode, IdentifierMapping, ParentLayout,
    ResequenceStore, TableRef,
};
pub use drivers::{MemoryStore, MssqlPool, MssqlStore};
pub use error::{ResequenceError, Result};
pub use notify::{DataChangeNotifier, SubscriptionId};
pub use resequence::{
    resequence_table, DependentOutcome, ResequenceOrchestrator, ResequenceReport,
    ResequenceRequest, ResequenceState,
};
