//! Store implementations.
//!
//! - [`mssql`]: Microsoft SQL Server over Tiberius, pooled with bb8
//! - [`memory`]: in-process tables with the same transactional semantics
//!
//! Both implement [`ResequenceStore`](crate::core::ResequenceStore); the
//! resequencing algorithm never names a concrete store.

pub mod memory;
pub mod mssql;

pub use memory::{FailurePoint, ForeignKey, MemoryStore, MemoryTable, Value};
pub use mssql::{MssqlPool, MssqlStore};
