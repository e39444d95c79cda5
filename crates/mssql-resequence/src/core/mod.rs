//! Core abstractions for store-agnostic resequencing.
//!
//! - [`schema`]: table, dependent reference, and layout types
//! - [`mapping`]: the old → new identifier bijection
//! - [`identifier`]: identifier validation and quoting
//! - [`traits`]: the [`ResequenceStore`] capability trait
//!
//! The algorithm in `resequence` only talks to [`ResequenceStore`]; drivers
//! (`drivers/mssql`, `drivers/memory`) implement it.

pub mod identifier;
pub mod mapping;
pub mod schema;
pub mod traits;

pub use mapping::IdentifierMapping;
pub use schema::{DependentReference, GenerationMode, ParentLayout, TableRef, DEFAULT_SCHEMA};
pub use traits::{ColumnRewrite, ResequenceStore};
