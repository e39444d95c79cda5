//! Microsoft SQL Server driver.
//!
//! - [`MssqlPool`]: bb8 pool of Tiberius sessions
//! - [`MssqlStore`]: one session implementing `ResequenceStore`

mod pool;
mod sql;
mod store;

pub use pool::{MssqlPool, TiberiusConnectionManager};
pub use store::{classify_error, MssqlStore};
