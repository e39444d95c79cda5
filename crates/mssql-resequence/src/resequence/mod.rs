//! The resequencing algorithm.
//!
//! Each step lives in its own module and only talks to
//! [`ResequenceStore`](crate::core::ResequenceStore):
//!
//! 1. [`introspect`]: column listing and identity detection
//! 2. [`mapping`]: the old → new identifier mapping
//! 3. [`integrity`]: constraint suspension and revalidation on dependents
//! 4. [`rewrite`]: dependent foreign key rewrite
//! 5. [`reload`]: parent row reload under the explicit-value override
//! 6. [`orchestrator`]: the transaction and state machine around 1-5

pub mod integrity;
pub mod introspect;
pub mod mapping;
pub mod orchestrator;
pub mod reload;
pub mod rewrite;

pub use integrity::IntegrityGate;
pub use orchestrator::{
    resequence_table, ResequenceOrchestrator, ResequenceReport, ResequenceRequest,
    ResequenceState,
};
pub use reload::{ExplicitIdOverride, ReloadOutcome};
pub use rewrite::DependentOutcome;
