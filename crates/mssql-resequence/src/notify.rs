//! Data-changed notifications.
//!
//! After a resequencing operation commits, the caller publishes the table name
//! so that views or caches built on the old identifiers can refresh. Handlers
//! run synchronously on the publishing task; a failing or panicking handler is
//! logged and never affects the committed operation or the other handlers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::Result;

/// Handle returned by [`DataChangeNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// Process-wide notifier used by the command-line tool.
static GLOBAL: Lazy<DataChangeNotifier> = Lazy::new(DataChangeNotifier::new);

/// Publish/subscribe hub for "table data changed" events.
pub struct DataChangeNotifier {
    handlers: RwLock<Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
}

impl Default for DataChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DataChangeNotifier {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn global() -> &'static DataChangeNotifier {
        &GLOBAL
    }

    /// Register `handler`; it receives the `schema.table` name of each change.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Deliver `table` to every handler; returns how many succeeded.
    pub fn notify(&self, table: &str) -> usize {
        // Handlers may subscribe or unsubscribe; never call them under the lock.
        let handlers: Vec<(SubscriptionId, Handler)> = self.handlers.read().clone();

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(table))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("Data-change handler {:?} failed for {}: {}", id, table, e),
                Err(_) => warn!("Data-change handler {:?} panicked for {}", id, table),
            }
        }
        debug!("Notified {} of {} subscribers about {}", delivered, self.subscriber_count(), table);
        delivered
    }
}
