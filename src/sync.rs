//! Remote synchronization.
//!
//! Pushes are fire-and-forget: every local mutation already persisted before
//! the push is attempted, so a failed push only logs. Pulls go the other
//! way and are authoritative: `sync_now` replaces the local collections
//! wholesale with whatever the sheet holds, then reconciles and persists.

use std::future::Future;

use serde_json::Value;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::remote::{self, EntityKind};
use crate::store::ReceiptStore;

/// Run a best-effort push in the background. Outside an async runtime the
/// push is skipped with a warning; local state is already saved either way.
pub(crate) fn spawn_push<F>(op: &'static str, entity_id: String, fut: F)
where
    F: Future<Output = Result<Value>> + Send + 'static,
{
    if tokio::runtime::Handle::try_current().is_err() {
        warn!(op, entity_id, "no async runtime, skipping remote push");
        return;
    }
    tokio::spawn(async move {
        match fut.await {
            Ok(_) => debug!(op, entity_id, "remote push ok"),
            Err(e) => warn!(op, entity_id, error = %e, "remote push failed"),
        }
    });
}

/// What a pull brought back.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncReport {
    pub customers: usize,
    pub items: usize,
    pub orders: usize,
    pub payments: usize,
    /// Orders whose cached status the post-pull reconcile pass corrected.
    pub repaired: usize,
}

impl ReceiptStore {
    /// Pull all four collections from the remote and replace the local ones.
    ///
    /// The sheet is treated as authoritative: local rows not present there
    /// are dropped. Fails without touching local state when the remote is
    /// unreachable or not configured.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let _guard = self.guards.sync()?;
        let remote = self
            .remote
            .clone()
            .ok_or_else(|| Error::RemoteSync("no remote endpoint configured".to_string()))?;

        let (customers, items, orders, payments) = tokio::try_join!(
            remote.get_data(EntityKind::Customers),
            remote.get_data(EntityKind::Items),
            remote.get_data(EntityKind::Orders),
            remote.get_data(EntityKind::Payments),
        )?;

        let customers = remote::parse_customers(&customers);
        let items = remote::parse_items(&items);
        let mut orders = remote::parse_orders(&orders);
        let payments = remote::parse_payments(&payments);
        let repaired = crate::reconcile::reconcile(&mut orders, &payments);

        let report = SyncReport {
            customers: customers.len(),
            items: items.len(),
            orders: orders.len(),
            payments: payments.len(),
            repaired,
        };

        let mut cols = self.lock_collections()?;
        cols.customers = customers;
        cols.items = items;
        cols.orders = orders;
        cols.payments = payments;
        self.persist(&cols)?;
        drop(cols);

        info!(
            customers = report.customers,
            items = report.items,
            orders = report.orders,
            payments = report.payments,
            repaired = report.repaired,
            "pulled collections from remote"
        );
        Ok(report)
    }

    /// Startup load: prefer the remote when one is configured, fall back to
    /// whatever is already on disk when the pull fails. Never errors.
    pub async fn load_data(&self) -> Option<SyncReport> {
        if self.remote.is_none() {
            info!("no remote endpoint configured, using local data");
            return None;
        }
        match self.sync_now().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "remote pull failed, continuing with local data");
                None
            }
        }
    }

    /// Probe the configured remote with a cheap read.
    pub async fn test_remote_connection(&self) -> Result<()> {
        let remote = self
            .remote
            .clone()
            .ok_or_else(|| Error::RemoteSync("no remote endpoint configured".to_string()))?;
        remote.test_connection().await
    }
}
