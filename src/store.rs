//! The entity store service.
//!
//! `ReceiptStore` owns the four in-memory collections for the session and is
//! the only mutation surface; nothing outside this crate reaches into the
//! collections directly. Every mutation persists all four slots locally and
//! then attempts a best-effort remote push. Local persistence must succeed
//! (the error is surfaced); remote failures are logged and swallowed.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::{Error, Result};
use crate::models::{Customer, Item};
use crate::reconcile;
use crate::remote::RemoteClient;
use crate::sync;

/// The four authoritative collections for the current session.
#[derive(Debug, Default, Clone)]
pub(crate) struct Collections {
    pub customers: Vec<Customer>,
    pub items: Vec<Item>,
    pub orders: Vec<crate::models::Order>,
    pub payments: Vec<crate::models::Payment>,
}

// ---------------------------------------------------------------------------
// In-flight operation guards
// ---------------------------------------------------------------------------

/// One in-flight token per logical operation type. A duplicate trigger while
/// the first is still running gets `Error::Busy` instead of re-entering.
#[derive(Default)]
pub(crate) struct OpGuards {
    customer: AtomicBool,
    item: AtomicBool,
    order: AtomicBool,
    payment: AtomicBool,
    sync: AtomicBool,
}

pub(crate) struct InFlight<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl OpGuards {
    fn begin<'a>(&'a self, flag: &'a AtomicBool, op: &'static str) -> Result<InFlight<'a>> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            warn!(op, "duplicate trigger ignored, operation already in flight");
            return Err(Error::Busy(op));
        }
        Ok(InFlight { flag })
    }

    pub(crate) fn customer(&self) -> Result<InFlight<'_>> {
        self.begin(&self.customer, "customer")
    }

    pub(crate) fn item(&self) -> Result<InFlight<'_>> {
        self.begin(&self.item, "item")
    }

    pub(crate) fn order(&self) -> Result<InFlight<'_>> {
        self.begin(&self.order, "order")
    }

    pub(crate) fn payment(&self) -> Result<InFlight<'_>> {
        self.begin(&self.payment, "payment")
    }

    pub(crate) fn sync(&self) -> Result<InFlight<'_>> {
        self.begin(&self.sync, "sync")
    }
}

// ---------------------------------------------------------------------------
// ReceiptStore
// ---------------------------------------------------------------------------

pub struct ReceiptStore {
    pub(crate) collections: Mutex<Collections>,
    pub(crate) db: DbState,
    pub(crate) remote: Option<Arc<RemoteClient>>,
    pub(crate) guards: OpGuards,
}

impl ReceiptStore {
    /// Open the store at `data_dir`: initialize the database, load the four
    /// slots (missing slot = empty collection), build the remote client when
    /// an endpoint is configured, and run a reconcile pass over whatever was
    /// loaded.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let db = db::init(data_dir)?;
        Self::from_db(db)
    }

    fn from_db(db: DbState) -> Result<Self> {
        let mut collections = load_collections(&db)?;
        let repaired = reconcile::reconcile(&mut collections.orders, &collections.payments);

        let remote = {
            let conn = db.conn.lock().map_err(|e| Error::Storage(e.to_string()))?;
            db::get_setting(&conn, "remote", "endpoint_url")
        }
        .and_then(|url| match RemoteClient::new(&url) {
            Ok(c) => Some(Arc::new(c)),
            Err(e) => {
                warn!(error = %e, "remote endpoint configured but client setup failed");
                None
            }
        });

        let store = ReceiptStore {
            collections: Mutex::new(collections),
            db,
            remote,
            guards: OpGuards::default(),
        };

        if repaired > 0 {
            let cols = store.lock_collections()?;
            store.persist(&cols)?;
        }

        info!("Receipt store opened");
        Ok(store)
    }

    /// Configure (or replace) the remote endpoint and persist it.
    pub fn configure_remote(&mut self, url: &str) -> Result<()> {
        let client = RemoteClient::new(url)?;
        {
            let conn = self
                .db
                .conn
                .lock()
                .map_err(|e| Error::Storage(e.to_string()))?;
            db::set_setting(&conn, "remote", "endpoint_url", client.endpoint())?;
        }
        self.remote = Some(Arc::new(client));
        Ok(())
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    // -- snapshots ----------------------------------------------------------

    pub fn customers(&self) -> Vec<Customer> {
        self.lock_collections()
            .map(|c| c.customers.clone())
            .unwrap_or_default()
    }

    pub fn items(&self) -> Vec<Item> {
        self.lock_collections()
            .map(|c| c.items.clone())
            .unwrap_or_default()
    }

    pub fn orders(&self) -> Vec<crate::models::Order> {
        self.lock_collections()
            .map(|c| c.orders.clone())
            .unwrap_or_default()
    }

    pub fn payments(&self) -> Vec<crate::models::Payment> {
        self.lock_collections()
            .map(|c| c.payments.clone())
            .unwrap_or_default()
    }

    // -- customer CRUD ------------------------------------------------------

    pub fn create_customer(
        &self,
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Customer> {
        let _guard = self.guards.customer()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("customer name is required"));
        }

        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: opt_trimmed(email),
            phone: opt_trimmed(phone),
            created_at: Utc::now(),
        };

        let mut cols = self.lock_collections()?;
        cols.customers.push(customer.clone());
        self.persist(&cols)?;
        drop(cols);

        info!(customer_id = %customer.id, "customer created");
        if let Some(remote) = self.remote.clone() {
            let pushed = customer.clone();
            sync::spawn_push("saveCustomer", customer.id.clone(), async move {
                remote.save_customer(&pushed).await
            });
        }
        Ok(customer)
    }

    pub fn update_customer(
        &self,
        customer_id: &str,
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Customer> {
        let _guard = self.guards.customer()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("customer name is required"));
        }

        let mut cols = self.lock_collections()?;
        let customer = cols
            .customers
            .iter_mut()
            .find(|c| c.id == customer_id)
            .ok_or_else(|| Error::not_found("customer", customer_id))?;
        customer.name = name.to_string();
        customer.email = opt_trimmed(email);
        customer.phone = opt_trimmed(phone);
        let updated = customer.clone();
        self.persist(&cols)?;
        drop(cols);

        info!(customer_id = %updated.id, "customer updated");
        if let Some(remote) = self.remote.clone() {
            let pushed = updated.clone();
            sync::spawn_push("updateCustomer", updated.id.clone(), async move {
                remote.update_customer(&pushed).await
            });
        }
        Ok(updated)
    }

    /// Delete a customer. Does not cascade: their orders remain and render
    /// with an "Unknown" customer from then on.
    pub fn delete_customer(&self, customer_id: &str) -> Result<()> {
        let _guard = self.guards.customer()?;
        let mut cols = self.lock_collections()?;
        let before = cols.customers.len();
        cols.customers.retain(|c| c.id != customer_id);
        if cols.customers.len() == before {
            return Err(Error::not_found("customer", customer_id));
        }
        self.persist(&cols)?;
        drop(cols);

        info!(customer_id, "customer deleted");
        if let Some(remote) = self.remote.clone() {
            let id = customer_id.to_string();
            sync::spawn_push("deleteCustomer", id.clone(), async move {
                remote.delete_customer(&id).await
            });
        }
        Ok(())
    }

    // -- item CRUD ----------------------------------------------------------

    pub fn create_item(&self, name: &str, size: &str, cost_to_make: f64, price: f64) -> Result<Item> {
        let _guard = self.guards.item()?;
        validate_item_fields(name, cost_to_make, price)?;

        let item = Item {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            size: size.trim().to_string(),
            cost_to_make,
            price,
            created_at: Utc::now(),
        };

        let mut cols = self.lock_collections()?;
        cols.items.push(item.clone());
        self.persist(&cols)?;
        drop(cols);

        info!(item_id = %item.id, name = %item.name, "item created");
        if let Some(remote) = self.remote.clone() {
            let pushed = item.clone();
            sync::spawn_push("saveItem", item.id.clone(), async move {
                remote.save_item(&pushed).await
            });
        }
        Ok(item)
    }

    /// Update an item's catalog data. Historical order lines keep their
    /// snapshotted cost/sales/profit.
    pub fn update_item(
        &self,
        item_id: &str,
        name: &str,
        size: &str,
        cost_to_make: f64,
        price: f64,
    ) -> Result<Item> {
        let _guard = self.guards.item()?;
        validate_item_fields(name, cost_to_make, price)?;

        let mut cols = self.lock_collections()?;
        let item = cols
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| Error::not_found("item", item_id))?;
        item.name = name.trim().to_string();
        item.size = size.trim().to_string();
        item.cost_to_make = cost_to_make;
        item.price = price;
        let updated = item.clone();
        self.persist(&cols)?;
        drop(cols);

        info!(item_id = %updated.id, "item updated");
        if let Some(remote) = self.remote.clone() {
            let pushed = updated.clone();
            sync::spawn_push("updateItem", updated.id.clone(), async move {
                remote.update_item(&pushed).await
            });
        }
        Ok(updated)
    }

    /// Delete a catalog item. Does not cascade to orders; existing lines
    /// keep referencing the id and render "Unknown" thereafter.
    pub fn delete_item(&self, item_id: &str) -> Result<()> {
        let _guard = self.guards.item()?;
        let mut cols = self.lock_collections()?;
        let before = cols.items.len();
        cols.items.retain(|i| i.id != item_id);
        if cols.items.len() == before {
            return Err(Error::not_found("item", item_id));
        }
        self.persist(&cols)?;
        drop(cols);

        info!(item_id, "item deleted");
        if let Some(remote) = self.remote.clone() {
            let id = item_id.to_string();
            sync::spawn_push("deleteItem", id.clone(), async move {
                remote.delete_item(&id).await
            });
        }
        Ok(())
    }

    // -- settings -----------------------------------------------------------

    /// Read a store-profile setting (receipt header fields).
    pub fn store_setting(&self, key: &str) -> Option<String> {
        let conn = self.db.conn.lock().ok()?;
        db::get_setting(&conn, "store", key)
    }

    pub fn set_store_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| Error::Storage(e.to_string()))?;
        db::set_setting(&conn, "store", key, value)
    }

    // -- internals ----------------------------------------------------------

    pub(crate) fn lock_collections(&self) -> Result<MutexGuard<'_, Collections>> {
        self.collections
            .lock()
            .map_err(|e| Error::Storage(e.to_string()))
    }

    /// Write all four slots. Called with the collections lock held so the
    /// persisted snapshot matches what mutators just wrote.
    pub(crate) fn persist(&self, cols: &Collections) -> Result<()> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| Error::Storage(e.to_string()))?;
        db::write_slot(&conn, db::SLOT_CUSTOMERS, &serde_json::to_string(&cols.customers)?)?;
        db::write_slot(&conn, db::SLOT_ITEMS, &serde_json::to_string(&cols.items)?)?;
        db::write_slot(&conn, db::SLOT_ORDERS, &serde_json::to_string(&cols.orders)?)?;
        db::write_slot(&conn, db::SLOT_PAYMENTS, &serde_json::to_string(&cols.payments)?)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn open_test() -> Self {
        Self::from_db(db::open_in_memory()).expect("open test store")
    }

    #[cfg(test)]
    pub(crate) fn with_remote(mut self, client: RemoteClient) -> Self {
        self.remote = Some(Arc::new(client));
        self
    }
}

fn opt_trimmed(v: Option<&str>) -> Option<String> {
    v.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn validate_item_fields(name: &str, cost_to_make: f64, price: f64) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("item name is required"));
    }
    if !cost_to_make.is_finite() || cost_to_make < 0.0 {
        return Err(Error::validation("cost to make must be a non-negative number"));
    }
    if !price.is_finite() || price < 0.0 {
        return Err(Error::validation("price must be a non-negative number"));
    }
    Ok(())
}

/// Load the four collections from their slots. A slot that fails to parse is
/// treated as empty with a warning rather than refusing to start.
fn load_collections(db: &DbState) -> Result<Collections> {
    let conn = db.conn.lock().map_err(|e| Error::Storage(e.to_string()))?;

    fn parse_slot<T: serde::de::DeserializeOwned>(
        conn: &rusqlite::Connection,
        slot: &str,
    ) -> Result<Vec<T>> {
        let raw = db::read_slot(conn, slot)?;
        match serde_json::from_str(&raw) {
            Ok(v) => Ok(v),
            Err(e) => {
                warn!(slot, error = %e, "slot failed to parse, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    Ok(Collections {
        customers: parse_slot(&conn, db::SLOT_CUSTOMERS)?,
        items: parse_slot(&conn, db::SLOT_ITEMS)?,
        orders: parse_slot(&conn, db::SLOT_ORDERS)?,
        payments: parse_slot(&conn, db::SLOT_PAYMENTS)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use crate::orders::OrderLineInput;

    #[test]
    fn customer_crud_round_trip() {
        let store = ReceiptStore::open_test();

        let c = store
            .create_customer("Maria Santos", Some("maria@example.com"), None)
            .unwrap();
        assert_eq!(store.customers().len(), 1);

        let updated = store
            .update_customer(&c.id, "Maria R. Santos", None, Some("+63 912 555 0101"))
            .unwrap();
        assert_eq!(updated.name, "Maria R. Santos");
        assert_eq!(updated.email, None);
        assert_eq!(updated.phone.as_deref(), Some("+63 912 555 0101"));

        store.delete_customer(&c.id).unwrap();
        assert!(store.customers().is_empty());
    }

    #[test]
    fn blank_customer_name_is_rejected() {
        let store = ReceiptStore::open_test();
        let err = store.create_customer("   ", None, None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn item_validation_rejects_negative_and_non_finite_prices() {
        let store = ReceiptStore::open_test();
        assert!(matches!(
            store.create_item("Latte", "12oz", -1.0, 120.0),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.create_item("Latte", "12oz", 50.0, f64::NAN),
            Err(Error::Validation(_))
        ));
        assert!(store.create_item("Latte", "12oz", 50.0, 120.0).is_ok());
    }

    #[test]
    fn update_missing_item_is_not_found() {
        let store = ReceiptStore::open_test();
        let err = store
            .update_item("nope", "Latte", "12oz", 1.0, 2.0)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "item", .. }));
    }

    #[test]
    fn collections_survive_a_reopen_round_trip() {
        // All four collections serialize through the slots and back,
        // structurally equal, covering the trickier serde shapes: nested
        // lines, the lowercase status enum, optional timestamps, and the
        // string-backed payment method.
        let store = ReceiptStore::open_test();
        let c = store.create_customer("Ana", None, None).unwrap();
        let item = store.create_item("Mocha", "16oz", 40.0, 110.0).unwrap();
        let paid = store
            .create_order(
                &c.id,
                &[OrderLineInput {
                    item_id: item.id.clone(),
                    quantity: 2,
                }],
            )
            .unwrap();
        store
            .process_payment(&paid.id, "gcash", "GC-7788", "₱220.00", "220.00")
            .unwrap();
        let pending = store
            .create_order(
                &c.id,
                &[OrderLineInput {
                    item_id: item.id.clone(),
                    quantity: 1,
                }],
            )
            .unwrap();

        let cols = store.lock_collections().unwrap().clone();
        let reloaded = load_collections(&store.db).unwrap();
        assert_eq!(reloaded.customers, cols.customers);
        assert_eq!(reloaded.items, cols.items);
        assert_eq!(reloaded.orders, cols.orders);
        assert_eq!(reloaded.payments, cols.payments);

        let paid = reloaded.orders.iter().find(|o| o.id == paid.id).unwrap();
        assert_eq!(paid.status, OrderStatus::Completed);
        assert!(paid.date_completed.is_some());
        let pending = reloaded.orders.iter().find(|o| o.id == pending.id).unwrap();
        assert_eq!(pending.status, OrderStatus::Pending);
        assert_eq!(pending.date_completed, None);
        assert!(!reloaded.payments[0].method.is_cash());
    }

    #[test]
    fn configure_remote_persists_the_normalized_endpoint() {
        let mut store = ReceiptStore::open_test();
        assert!(!store.has_remote());

        store.configure_remote("script.example.com/exec/").unwrap();
        assert!(store.has_remote());

        let conn = store.db.conn.lock().unwrap();
        assert_eq!(
            db::get_setting(&conn, "remote", "endpoint_url").as_deref(),
            Some("https://script.example.com/exec")
        );
    }

    #[test]
    fn configure_remote_rejects_a_blank_endpoint() {
        let mut store = ReceiptStore::open_test();
        assert!(store.configure_remote("   ").is_err());
        assert!(!store.has_remote());
    }

    #[test]
    fn in_flight_guard_rejects_duplicate_trigger() {
        let guards = OpGuards::default();
        let first = guards.order().unwrap();
        assert!(matches!(guards.order(), Err(Error::Busy("order"))));
        drop(first);
        assert!(guards.order().is_ok());
    }
}
