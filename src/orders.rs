//! Order mutation service.
//!
//! Creating an order snapshots each line's cost/sales/profit from the item
//! catalog, so later catalog edits never rewrite history. Updates replace
//! the customer and the line set wholesale while preserving the original
//! `date_ordered` and cached status; deletes cascade to the order's
//! payments.

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{Order, OrderLine, OrderStatus};
use crate::store::{Collections, ReceiptStore};
use crate::sync;

/// Raw order line as entered: an item reference and a quantity.
#[derive(Debug, Clone)]
pub struct OrderLineInput {
    pub item_id: String,
    pub quantity: u32,
}

impl ReceiptStore {
    /// Create an order for `customer_id` from the given lines.
    ///
    /// The customer reference may dangle (the order then renders "Unknown");
    /// an empty selection is still rejected. Every line must reference an
    /// existing item with usable cost/price figures.
    pub fn create_order(&self, customer_id: &str, lines: &[OrderLineInput]) -> Result<Order> {
        let _guard = self.guards.order()?;
        let mut cols = self.lock_collections()?;

        let customer_id = validate_customer_selection(&cols, customer_id)?;
        let items = snapshot_lines(&cols, lines)?;

        let order = Order {
            id: next_order_id(&cols.orders),
            customer_id,
            status: OrderStatus::Pending,
            date_ordered: Utc::now(),
            date_completed: None,
            items,
        };

        cols.orders.push(order.clone());
        self.persist(&cols)?;
        drop(cols);

        info!(
            order_id = %order.id,
            lines = order.items.len(),
            total_sales = order.total_sales(),
            "order created"
        );
        if let Some(remote) = self.remote.clone() {
            let pushed = order.clone();
            sync::spawn_push("saveOrder", order.id.clone(), async move {
                remote.save_order(&pushed).await
            });
        }
        Ok(order)
    }

    /// Replace an order's customer and line set wholesale. `date_ordered`,
    /// `status`, and `date_completed` are preserved.
    pub fn update_order(
        &self,
        order_id: &str,
        customer_id: &str,
        lines: &[OrderLineInput],
    ) -> Result<Order> {
        let _guard = self.guards.order()?;
        let mut cols = self.lock_collections()?;

        if !cols.orders.iter().any(|o| o.id == order_id) {
            return Err(Error::not_found("order", order_id));
        }
        let customer_id = validate_customer_selection(&cols, customer_id)?;
        let items = snapshot_lines(&cols, lines)?;

        let order = cols
            .orders
            .iter_mut()
            .find(|o| o.id == order_id)
            .ok_or_else(|| Error::not_found("order", order_id))?;
        order.customer_id = customer_id;
        order.items = items;
        let updated = order.clone();
        self.persist(&cols)?;
        drop(cols);

        info!(order_id = %updated.id, "order updated");
        if let Some(remote) = self.remote.clone() {
            let pushed = updated.clone();
            sync::spawn_push("updateOrder", updated.id.clone(), async move {
                remote.update_order(&pushed).await
            });
        }
        Ok(updated)
    }

    /// Delete an order and every payment referencing it, then reconcile the
    /// rest. UI-level confirmation happens before this call.
    pub fn delete_order(&self, order_id: &str) -> Result<()> {
        let _guard = self.guards.order()?;
        let mut cols = self.lock_collections()?;

        let before = cols.orders.len();
        cols.orders.retain(|o| o.id != order_id);
        if cols.orders.len() == before {
            return Err(Error::not_found("order", order_id));
        }
        let payments_before = cols.payments.len();
        cols.payments.retain(|p| p.order_id != order_id);
        let cascaded = payments_before - cols.payments.len();

        let Collections {
            orders, payments, ..
        } = &mut *cols;
        crate::reconcile::reconcile(orders, payments);
        self.persist(&cols)?;
        drop(cols);

        info!(order_id, cascaded_payments = cascaded, "order deleted");
        if let Some(remote) = self.remote.clone() {
            let id = order_id.to_string();
            sync::spawn_push("deleteOrder", id.clone(), async move {
                remote.delete_order(&id).await
            });
        }
        Ok(())
    }
}

/// Reject an empty selection; tolerate (but log) a dangling reference.
fn validate_customer_selection(cols: &Collections, customer_id: &str) -> Result<String> {
    let customer_id = customer_id.trim();
    if customer_id.is_empty() {
        return Err(Error::validation("no customer selected"));
    }
    if !cols.customers.iter().any(|c| c.id == customer_id) {
        warn!(customer_id, "order references a customer that does not exist");
    }
    Ok(customer_id.to_string())
}

/// Resolve and snapshot every line against the catalog.
fn snapshot_lines(cols: &Collections, lines: &[OrderLineInput]) -> Result<Vec<OrderLine>> {
    let valid: Vec<&OrderLineInput> = lines
        .iter()
        .filter(|l| !l.item_id.trim().is_empty() && l.quantity > 0)
        .collect();
    if valid.is_empty() {
        return Err(Error::validation("add at least one valid item line"));
    }

    let mut snapshotted = Vec::with_capacity(valid.len());
    for line in valid {
        let item = cols
            .items
            .iter()
            .find(|i| i.id == line.item_id)
            .ok_or_else(|| Error::validation(format!("item not found: {}", line.item_id)))?;
        if !item.cost_to_make.is_finite() || !item.price.is_finite() {
            return Err(Error::validation(format!(
                "item \"{}\" has invalid cost/price data",
                item.name
            )));
        }

        let qty = f64::from(line.quantity);
        let cost = item.cost_to_make * qty;
        let sales = item.price * qty;
        snapshotted.push(OrderLine {
            item_id: item.id.clone(),
            quantity: line.quantity,
            cost,
            sales,
            profit: sales - cost,
        });
    }
    Ok(snapshotted)
}

/// Time-based order id token: millisecond epoch digits, bumped past any
/// existing id minted in the same millisecond.
fn next_order_id(orders: &[Order]) -> String {
    let mut candidate = Utc::now().timestamp_millis().max(0);
    while orders.iter().any(|o| o.id == candidate.to_string()) {
        candidate += 1;
    }
    candidate.to_string()
}
