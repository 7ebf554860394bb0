//! Order status reconciliation.
//!
//! An order is completed if and only if at least one payment references it.
//! The `status`/`date_completed` fields stored on an order are a cache of
//! that fact; this module is the only writer of those fields. Run after
//! every order or payment mutation and after every remote pull.

use tracing::info;

use crate::models::{Order, OrderStatus, Payment};

/// True when some payment references the order.
pub fn has_payment(payments: &[Payment], order_id: &str) -> bool {
    payments.iter().any(|p| p.order_id == order_id)
}

/// The first payment referencing the order, if any.
pub fn payment_for<'a>(payments: &'a [Payment], order_id: &str) -> Option<&'a Payment> {
    payments.iter().find(|p| p.order_id == order_id)
}

/// The status an order should carry, derived purely from the payment list.
pub fn derived_status(payments: &[Payment], order_id: &str) -> OrderStatus {
    if has_payment(payments, order_id) {
        OrderStatus::Completed
    } else {
        OrderStatus::Pending
    }
}

/// Repair every order's cached `status`/`date_completed` from the payment
/// list. Idempotent; touches nothing else. Returns the number of orders
/// that changed.
pub fn reconcile(orders: &mut [Order], payments: &[Payment]) -> usize {
    let mut changed = 0;

    for order in orders.iter_mut() {
        let paid = has_payment(payments, &order.id);

        if paid && order.status != OrderStatus::Completed {
            order.status = OrderStatus::Completed;
            if order.date_completed.is_none() {
                order.date_completed = payment_for(payments, &order.id).map(|p| p.paid_at);
            }
            changed += 1;
        } else if !paid && order.status == OrderStatus::Completed {
            order.status = OrderStatus::Pending;
            order.date_completed = None;
            changed += 1;
        }
    }

    if changed > 0 {
        info!(repaired = changed, "reconciled order statuses from payments");
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderLine, PaymentMethod};
    use chrono::Utc;

    fn order(id: &str, status: OrderStatus) -> Order {
        Order {
            id: id.into(),
            customer_id: "c1".into(),
            status,
            date_ordered: Utc::now(),
            date_completed: None,
            items: vec![OrderLine {
                item_id: "i1".into(),
                quantity: 1,
                cost: 10.0,
                sales: 25.0,
                profit: 15.0,
            }],
        }
    }

    fn payment(order_id: &str) -> Payment {
        Payment {
            id: "p1".into(),
            order_id: order_id.into(),
            receipt_id: "RCP-123456-AB12".into(),
            refid: "cash payment".into(),
            method: PaymentMethod::Cash,
            amount_due: 25.0,
            amount_paid: 25.0,
            balance: 0.0,
            paid_at: Utc::now(),
        }
    }

    #[test]
    fn paid_order_flips_to_completed_with_backfilled_date() {
        let mut orders = vec![order("o1", OrderStatus::Pending)];
        let payments = vec![payment("o1")];

        let changed = reconcile(&mut orders, &payments);
        assert_eq!(changed, 1);
        assert_eq!(orders[0].status, OrderStatus::Completed);
        assert_eq!(orders[0].date_completed, Some(payments[0].paid_at));
    }

    #[test]
    fn unpaid_order_with_stale_completed_cache_resets_to_pending() {
        let mut stale = order("o1", OrderStatus::Completed);
        stale.date_completed = Some(Utc::now());
        let mut orders = vec![stale];

        let changed = reconcile(&mut orders, &[]);
        assert_eq!(changed, 1);
        assert_eq!(orders[0].status, OrderStatus::Pending);
        assert_eq!(orders[0].date_completed, None);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let mut orders = vec![
            order("o1", OrderStatus::Pending),
            order("o2", OrderStatus::Completed),
        ];
        let payments = vec![payment("o1")];

        reconcile(&mut orders, &payments);
        let snapshot = orders.clone();
        let changed = reconcile(&mut orders, &payments);
        assert_eq!(changed, 0);
        assert_eq!(orders, snapshot);
    }

    #[test]
    fn existing_date_completed_is_preserved() {
        let mut o = order("o1", OrderStatus::Pending);
        let earlier = Utc::now() - chrono::Duration::days(2);
        o.date_completed = Some(earlier);
        let mut orders = vec![o];
        let payments = vec![payment("o1")];

        reconcile(&mut orders, &payments);
        assert_eq!(orders[0].date_completed, Some(earlier));
    }
}
