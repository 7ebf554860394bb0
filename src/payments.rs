//! Payment recording and receipt id generation.
//!
//! A payment completes its order: recording one eagerly flips the cached
//! order status to completed, which is exactly what the reconciler would
//! derive. Amounts arrive as user-entered text and may carry currency
//! symbols and thousands separators.

use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{OrderStatus, Payment, PaymentMethod};
use crate::store::ReceiptStore;
use crate::sync;

/// Ref id recorded for cash payments; the entry field is hidden for cash.
pub const CASH_REF_ID: &str = "cash payment";

const RECEIPT_SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

impl ReceiptStore {
    /// Record a payment against an order.
    ///
    /// For cash, `ref_id` is forced to the literal "cash payment". The
    /// balance is due minus paid and may be negative (overpayment); the
    /// order completes on payment existence alone, regardless of balance.
    pub fn process_payment(
        &self,
        order_id: &str,
        method: &str,
        ref_id: &str,
        amount_paid: &str,
        amount_due: &str,
    ) -> Result<Payment> {
        let _guard = self.guards.payment()?;

        let method = method.trim();
        if method.is_empty() {
            return Err(Error::validation("payment method is required"));
        }
        let method = PaymentMethod::from(method.to_string());
        let refid = if method.is_cash() {
            CASH_REF_ID.to_string()
        } else {
            let trimmed = ref_id.trim();
            if trimmed.is_empty() {
                return Err(Error::validation("reference id is required"));
            }
            trimmed.to_string()
        };

        let amount_paid = parse_amount(amount_paid)
            .ok_or_else(|| Error::validation("amount paid must be a number"))?;
        let amount_due = parse_amount(amount_due)
            .ok_or_else(|| Error::validation("amount due must be a number"))?;

        let mut cols = self.lock_collections()?;
        if !cols.orders.iter().any(|o| o.id == order_id) {
            return Err(Error::not_found("order", order_id));
        }
        if cols.payments.iter().any(|p| p.order_id == order_id) {
            // Not prevented, but almost always an accidental double entry;
            // completion already derives from the first payment.
            warn!(order_id, "order already has a payment, recording another");
        }

        let paid_at = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            receipt_id: generate_receipt_id(),
            refid,
            method,
            amount_due,
            amount_paid,
            balance: amount_due - amount_paid,
            paid_at,
        };

        cols.payments.push(payment.clone());

        // Eager cache refresh; the reconciler would derive the same thing.
        if let Some(order) = cols.orders.iter_mut().find(|o| o.id == order_id) {
            if order.status != OrderStatus::Completed {
                order.status = OrderStatus::Completed;
            }
            if order.date_completed.is_none() {
                order.date_completed = Some(paid_at);
            }
        }
        let order_snapshot = cols.orders.iter().find(|o| o.id == order_id).cloned();

        self.persist(&cols)?;
        drop(cols);

        info!(
            payment_id = %payment.id,
            order_id,
            receipt_id = %payment.receipt_id,
            balance = payment.balance,
            "payment recorded"
        );

        // Two independent best-effort pushes: the payment itself, and the
        // order's status update. Either may fail without affecting the other.
        if let Some(remote) = self.remote.clone() {
            let pushed = payment.clone();
            sync::spawn_push("savePayment", payment.id.clone(), async move {
                remote.save_payment(&pushed).await
            });
        }
        if let (Some(remote), Some(order)) = (self.remote.clone(), order_snapshot) {
            let id = order.id.clone();
            sync::spawn_push("updateOrder", id, async move {
                remote.update_order(&order).await
            });
        }

        Ok(payment)
    }
}

/// Parse a user-entered amount, tolerating currency symbols, commas, and
/// surrounding whitespace. Returns `None` unless the result is finite.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '₱' | '$' | ',') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// `RCP-<6 trailing digits of the ms timestamp>-<4 random A-Z0-9>`.
pub fn generate_receipt_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0).to_string();
    let tail = &millis[millis.len().saturating_sub(6)..];

    let mut rng = rand::rng();
    let suffix: String = (0..4)
        .map(|_| {
            let idx = rng.random_range(0..RECEIPT_SUFFIX_CHARSET.len());
            RECEIPT_SUFFIX_CHARSET[idx] as char
        })
        .collect();

    format!("RCP-{tail:0>6}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::OrderLineInput;

    fn store_with_order() -> (ReceiptStore, String) {
        let store = ReceiptStore::open_test();
        let customer = store.create_customer("Ana Cruz", None, None).unwrap();
        let item_a = store.create_item("Brownie", "box of 4", 10.0, 25.0).unwrap();
        let item_b = store.create_item("Cookie", "single", 5.0, 15.0).unwrap();
        let order = store
            .create_order(
                &customer.id,
                &[
                    OrderLineInput {
                        item_id: item_a.id,
                        quantity: 2,
                    },
                    OrderLineInput {
                        item_id: item_b.id,
                        quantity: 1,
                    },
                ],
            )
            .unwrap();
        (store, order.id)
    }

    #[test]
    fn cash_payment_completes_the_order_with_zero_balance() {
        let (store, order_id) = store_with_order();

        let payment = store
            .process_payment(&order_id, "cash", "cash payment", "65.00", "₱65.00")
            .unwrap();

        assert_eq!(payment.balance, 0.0);
        assert_eq!(payment.refid, CASH_REF_ID);
        assert!(payment.method.is_cash());

        let order = store.orders().remove(0);
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.date_completed.is_some());
    }

    #[test]
    fn underpayment_leaves_positive_balance_but_still_completes() {
        let (store, order_id) = store_with_order();

        let payment = store
            .process_payment(&order_id, "gcash", "GC-2024-881", "50.00", "65.00")
            .unwrap();

        assert_eq!(payment.balance, 15.0);
        assert_eq!(store.orders()[0].status, OrderStatus::Completed);
    }

    #[test]
    fn overpayment_yields_negative_balance() {
        let (store, order_id) = store_with_order();
        let payment = store
            .process_payment(&order_id, "cash", "", "100.00", "65.00")
            .unwrap();
        assert_eq!(payment.balance, -35.0);
    }

    #[test]
    fn cash_forces_the_ref_id_even_when_blank() {
        let (store, order_id) = store_with_order();
        let payment = store
            .process_payment(&order_id, "cash", "", "65", "65")
            .unwrap();
        assert_eq!(payment.refid, CASH_REF_ID);
    }

    #[test]
    fn non_cash_without_ref_id_is_rejected() {
        let (store, order_id) = store_with_order();
        let err = store
            .process_payment(&order_id, "bank transfer", "  ", "65", "65")
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(store.payments().is_empty());
    }

    #[test]
    fn non_numeric_amounts_are_rejected() {
        let (store, order_id) = store_with_order();
        let err = store
            .process_payment(&order_id, "cash", "", "sixty five", "65.00")
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.orders()[0].status, OrderStatus::Pending);
    }

    #[test]
    fn payment_against_missing_order_is_not_found() {
        let store = ReceiptStore::open_test();
        let err = store
            .process_payment("ghost", "cash", "", "10", "10")
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "order", .. }));
    }

    #[test]
    fn receipt_id_matches_the_documented_pattern() {
        for _ in 0..25 {
            let id = generate_receipt_id();
            let parts: Vec<&str> = id.split('-').collect();
            assert_eq!(parts.len(), 3, "unexpected shape: {id}");
            assert_eq!(parts[0], "RCP");
            assert_eq!(parts[1].len(), 6);
            assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
            assert_eq!(parts[2].len(), 4);
            assert!(parts[2]
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn amount_parsing_strips_currency_noise() {
        assert_eq!(parse_amount("₱1,234.50"), Some(1234.5));
        assert_eq!(parse_amount(" $65.00 "), Some(65.0));
        assert_eq!(parse_amount("65"), Some(65.0));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("₱"), None);
        assert_eq!(parse_amount("NaN"), None);
        assert_eq!(parse_amount("inf"), None);
    }

    #[test]
    fn second_payment_is_recorded_not_rejected() {
        let (store, order_id) = store_with_order();
        store
            .process_payment(&order_id, "cash", "", "30", "65")
            .unwrap();
        store
            .process_payment(&order_id, "cash", "", "35", "65")
            .unwrap();
        assert_eq!(store.payments().len(), 2);
        assert_eq!(store.orders()[0].status, OrderStatus::Completed);
    }
}
