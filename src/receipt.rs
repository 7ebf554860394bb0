//! Receipt view assembly.
//!
//! A receipt exists only for a paid order: it joins the order, its first
//! payment, the customer, and the store profile into a flat view the caller
//! can render. Store profile fields fall back to built-in defaults when
//! never configured.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::OrderLine;
use crate::reconcile::payment_for;
use crate::store::ReceiptStore;

const DEFAULT_STORE_NAME: &str = "CRE.MNL";
const DEFAULT_STORE_ADDRESS: &str = "Pasig City";
const DEFAULT_STORE_PHONE: &str = "+639277747832";
const RECEIPT_FOOTER: &str = "Thank you for your business!";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReceiptHeader {
    pub store_name: String,
    pub address: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReceiptLine {
    /// "Name (Size)"; a missing size renders as "N/A".
    pub label: String,
    pub quantity: u32,
    pub sales: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub header: ReceiptHeader,
    pub receipt_id: String,
    pub paid_at: DateTime<Utc>,
    pub customer_name: String,
    pub refid: String,
    /// Uppercased payment method label.
    pub method: String,
    pub lines: Vec<ReceiptLine>,
    pub amount_due: f64,
    pub amount_paid: f64,
    pub balance: f64,
    pub footer: &'static str,
}

impl ReceiptStore {
    /// Assemble the receipt for a paid order. Fails with `NotFound` when the
    /// order does not exist or has no payment yet.
    pub fn receipt(&self, order_id: &str) -> Result<Receipt> {
        let cols = self.lock_collections()?;

        let order = cols
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .ok_or_else(|| Error::not_found("order", order_id))?;
        let payment = payment_for(&cols.payments, order_id)
            .ok_or_else(|| Error::not_found("payment", order_id))?;

        let customer_name = cols
            .customers
            .iter()
            .find(|c| c.id == order.customer_id)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        let lines = order
            .items
            .iter()
            .map(|line| receipt_line(line, &cols.items))
            .collect();

        Ok(Receipt {
            header: self.header(),
            receipt_id: payment.receipt_id.clone(),
            paid_at: payment.paid_at,
            customer_name,
            refid: payment.refid.clone(),
            method: payment.method.as_str().to_uppercase(),
            lines,
            amount_due: payment.amount_due,
            amount_paid: payment.amount_paid,
            balance: payment.balance,
            footer: RECEIPT_FOOTER,
        })
    }

    fn header(&self) -> ReceiptHeader {
        ReceiptHeader {
            store_name: self
                .store_setting("name")
                .unwrap_or_else(|| DEFAULT_STORE_NAME.to_string()),
            address: self
                .store_setting("address")
                .unwrap_or_else(|| DEFAULT_STORE_ADDRESS.to_string()),
            phone: self
                .store_setting("phone")
                .unwrap_or_else(|| DEFAULT_STORE_PHONE.to_string()),
        }
    }
}

fn receipt_line(line: &OrderLine, items: &[crate::models::Item]) -> ReceiptLine {
    let label = items
        .iter()
        .find(|i| i.id == line.item_id)
        .map(|item| {
            let size = if item.size.trim().is_empty() {
                "N/A"
            } else {
                item.size.as_str()
            };
            format!("{} ({})", item.name, size)
        })
        .unwrap_or_else(|| "Unknown".to_string());

    ReceiptLine {
        label,
        quantity: line.quantity,
        sales: line.sales,
    }
}
