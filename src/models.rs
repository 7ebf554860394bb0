//! Entity types for the receipt system.
//!
//! Field names and JSON shapes match the persisted slot format: snake_case
//! keys, RFC 3339 timestamps, order lines embedded in the order. Line
//! economics are snapshotted from the catalog at order time, so later item
//! price edits never change historical totals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub size: String,
    pub cost_to_make: f64,
    pub price: f64,
    pub created_at: DateTime<Utc>,
}

/// One order line. `cost`, `sales`, and `profit` are snapshots taken when
/// the line was written, not live lookups into the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub item_id: String,
    pub quantity: u32,
    pub cost: f64,
    pub sales: f64,
    pub profit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => f.write_str("pending"),
            OrderStatus::Completed => f.write_str("completed"),
        }
    }
}

/// `status` and `date_completed` are cached projections of "does a payment
/// reference this order"; the reconciler refreshes them after every
/// order/payment mutation and nothing else writes them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub customer_id: String,
    pub status: OrderStatus,
    pub date_ordered: DateTime<Utc>,
    #[serde(default)]
    pub date_completed: Option<DateTime<Utc>>,
    pub items: Vec<OrderLine>,
}

impl Order {
    pub fn total_cost(&self) -> f64 {
        self.items.iter().map(|l| l.cost).sum()
    }

    pub fn total_sales(&self) -> f64 {
        self.items.iter().map(|l| l.sales).sum()
    }

    pub fn total_profit(&self) -> f64 {
        self.items.iter().map(|l| l.profit).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentMethod {
    Cash,
    /// Any external method (gcash, bank transfer, card, ...) carried as the
    /// label the user picked.
    Other(String),
}

impl PaymentMethod {
    pub fn is_cash(&self) -> bool {
        matches!(self, PaymentMethod::Cash)
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for PaymentMethod {
    fn from(s: String) -> Self {
        if s.trim().eq_ignore_ascii_case("cash") {
            PaymentMethod::Cash
        } else {
            PaymentMethod::Other(s)
        }
    }
}

impl From<PaymentMethod> for String {
    fn from(m: PaymentMethod) -> Self {
        m.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub receipt_id: String,
    /// Transaction reference; the literal "cash payment" for cash.
    pub refid: String,
    pub method: PaymentMethod,
    pub amount_due: f64,
    pub amount_paid: f64,
    /// amount_due - amount_paid; negative means overpayment.
    pub balance: f64,
    pub paid_at: DateTime<Utc>,
}
