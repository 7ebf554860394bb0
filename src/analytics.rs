//! Sales analytics over the entity collections.
//!
//! Aggregation only ever filters and sums; it never fails on empty data and
//! every division guards its zero-denominator case. "Completed" is always
//! derived from payment existence, never from the cached order status.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{Customer, Item, Order, Payment};
use crate::reconcile::has_payment;
use crate::store::ReceiptStore;

/// Inclusive calendar-date window; `end` is extended to 23:59:59.999 so the
/// whole last day counts.
#[derive(Debug, Clone, Copy)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// True when the order falls inside the window.
    pub fn contains_order(&self, order: &Order) -> bool {
        let at = order.date_ordered.naive_utc();
        let start = self.start.and_hms_opt(0, 0, 0).unwrap_or_default();
        let end = self
            .end
            .and_hms_milli_opt(23, 59, 59, 999)
            .unwrap_or_default();
        at >= start && at <= end
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Summary {
    pub total_revenue: f64,
    pub total_cost: f64,
    pub total_profit: f64,
    /// Percent; 0 when revenue is 0.
    pub profit_margin: f64,
    pub completed_orders: usize,
    /// Mean sales of completed in-window orders; 0 when there are none.
    pub avg_order_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerTier {
    New,
    Returning,
    Vip,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerStats {
    pub customer_id: String,
    pub name: String,
    /// Orders of any status.
    pub order_count: usize,
    pub completed_order_count: usize,
    /// Sales over completed orders only.
    pub total_spent: f64,
    /// total_spent / completed_order_count; 0 when none completed.
    pub avg_order_value: f64,
    pub is_returning: bool,
    pub tier: CustomerTier,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub revenue: f64,
    pub profit: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ItemSales {
    /// "Name (Size)" label from the catalog.
    pub label: String,
    pub units: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CustomerRevenue {
    pub name: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FrequencyBucket {
    /// Completed orders per customer in this bucket.
    pub order_count: usize,
    /// Number of customers with exactly that many completed orders.
    pub customers: usize,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub summary: Summary,
    /// Sorted by total spent, highest first. Counts cover the full order
    /// list, not just the window.
    pub customer_stats: Vec<CustomerStats>,
    pub total_customers: usize,
    pub returning_customers: usize,
    /// Percent of customers with more than one order; 0 with no customers.
    pub retention_rate: f64,
    /// Revenue/profit per calendar day of completed in-window orders.
    pub daily_series: Vec<DailyPoint>,
    /// Unit sales per catalog item over completed in-window orders.
    pub item_sales: Vec<ItemSales>,
    /// Top five customers by completed in-window revenue.
    pub top_customers: Vec<CustomerRevenue>,
    /// Distribution of customers by completed in-window order count.
    pub order_frequency: Vec<FrequencyBucket>,
}

/// Threshold above which a customer counts as VIP.
const VIP_ORDER_COUNT: usize = 5;

/// Build the full analytics report. `window = None` covers all orders.
pub fn report(
    orders: &[Order],
    payments: &[Payment],
    customers: &[Customer],
    items: &[Item],
    window: Option<DateWindow>,
) -> Report {
    let in_window: Vec<&Order> = orders
        .iter()
        .filter(|o| window.map_or(true, |w| w.contains_order(o)))
        .collect();
    let completed: Vec<&Order> = in_window
        .iter()
        .copied()
        .filter(|o| has_payment(payments, &o.id))
        .collect();

    Report {
        summary: summarize(&completed),
        customer_stats: customer_stats(orders, payments, customers),
        total_customers: customers.len(),
        returning_customers: returning_count(orders, customers),
        retention_rate: retention_rate(orders, customers),
        daily_series: daily_series(&completed),
        item_sales: item_sales(&completed, items),
        top_customers: top_customers(&completed, customers),
        order_frequency: order_frequency(&completed, customers),
    }
}

impl ReceiptStore {
    /// Build the analytics report over the store's current collections.
    pub fn analytics(&self, window: Option<DateWindow>) -> Report {
        report(
            &self.orders(),
            &self.payments(),
            &self.customers(),
            &self.items(),
            window,
        )
    }
}

fn summarize(completed: &[&Order]) -> Summary {
    let total_revenue: f64 = completed.iter().map(|o| o.total_sales()).sum();
    let total_cost: f64 = completed.iter().map(|o| o.total_cost()).sum();
    let total_profit = total_revenue - total_cost;
    let profit_margin = if total_revenue > 0.0 {
        total_profit / total_revenue * 100.0
    } else {
        0.0
    };
    let avg_order_value = if completed.is_empty() {
        0.0
    } else {
        total_revenue / completed.len() as f64
    };

    Summary {
        total_revenue,
        total_cost,
        total_profit,
        profit_margin,
        completed_orders: completed.len(),
        avg_order_value,
    }
}

fn customer_stats(
    orders: &[Order],
    payments: &[Payment],
    customers: &[Customer],
) -> Vec<CustomerStats> {
    let mut stats: Vec<CustomerStats> = customers
        .iter()
        .map(|customer| {
            let their_orders: Vec<&Order> = orders
                .iter()
                .filter(|o| o.customer_id == customer.id)
                .collect();
            let completed: Vec<&&Order> = their_orders
                .iter()
                .filter(|o| has_payment(payments, &o.id))
                .collect();
            let total_spent: f64 = completed.iter().map(|o| o.total_sales()).sum();
            let avg_order_value = if completed.is_empty() {
                0.0
            } else {
                total_spent / completed.len() as f64
            };
            let is_returning = their_orders.len() > 1;
            let tier = if their_orders.len() > VIP_ORDER_COUNT {
                CustomerTier::Vip
            } else if is_returning {
                CustomerTier::Returning
            } else {
                CustomerTier::New
            };

            CustomerStats {
                customer_id: customer.id.clone(),
                name: customer.name.clone(),
                order_count: their_orders.len(),
                completed_order_count: completed.len(),
                total_spent,
                avg_order_value,
                is_returning,
                tier,
            }
        })
        .collect();

    stats.sort_by(|a, b| {
        b.total_spent
            .partial_cmp(&a.total_spent)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    stats
}

fn returning_count(orders: &[Order], customers: &[Customer]) -> usize {
    customers
        .iter()
        .filter(|c| orders.iter().filter(|o| o.customer_id == c.id).count() > 1)
        .count()
}

fn retention_rate(orders: &[Order], customers: &[Customer]) -> f64 {
    if customers.is_empty() {
        return 0.0;
    }
    returning_count(orders, customers) as f64 / customers.len() as f64 * 100.0
}

fn daily_series(completed: &[&Order]) -> Vec<DailyPoint> {
    let mut days: BTreeMap<NaiveDate, (f64, f64)> = BTreeMap::new();
    for order in completed {
        let day = order.date_ordered.date_naive();
        let entry = days.entry(day).or_insert((0.0, 0.0));
        entry.0 += order.total_sales();
        entry.1 += order.total_profit();
    }
    days.into_iter()
        .map(|(date, (revenue, profit))| DailyPoint {
            date,
            revenue,
            profit,
        })
        .collect()
}

fn item_sales(completed: &[&Order], items: &[Item]) -> Vec<ItemSales> {
    let mut units: BTreeMap<String, u64> = BTreeMap::new();
    for order in completed {
        for line in &order.items {
            // Lines whose item no longer exists in the catalog are skipped.
            if let Some(item) = items.iter().find(|i| i.id == line.item_id) {
                let label = format!("{} ({})", item.name, item.size);
                *units.entry(label).or_insert(0) += u64::from(line.quantity);
            }
        }
    }
    let mut sales: Vec<ItemSales> = units
        .into_iter()
        .map(|(label, units)| ItemSales { label, units })
        .collect();
    sales.sort_by(|a, b| b.units.cmp(&a.units).then_with(|| a.label.cmp(&b.label)));
    sales
}

fn top_customers(completed: &[&Order], customers: &[Customer]) -> Vec<CustomerRevenue> {
    let mut revenue: BTreeMap<String, f64> = BTreeMap::new();
    for order in completed {
        if let Some(customer) = customers.iter().find(|c| c.id == order.customer_id) {
            *revenue.entry(customer.name.clone()).or_insert(0.0) += order.total_sales();
        }
    }
    let mut ranked: Vec<CustomerRevenue> = revenue
        .into_iter()
        .map(|(name, revenue)| CustomerRevenue { name, revenue })
        .collect();
    ranked.sort_by(|a, b| {
        b.revenue
            .partial_cmp(&a.revenue)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(5);
    ranked
}

fn order_frequency(completed: &[&Order], customers: &[Customer]) -> Vec<FrequencyBucket> {
    let mut per_customer: BTreeMap<&str, usize> = BTreeMap::new();
    for order in completed {
        if customers.iter().any(|c| c.id == order.customer_id) {
            *per_customer.entry(order.customer_id.as_str()).or_insert(0) += 1;
        }
    }
    let mut buckets: BTreeMap<usize, usize> = BTreeMap::new();
    for count in per_customer.values() {
        *buckets.entry(*count).or_insert(0) += 1;
    }
    buckets
        .into_iter()
        .map(|(order_count, customers)| FrequencyBucket {
            order_count,
            customers,
            label: if order_count == 1 {
                "1 Order".to_string()
            } else {
                format!("{order_count} Orders")
            },
        })
        .collect()
}
