//! Order listing: filters and display projections.
//!
//! Views are read-only joins over the collections. The status shown is
//! always derived from payment existence, and references that no longer
//! resolve (deleted customer, deleted item) render as "Unknown" instead of
//! failing.

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::Serialize;

use crate::analytics::DateWindow;
use crate::models::{Customer, Item, Order, OrderLine, OrderStatus, Payment};
use crate::reconcile::{derived_status, payment_for};
use crate::store::ReceiptStore;

/// Named calendar ranges relative to "now". Weeks start on Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBucket {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisYear,
}

#[derive(Debug, Clone, Copy)]
pub enum DateFilter {
    Bucket(DateBucket),
    Range { start: NaiveDate, end: NaiveDate },
}

/// All criteria are optional and combine with AND.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub date: Option<DateFilter>,
    pub customer_id: Option<String>,
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderLineView {
    /// "Name (Size)", or "Unknown" when the item is gone from the catalog.
    pub label: String,
    pub quantity: u32,
    pub sales: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub id: String,
    pub customer_name: String,
    pub status: OrderStatus,
    pub date_ordered: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub total_cost: f64,
    pub total_sales: f64,
    pub total_profit: f64,
    pub lines: Vec<OrderLineView>,
}

/// Project the filtered orders for display, newest first. `now` anchors the
/// relative date buckets.
pub fn order_views(
    orders: &[Order],
    payments: &[Payment],
    customers: &[Customer],
    items: &[Item],
    filter: &OrderFilter,
    now: DateTime<Utc>,
) -> Vec<OrderView> {
    let window = filter.date.map(|d| resolve_filter(d, now.date_naive()));

    let mut views: Vec<OrderView> = orders
        .iter()
        .filter(|o| matches(o, payments, filter, window))
        .map(|o| project(o, payments, customers, items))
        .collect();
    views.sort_by(|a, b| b.date_ordered.cmp(&a.date_ordered));
    views
}

impl ReceiptStore {
    /// List the store's orders through a filter, anchored at the current
    /// time.
    pub fn list_orders(&self, filter: &OrderFilter) -> Vec<OrderView> {
        order_views(
            &self.orders(),
            &self.payments(),
            &self.customers(),
            &self.items(),
            filter,
            Utc::now(),
        )
    }
}

fn matches(
    order: &Order,
    payments: &[Payment],
    filter: &OrderFilter,
    window: Option<DateWindow>,
) -> bool {
    if let Some(status) = filter.status {
        if derived_status(payments, &order.id) != status {
            return false;
        }
    }
    if let Some(window) = window {
        if !window.contains_order(order) {
            return false;
        }
    }
    if let Some(customer_id) = &filter.customer_id {
        if &order.customer_id != customer_id {
            return false;
        }
    }
    if let Some(item_id) = &filter.item_id {
        if !order.items.iter().any(|l| &l.item_id == item_id) {
            return false;
        }
    }
    true
}

fn project(
    order: &Order,
    payments: &[Payment],
    customers: &[Customer],
    items: &[Item],
) -> OrderView {
    let customer_name = customers
        .iter()
        .find(|c| c.id == order.customer_id)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "Unknown".to_string());

    OrderView {
        id: order.id.clone(),
        customer_name,
        status: derived_status(payments, &order.id),
        date_ordered: order.date_ordered,
        paid_at: payment_for(payments, &order.id).map(|p| p.paid_at),
        total_cost: order.total_cost(),
        total_sales: order.total_sales(),
        total_profit: order.total_profit(),
        lines: order
            .items
            .iter()
            .map(|l| line_view(l, items))
            .collect(),
    }
}

fn line_view(line: &OrderLine, items: &[Item]) -> OrderLineView {
    let label = items
        .iter()
        .find(|i| i.id == line.item_id)
        .map(|i| format!("{} ({})", i.name, i.size))
        .unwrap_or_else(|| "Unknown".to_string());
    OrderLineView {
        label,
        quantity: line.quantity,
        sales: line.sales,
    }
}

fn resolve_filter(filter: DateFilter, today: NaiveDate) -> DateWindow {
    match filter {
        DateFilter::Bucket(bucket) => bucket_window(bucket, today),
        DateFilter::Range { start, end } => DateWindow { start, end },
    }
}

/// Resolve a named bucket to an inclusive date window, anchored at `today`.
pub fn bucket_window(bucket: DateBucket, today: NaiveDate) -> DateWindow {
    let day = Days::new(1);
    let week_start = today - Days::new(u64::from(today.weekday().num_days_from_sunday()));
    let month_start = today.with_day(1).unwrap_or(today);

    let (start, end) = match bucket {
        DateBucket::Today => (today, today),
        DateBucket::Yesterday => (today - day, today - day),
        DateBucket::ThisWeek => (week_start, week_start + Days::new(6)),
        DateBucket::LastWeek => (week_start - Days::new(7), week_start - day),
        DateBucket::ThisMonth => (month_start, end_of_month(month_start)),
        DateBucket::LastMonth => {
            let start = (month_start - day).with_day(1).unwrap_or(month_start);
            (start, month_start - day)
        }
        DateBucket::ThisYear => (
            today.with_month(1).and_then(|d| d.with_day(1)).unwrap_or(today),
            today.with_month(12).and_then(|d| d.with_day(31)).unwrap_or(today),
        ),
    };
    DateWindow { start, end }
}

fn end_of_month(month_start: NaiveDate) -> NaiveDate {
    month_start
        .checked_add_months(chrono::Months::new(1))
        .map(|next| next - Days::new(1))
        .unwrap_or(month_start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentMethod;
    use chrono::{TimeZone, Utc};

    fn order_at(id: &str, customer_id: &str, at: DateTime<Utc>, lines: Vec<OrderLine>) -> Order {
        Order {
            id: id.into(),
            customer_id: customer_id.into(),
            status: OrderStatus::Pending,
            date_ordered: at,
            date_completed: None,
            items: lines,
        }
    }

    fn line(item_id: &str) -> OrderLine {
        OrderLine {
            item_id: item_id.into(),
            quantity: 1,
            cost: 10.0,
            sales: 25.0,
            profit: 15.0,
        }
    }

    fn payment(order_id: &str) -> Payment {
        Payment {
            id: format!("p-{order_id}"),
            order_id: order_id.into(),
            receipt_id: "RCP-000001-TEST".into(),
            refid: "cash payment".into(),
            method: PaymentMethod::Cash,
            amount_due: 25.0,
            amount_paid: 25.0,
            balance: 0.0,
            paid_at: Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap(),
        }
    }

    fn customer(id: &str, name: &str) -> Customer {
        Customer {
            id: id.into(),
            name: name.into(),
            email: None,
            phone: None,
            created_at: Utc::now(),
        }
    }

    fn item(id: &str, name: &str, size: &str) -> Item {
        Item {
            id: id.into(),
            name: name.into(),
            size: size.into(),
            cost_to_make: 10.0,
            price: 25.0,
            created_at: Utc::now(),
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn status_filter_uses_derived_status_not_the_cached_field() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        // Cached as pending, but a payment exists.
        let orders = vec![order_at("o1", "c1", now, vec![line("i1")])];
        let payments = vec![payment("o1")];

        let completed = order_views(
            &orders,
            &payments,
            &[],
            &[],
            &OrderFilter {
                status: Some(OrderStatus::Completed),
                ..Default::default()
            },
            now,
        );
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status, OrderStatus::Completed);
        assert_eq!(completed[0].paid_at, Some(payments[0].paid_at));

        let pending = order_views(
            &orders,
            &payments,
            &[],
            &[],
            &OrderFilter {
                status: Some(OrderStatus::Pending),
                ..Default::default()
            },
            now,
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn missing_customer_and_item_render_unknown() {
        let now = Utc::now();
        let orders = vec![order_at("o1", "ghost", now, vec![line("gone")])];

        let views = order_views(&orders, &[], &[], &[], &OrderFilter::default(), now);
        assert_eq!(views[0].customer_name, "Unknown");
        assert_eq!(views[0].lines[0].label, "Unknown");
    }

    #[test]
    fn line_labels_join_name_and_size() {
        let now = Utc::now();
        let orders = vec![order_at("o1", "c1", now, vec![line("i1")])];
        let customers = vec![customer("c1", "Ana")];
        let items = vec![item("i1", "Brownie", "box of 4")];

        let views = order_views(&orders, &[], &customers, &items, &OrderFilter::default(), now);
        assert_eq!(views[0].customer_name, "Ana");
        assert_eq!(views[0].lines[0].label, "Brownie (box of 4)");
    }

    #[test]
    fn views_sort_newest_first() {
        let older = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        let orders = vec![
            order_at("old", "c1", older, vec![line("i1")]),
            order_at("new", "c1", newer, vec![line("i1")]),
        ];

        let views = order_views(&orders, &[], &[], &[], &OrderFilter::default(), newer);
        assert_eq!(views[0].id, "new");
        assert_eq!(views[1].id, "old");
    }

    #[test]
    fn customer_and_item_filters_combine() {
        let now = Utc::now();
        let orders = vec![
            order_at("o1", "c1", now, vec![line("i1")]),
            order_at("o2", "c1", now, vec![line("i2")]),
            order_at("o3", "c2", now, vec![line("i1")]),
        ];

        let views = order_views(
            &orders,
            &[],
            &[],
            &[],
            &OrderFilter {
                customer_id: Some("c1".into()),
                item_id: Some("i1".into()),
                ..Default::default()
            },
            now,
        );
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].id, "o1");
    }

    #[test]
    fn buckets_resolve_against_a_fixed_anchor() {
        // 2024-03-06 is a Wednesday; that week runs Sun 03-03 .. Sat 03-09.
        let today = date("2024-03-06");

        let w = bucket_window(DateBucket::Today, today);
        assert_eq!((w.start, w.end), (today, today));

        let w = bucket_window(DateBucket::Yesterday, today);
        assert_eq!((w.start, w.end), (date("2024-03-05"), date("2024-03-05")));

        let w = bucket_window(DateBucket::ThisWeek, today);
        assert_eq!((w.start, w.end), (date("2024-03-03"), date("2024-03-09")));

        let w = bucket_window(DateBucket::LastWeek, today);
        assert_eq!((w.start, w.end), (date("2024-02-25"), date("2024-03-02")));

        let w = bucket_window(DateBucket::ThisMonth, today);
        assert_eq!((w.start, w.end), (date("2024-03-01"), date("2024-03-31")));

        let w = bucket_window(DateBucket::LastMonth, today);
        assert_eq!((w.start, w.end), (date("2024-02-01"), date("2024-02-29")));

        let w = bucket_window(DateBucket::ThisYear, today);
        assert_eq!((w.start, w.end), (date("2024-01-01"), date("2024-12-31")));
    }

    #[test]
    fn bucket_filter_keeps_only_orders_in_range() {
        let now = Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap();
        let orders = vec![
            order_at(
                "today",
                "c1",
                Utc.with_ymd_and_hms(2024, 3, 6, 23, 30, 0).unwrap(),
                vec![line("i1")],
            ),
            order_at(
                "last_week",
                "c1",
                Utc.with_ymd_and_hms(2024, 2, 27, 10, 0, 0).unwrap(),
                vec![line("i1")],
            ),
        ];

        let views = order_views(
            &orders,
            &[],
            &[],
            &[],
            &OrderFilter {
                date: Some(DateFilter::Bucket(DateBucket::Today)),
                ..Default::default()
            },
            now,
        );
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].id, "today");

        let views = order_views(
            &orders,
            &[],
            &[],
            &[],
            &OrderFilter {
                date: Some(DateFilter::Bucket(DateBucket::LastWeek)),
                ..Default::default()
            },
            now,
        );
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].id, "last_week");
    }

    #[test]
    fn explicit_range_is_inclusive_of_its_end_day() {
        let now = Utc::now();
        let orders = vec![order_at(
            "o1",
            "c1",
            Utc.with_ymd_and_hms(2024, 3, 10, 23, 59, 0).unwrap(),
            vec![line("i1")],
        )];

        let views = order_views(
            &orders,
            &[],
            &[],
            &[],
            &OrderFilter {
                date: Some(DateFilter::Range {
                    start: date("2024-03-01"),
                    end: date("2024-03-10"),
                }),
                ..Default::default()
            },
            now,
        );
        assert_eq!(views.len(), 1);
    }
}
