//! Spreadsheet backend client.
//!
//! The remote is a web-app endpoint in front of a spreadsheet: writes are
//! POSTed as `{action, data}`, reads are GETs with `action=getData` and a
//! `type` query parameter, and every response is a `{success, message?,
//! data?}` envelope. Pulled rows are keyed by the sheet's column headers,
//! so this module owns the translation between rows and entities.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{Customer, Item, Order, OrderLine, OrderStatus, Payment, PaymentMethod};

/// Default timeout for push and pull requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout used specifically for the lightweight connection test.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Normalise the endpoint URL: ensure a scheme is present (https, or http
/// for localhost) and strip trailing slashes.
pub fn normalize_endpoint_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }
    while url.ends_with('/') {
        url.pop();
    }
    url
}

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach spreadsheet backend at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid spreadsheet backend URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Customers,
    Items,
    Orders,
    Payments,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Customers => "customers",
            EntityKind::Items => "items",
            EntityKind::Orders => "orders",
            EntityKind::Payments => "payments",
        }
    }
}

/// Every backend response, success or failure, arrives in this shape.
#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

pub struct RemoteClient {
    endpoint: String,
    http: Client,
}

impl RemoteClient {
    pub fn new(url: &str) -> Result<Self> {
        let endpoint = normalize_endpoint_url(url);
        if endpoint == "https:" || endpoint == "http:" || endpoint.is_empty() {
            return Err(Error::RemoteSync("endpoint URL is empty".to_string()));
        }
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Error::RemoteSync(format!("Failed to create HTTP client: {e}")))?;
        Ok(RemoteClient { endpoint, http })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST an `{action, data}` payload and unwrap the envelope.
    async fn send_action(&self, action: &str, data: Value) -> Result<Value> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "action": action, "data": data }))
            .send()
            .await
            .map_err(|e| Error::RemoteSync(friendly_error(&self.endpoint, &e)))?;

        self.unwrap_envelope(resp).await
    }

    /// GET one entity kind's rows from the sheet.
    pub async fn get_data(&self, kind: EntityKind) -> Result<Value> {
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[("action", "getData"), ("type", kind.as_str())])
            .send()
            .await
            .map_err(|e| Error::RemoteSync(friendly_error(&self.endpoint, &e)))?;

        self.unwrap_envelope(resp).await
    }

    async fn unwrap_envelope(&self, resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::RemoteSync(format!(
                "Spreadsheet backend returned HTTP {}",
                status.as_u16()
            )));
        }
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| Error::RemoteSync(format!("Invalid JSON from backend: {e}")))?;
        if !envelope.success {
            return Err(Error::RemoteSync(
                envelope
                    .message
                    .unwrap_or_else(|| "backend rejected the request".to_string()),
            ));
        }
        Ok(envelope.data.unwrap_or(Value::Null))
    }

    /// Probe the endpoint with a cheap read, using a shorter timeout.
    pub async fn test_connection(&self) -> Result<()> {
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[("action", "getData"), ("type", EntityKind::Customers.as_str())])
            .timeout(CONNECTIVITY_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::RemoteSync(friendly_error(&self.endpoint, &e)))?;
        self.unwrap_envelope(resp).await.map(|_| ())
    }

    // -- pushes --------------------------------------------------------------

    pub async fn save_customer(&self, c: &Customer) -> Result<Value> {
        self.send_action("saveCustomer", wire_customer(c)).await
    }

    pub async fn update_customer(&self, c: &Customer) -> Result<Value> {
        self.send_action("updateCustomer", wire_customer(c)).await
    }

    pub async fn delete_customer(&self, id: &str) -> Result<Value> {
        self.send_action("deleteCustomer", json!({ "id": id })).await
    }

    pub async fn save_item(&self, i: &Item) -> Result<Value> {
        self.send_action("saveItem", wire_item(i)).await
    }

    pub async fn update_item(&self, i: &Item) -> Result<Value> {
        self.send_action("updateItem", wire_item(i)).await
    }

    pub async fn delete_item(&self, id: &str) -> Result<Value> {
        self.send_action("deleteItem", json!({ "id": id })).await
    }

    pub async fn save_order(&self, o: &Order) -> Result<Value> {
        self.send_action("saveOrder", wire_order(o)).await
    }

    pub async fn update_order(&self, o: &Order) -> Result<Value> {
        self.send_action("updateOrder", wire_order(o)).await
    }

    pub async fn delete_order(&self, id: &str) -> Result<Value> {
        self.send_action("deleteOrder", json!({ "id": id })).await
    }

    pub async fn save_payment(&self, p: &Payment) -> Result<Value> {
        self.send_action("savePayment", wire_payment(p)).await
    }
}

// ---------------------------------------------------------------------------
// Wire format (push)
// ---------------------------------------------------------------------------

fn wire_customer(c: &Customer) -> Value {
    json!({
        "id": c.id,
        "name": c.name,
        "email": c.email.clone().unwrap_or_default(),
        "phone": c.phone.clone().unwrap_or_default(),
        "createdAt": c.created_at.to_rfc3339(),
    })
}

fn wire_item(i: &Item) -> Value {
    json!({
        "id": i.id,
        "name": i.name,
        "size": i.size,
        "costToMake": i.cost_to_make,
        "price": i.price,
        "createdAt": i.created_at.to_rfc3339(),
    })
}

fn wire_order(o: &Order) -> Value {
    let items: Vec<Value> = o
        .items
        .iter()
        .map(|l| {
            json!({
                "itemId": l.item_id,
                "quantity": l.quantity,
                "cost": l.cost,
                "sales": l.sales,
                "profit": l.profit,
            })
        })
        .collect();
    json!({
        "id": o.id,
        "customerId": o.customer_id,
        "status": o.status.to_string(),
        "dateOrdered": o.date_ordered.to_rfc3339(),
        "dateCompleted": o.date_completed.map(|d| d.to_rfc3339()),
        "items": items,
    })
}

fn wire_payment(p: &Payment) -> Value {
    json!({
        "id": p.id,
        "orderId": p.order_id,
        "receiptId": p.receipt_id,
        "refid": p.refid,
        "method": p.method.as_str(),
        "amountDue": p.amount_due,
        "amountPaid": p.amount_paid,
        "balance": p.balance,
        "paidAt": p.paid_at.to_rfc3339(),
    })
}

// ---------------------------------------------------------------------------
// Row parsing (pull)
// ---------------------------------------------------------------------------

/// Parse a pulled `customers` payload. Rows without an ID are skipped.
pub fn parse_customers(data: &Value) -> Vec<Customer> {
    rows(data)
        .filter_map(|row| {
            let id = req_str(row, "ID")?;
            Some(Customer {
                id,
                name: str_field(row, "Name"),
                email: opt_str(row, "Email"),
                phone: opt_str(row, "Phone"),
                created_at: time_field(row, "Created At"),
            })
        })
        .collect()
}

pub fn parse_items(data: &Value) -> Vec<Item> {
    rows(data)
        .filter_map(|row| {
            let id = req_str(row, "ID")?;
            Some(Item {
                id,
                name: str_field(row, "Name"),
                size: str_field(row, "Size"),
                cost_to_make: num_field(row, "Cost to Make"),
                price: num_field(row, "Price"),
                created_at: time_field(row, "Created At"),
            })
        })
        .collect()
}

pub fn parse_orders(data: &Value) -> Vec<Order> {
    rows(data)
        .filter_map(|row| {
            let id = req_str(row, "ID")?;
            let status = if str_field(row, "Status").eq_ignore_ascii_case("completed") {
                OrderStatus::Completed
            } else {
                OrderStatus::Pending
            };
            Some(Order {
                items: order_lines(row, &id),
                id,
                customer_id: str_field(row, "Customer ID"),
                status,
                date_ordered: time_field(row, "Date Ordered"),
                date_completed: opt_str(row, "Date Completed").map(|raw| parse_timestamp(&raw)),
            })
        })
        .collect()
}

pub fn parse_payments(data: &Value) -> Vec<Payment> {
    rows(data)
        .filter_map(|row| {
            let id = req_str(row, "ID")?;
            Some(Payment {
                id,
                order_id: str_field(row, "Order ID"),
                receipt_id: str_field(row, "Receipt ID"),
                refid: str_field(row, "Ref ID"),
                method: PaymentMethod::from(str_field(row, "Method")),
                amount_due: num_field(row, "Amount Due"),
                amount_paid: num_field(row, "Amount Paid"),
                balance: num_field(row, "Balance"),
                paid_at: time_field(row, "Paid At"),
            })
        })
        .collect()
}

fn rows(data: &Value) -> impl Iterator<Item = &Value> {
    data.as_array().map(|a| a.iter()).into_iter().flatten()
}

/// A row's ID, or `None` (with a warning) for blank filler rows.
fn req_str(row: &Value, key: &str) -> Option<String> {
    let id = str_field(row, key);
    if id.is_empty() {
        warn!(row = %row, "skipping sheet row without an ID");
        return None;
    }
    Some(id)
}

/// Cell as text; numeric ids come back from sheets as numbers.
fn str_field(row: &Value, key: &str) -> String {
    match row.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn opt_str(row: &Value, key: &str) -> Option<String> {
    Some(str_field(row, key)).filter(|s| !s.is_empty())
}

/// Cell as a number, tolerating numeric strings with currency noise.
fn num_field(row: &Value, key: &str) -> f64 {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => crate::payments::parse_amount(s).unwrap_or(0.0),
        _ => 0.0,
    }
}

fn time_field(row: &Value, key: &str) -> DateTime<Utc> {
    parse_timestamp(&str_field(row, key))
}

/// Sheets hand back RFC 3339, "YYYY-MM-DD HH:MM:SS", or a bare date
/// depending on cell formatting. An unparseable cell falls back to the
/// epoch so bad rows sort first instead of masquerading as recent.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Utc.from_utc_datetime(&naive);
    }
    if let Ok(date) = raw.parse::<NaiveDate>() {
        return Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default());
    }
    warn!(raw, "unparseable sheet timestamp, using epoch");
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

/// Lines arrive as a JSON array serialized into the "Items JSON" cell.
fn order_lines(row: &Value, order_id: &str) -> Vec<OrderLine> {
    let raw = str_field(row, "Items JSON");
    if raw.is_empty() {
        return Vec::new();
    }
    let parsed: Vec<Value> = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(order_id, error = %e, "order row has unparseable Items JSON");
            return Vec::new();
        }
    };
    parsed
        .iter()
        .map(|l| OrderLine {
            item_id: str_field(l, "itemId"),
            quantity: l
                .get("quantity")
                .and_then(Value::as_u64)
                .and_then(|q| u32::try_from(q).ok())
                .unwrap_or(0),
            cost: num_field(l, "cost"),
            sales: num_field(l, "sales"),
            profit: num_field(l, "profit"),
        })
        .collect()
}
