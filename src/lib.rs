//! CRE.MNL order and receipt manager.
//!
//! Library core for a small retail shop: customers, a size/price catalog,
//! orders with snapshotted line economics, payments with generated receipt
//! ids, and sales analytics. State lives in four entity collections backed
//! by SQLite; an optional spreadsheet backend receives best-effort pushes
//! after every mutation and can be pulled from wholesale.
//!
//! The one structural rule everything else leans on: an order is completed
//! if and only if a payment references it. Cached status fields are repaired
//! by [`reconcile`] on load, after mutations, and after every remote pull.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod db;
mod error;
mod models;
mod orders;
mod payments;
mod receipt;
pub mod reconcile;
mod remote;
mod store;
mod sync;
pub mod analytics;
pub mod views;

pub use error::{Error, Result};
pub use models::{Customer, Item, Order, OrderLine, OrderStatus, Payment, PaymentMethod};
pub use orders::OrderLineInput;
pub use payments::{parse_amount, CASH_REF_ID};
pub use receipt::{Receipt, ReceiptHeader, ReceiptLine};
pub use remote::RemoteClient;
pub use store::ReceiptStore;
pub use sync::SyncReport;

/// Initialize console logging. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cre_receipts=debug"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}
