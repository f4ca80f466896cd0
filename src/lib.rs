//! Sari POS — product sales and payment recording core.
//!
//! The crate owns the data and workflow layer behind a point-of-sale sales
//! screen: the product catalog, the sale-record ledger, loyalty customer
//! reference data, the cart/settlement workflow, ledger filtering and
//! aggregates, and the stock adjustment outbox toward the external
//! inventory service. Presentation (tables, dialogs, navigation) is the
//! embedding application's concern.
//!
//! Typical flow:
//!
//! ```no_run
//! use sari_pos::{catalog, db, settlement, stock};
//! use sari_pos::ledger::PaymentMethod;
//! use sari_pos::settlement::{CashierContext, SaleAttempt, SettlementMode};
//!
//! struct NoopAdjuster;
//! impl stock::StockAdjuster for NoopAdjuster {
//!     fn decrement_stock(&self, _: &str, _: i64) -> Result<(), String> {
//!         Ok(())
//!     }
//! }
//!
//! let db = db::init(std::path::Path::new("./data")).unwrap();
//! let products = catalog::list_products(&db).unwrap();
//!
//! let mut attempt = SaleAttempt::new();
//! attempt.cart.add("p1");
//! attempt.typed_customer = "Maria Santos".into();
//!
//! let outcome = settlement::settle(
//!     &db,
//!     &products,
//!     &mut attempt,
//!     SettlementMode::Immediate {
//!         method: PaymentMethod::Cash,
//!         amount_tendered: 200.0,
//!     },
//!     &CashierContext {
//!         id: "cashier-1".into(),
//!         display_name: None,
//!     },
//!     &NoopAdjuster,
//! ).unwrap();
//! println!("settled {} change {:?}", outcome.record_id, outcome.change_given);
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod cart;
pub mod catalog;
pub mod db;
pub mod error;
pub mod ledger;
pub mod loyalty;
pub mod query;
pub mod receipt;
pub mod settlement;
pub mod stock;

pub use cart::{Cart, CartLine};
pub use catalog::Product;
pub use error::SettlementError;
pub use ledger::{LineItem, PaymentMethod, SaleRecord, SettlementState};
pub use loyalty::LoyaltyCustomer;
pub use query::{LedgerStats, RecordFilter, StatusFilter};
pub use settlement::{CashierContext, SaleAttempt, SettlementMode, SettlementOutcome};
pub use stock::StockAdjuster;

/// Initialize console logging for embedders that have not set up their own
/// subscriber. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sari_pos=debug"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
