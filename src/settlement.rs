//! Settlement engine for Sari POS.
//!
//! Drives one sale attempt from a built cart to a persisted ledger record:
//! resolves the customer, freezes line items at the catalog prices in
//! effect at settlement time, validates tender, writes the record and its
//! stock-adjustment outbox entries in one transaction, then drains the
//! outbox against the inventory service.
//!
//! An attempt either starts fresh (new record) or resumes a stored unpaid
//! record, which is then updated in place to paid with its original
//! `created_at` carried forward.

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cart::Cart;
use crate::catalog::{self, Product};
use crate::db::DbState;
use crate::error::SettlementError;
use crate::ledger::{self, LineItem, PaymentMethod, SaleRecord, SettlementState};
use crate::loyalty;
use crate::stock::{self, StockAdjuster};

/// Fixed cash denominations offered as one-tap tender amounts. Convenience
/// only; any amount >= the total settles.
pub const QUICK_AMOUNTS: [f64; 5] = [100.0, 200.0, 300.0, 500.0, 1000.0];

/// The operator performing the settlement. Threaded in explicitly; the
/// engine never reads ambient session state.
#[derive(Debug, Clone)]
pub struct CashierContext {
    pub id: String,
    pub display_name: Option<String>,
}

/// How the operator chose to settle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettlementMode {
    /// Payment collected now: method plus the amount handed over.
    Immediate {
        method: PaymentMethod,
        amount_tendered: f64,
    },
    /// "Pay later": the record persists as unpaid.
    Deferred,
}

/// A record being resumed, with the stored fields settlement must carry
/// forward or fall back to.
#[derive(Debug, Clone)]
struct ResumeTarget {
    record_id: String,
    stored_customer: String,
    stored_items: Vec<LineItem>,
    stored_created_at: DateTime<Utc>,
}

/// One sale attempt: the cart plus the customer inputs around it.
#[derive(Debug, Clone, Default)]
pub struct SaleAttempt {
    pub cart: Cart,
    /// Name of the loyalty customer picked from the autocomplete, if any.
    pub selected_customer: Option<String>,
    /// Free-typed customer name.
    pub typed_customer: String,
    resume: Option<ResumeTarget>,
}

impl SaleAttempt {
    /// A fresh attempt with an empty cart.
    pub fn new() -> Self {
        SaleAttempt::default()
    }

    /// Resume a stored unpaid record: the cart is seeded from its line
    /// items and the customer field pre-filled with its stored name.
    pub fn resume_from(record: &SaleRecord) -> Self {
        SaleAttempt {
            cart: Cart::seed_from_record(record),
            selected_customer: None,
            typed_customer: record.customer_name.clone(),
            resume: Some(ResumeTarget {
                record_id: record.id.clone(),
                stored_customer: record.customer_name.clone(),
                stored_items: record.effective_items(),
                stored_created_at: record.created_at,
            }),
        }
    }

    pub fn is_resume(&self) -> bool {
        self.resume.is_some()
    }

    pub fn resumed_record_id(&self) -> Option<&str> {
        self.resume.as_ref().map(|r| r.record_id.as_str())
    }

    /// Clear the attempt after a successful settlement.
    fn reset(&mut self) {
        self.cart.clear();
        self.selected_customer = None;
        self.typed_customer.clear();
        self.resume = None;
    }
}

/// What a successful settlement produced.
#[derive(Debug, Clone)]
pub struct SettlementOutcome {
    pub record_id: String,
    pub total_price: f64,
    pub change_given: Option<f64>,
    pub state: SettlementState,
    /// True when a new record was created; false when a resumed record was
    /// updated in place.
    pub created: bool,
}

// ---------------------------------------------------------------------------
// Settle
// ---------------------------------------------------------------------------

/// Settle the attempt.
///
/// On success the attempt is reset (cart cleared, customer and resume state
/// dropped). On any error the attempt is left untouched so the operator can
/// correct the input or retry the write.
pub fn settle(
    db: &DbState,
    products: &[Product],
    attempt: &mut SaleAttempt,
    mode: SettlementMode,
    cashier: &CashierContext,
    adjuster: &dyn StockAdjuster,
) -> Result<SettlementOutcome, SettlementError> {
    let items = snapshot_items(attempt, products);
    if items.is_empty() {
        return Err(SettlementError::EmptyCart);
    }

    let total_price: f64 = items.iter().map(LineItem::subtotal).sum();

    let customer_name = loyalty::resolve_customer_name(
        attempt.selected_customer.as_deref(),
        &attempt.typed_customer,
        attempt.resume.as_ref().map(|r| r.stored_customer.as_str()),
    );

    let (payment_method, amount_tendered, change_given, state) = match mode {
        SettlementMode::Immediate {
            method,
            amount_tendered,
        } => {
            if amount_tendered < total_price {
                return Err(SettlementError::InsufficientTender {
                    tendered: amount_tendered,
                    total: total_price,
                });
            }
            (
                Some(method),
                Some(amount_tendered),
                Some(amount_tendered - total_price),
                SettlementState::Paid,
            )
        }
        SettlementMode::Deferred => {
            if attempt.is_resume() {
                return Err(SettlementError::DeferredOnResume);
            }
            (None, None, None, SettlementState::Unpaid)
        }
    };

    let (record_id, created_at, created) = match attempt.resume {
        Some(ref target) => (
            target.record_id.clone(),
            target.stored_created_at,
            false,
        ),
        None => (Uuid::new_v4().to_string(), Utc::now(), true),
    };

    let record = SaleRecord {
        id: record_id.clone(),
        customer_name,
        line_items: items.clone(),
        legacy_service_id: None,
        legacy_service_name: None,
        legacy_quantity: None,
        total_price,
        cashier_id: cashier.id.clone(),
        cashier_name: cashier.display_name.clone(),
        created_at,
        state,
        payment_method,
        amount_tendered,
        change_given,
        void_reason: None,
        voided_by: None,
        voided_at: None,
    };

    persist(db, &record, created, &items)?;

    info!(
        record_id = %record.id,
        total = %total_price,
        state = record.state.as_str(),
        created = created,
        "Sale settled"
    );

    // Drain the outbox now; anything that fails stays queued and is
    // reconciled on the next pass.
    if let Err(e) = stock::apply_pending(db, adjuster) {
        warn!("stock queue drain failed after settlement: {e}");
    }

    attempt.reset();

    Ok(SettlementOutcome {
        record_id,
        total_price,
        change_given,
        state,
        created,
    })
}

/// Freeze cart lines into record line items at live catalog prices.
///
/// A product missing from the catalog snapshot falls back to the resumed
/// record's stored item (old sales must stay settleable after a product is
/// retired); lines with no source at all are dropped with a warning.
fn snapshot_items(attempt: &SaleAttempt, products: &[Product]) -> Vec<LineItem> {
    let stored = attempt
        .resume
        .as_ref()
        .map(|r| r.stored_items.as_slice())
        .unwrap_or(&[]);

    let mut items = Vec::new();
    for line in attempt.cart.lines() {
        if let Some(product) = catalog::find(products, &line.product_id) {
            items.push(LineItem {
                product_id: product.id.clone(),
                product_name: product.name.clone(),
                unit_price: product.price,
                quantity: line.quantity,
            });
        } else if let Some(old) = stored.iter().find(|i| i.product_id == line.product_id) {
            items.push(LineItem {
                quantity: line.quantity,
                ..old.clone()
            });
        } else {
            warn!(product_id = %line.product_id, "dropping cart line with no catalog or record source");
        }
    }
    items
}

/// Write the record and its outbox entries in one transaction.
fn persist(
    db: &DbState,
    record: &SaleRecord,
    created: bool,
    items: &[LineItem],
) -> Result<(), SettlementError> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| SettlementError::Storage(e.to_string()))?;

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| SettlementError::Storage(format!("begin transaction: {e}")))?;

    let result = (|| -> Result<(), SettlementError> {
        if created {
            ledger::insert_record_tx(&conn, record).map_err(SettlementError::Storage)?;
        } else {
            let updated =
                ledger::mark_paid_tx(&conn, record).map_err(SettlementError::Storage)?;
            if !updated {
                return Err(SettlementError::NotResumable(record.id.clone()));
            }
        }

        stock::enqueue_for_record(&conn, &record.id, items).map_err(SettlementError::Storage)?;
        Ok(())
    })();

    match result {
        Ok(()) => conn
            .execute_batch("COMMIT")
            .map_err(|e| SettlementError::Storage(format!("commit: {e}"))),
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
