//! Error taxonomy for the settlement workflow.
//!
//! Validation failures block the attempt before anything is written and
//! map to a disabled confirm action in the UI. Storage failures surface to
//! the operator; the attempt's local state is left intact so the same
//! settlement can be retried.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettlementError {
    /// Settlement of an empty cart is rejected.
    #[error("cart is empty — select at least one product")]
    EmptyCart,

    /// Immediate settlement requires tendered >= total.
    #[error("amount tendered {tendered:.2} is less than the total {total:.2}")]
    InsufficientTender { tendered: f64, total: f64 },

    /// Only records still awaiting payment can be resumed.
    #[error("record {0} is not awaiting payment")]
    NotResumable(String),

    /// A resumed sale is settled immediately; it cannot go back to unpaid.
    #[error("a resumed sale cannot be recorded as unpaid again")]
    DeferredOnResume,

    /// The ledger write failed. The cart and attempt are left untouched.
    #[error("storage error: {0}")]
    Storage(String),
}

impl SettlementError {
    /// True for local validation failures (nothing was persisted and
    /// retrying with the same input would fail again).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SettlementError::EmptyCart
                | SettlementError::InsufficientTender { .. }
                | SettlementError::DeferredOnResume
        )
    }
}
