//! Stock adjustment outbox.
//!
//! Settled sales owe the external inventory service one stock decrement per
//! distinct product line. The ledger write and the decrement cannot share a
//! transaction across systems, so the decrements are persisted as outbox
//! entries in the same SQLite transaction as the record, then drained
//! against the adjuster afterwards and on every reload.
//!
//! **Rules:**
//! - One entry per (record, product); the idempotency key dedupes re-enqueues
//!   (a deferred sale settled later does not decrement twice)
//! - Adjuster failures mark the entry `failed` and retryable; they never
//!   roll back the ledger write

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::DbState;
use crate::ledger::LineItem;

/// External collaborator that decrements available stock for a product.
pub trait StockAdjuster {
    fn decrement_stock(&self, product_id: &str, quantity: i64) -> Result<(), String>;
}

/// A pending or settled outbox entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAdjustment {
    pub id: i64,
    pub record_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub status: String,
    pub attempts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Result of one `apply_pending` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub applied: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

/// Enqueue one decrement per distinct product line with quantity > 0, in the
/// caller's transaction. Returns the number of entries actually inserted;
/// entries already present for this record are left untouched.
pub(crate) fn enqueue_for_record(
    conn: &Connection,
    record_id: &str,
    items: &[LineItem],
) -> Result<usize, String> {
    let mut inserted = 0;
    for item in items {
        if item.product_id.is_empty() || item.quantity <= 0 {
            continue;
        }
        let idempotency_key = format!("stock:{record_id}:{}", item.product_id);
        inserted += conn
            .execute(
                "INSERT OR IGNORE INTO stock_queue (record_id, product_id, quantity, idempotency_key)
                 VALUES (?1, ?2, ?3, ?4)",
                params![record_id, item.product_id, item.quantity, idempotency_key],
            )
            .map_err(|e| format!("enqueue stock adjustment: {e}"))?;
    }
    Ok(inserted)
}

// ---------------------------------------------------------------------------
// Drain
// ---------------------------------------------------------------------------

/// Apply all pending and previously failed entries against the adjuster.
///
/// The connection lock is released while the adjuster runs; each entry is
/// marked `applied` or `failed` individually so a partial pass never blocks
/// the rest of the queue.
pub fn apply_pending(db: &DbState, adjuster: &dyn StockAdjuster) -> Result<ApplySummary, String> {
    let entries = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        let mut stmt = conn
            .prepare(
                "SELECT id, record_id, product_id, quantity, status, attempts, last_error
                 FROM stock_queue
                 WHERE status IN ('pending', 'failed')
                 ORDER BY id",
            )
            .map_err(|e| e.to_string())?;

        let rows = stmt
            .query_map([], |row| {
                Ok(StockAdjustment {
                    id: row.get(0)?,
                    record_id: row.get(1)?,
                    product_id: row.get(2)?,
                    quantity: row.get(3)?,
                    status: row.get(4)?,
                    attempts: row.get(5)?,
                    last_error: row.get(6)?,
                })
            })
            .map_err(|e| e.to_string())?;

        let mut entries = Vec::new();
        for row in rows {
            match row {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("skipping malformed stock queue row: {e}"),
            }
        }
        entries
    };

    let mut summary = ApplySummary::default();
    for entry in entries {
        match adjuster.decrement_stock(&entry.product_id, entry.quantity) {
            Ok(()) => {
                let conn = db.conn.lock().map_err(|e| e.to_string())?;
                conn.execute(
                    "UPDATE stock_queue SET
                        status = 'applied', attempts = attempts + 1,
                        last_error = NULL, applied_at = datetime('now')
                     WHERE id = ?1",
                    params![entry.id],
                )
                .map_err(|e| format!("mark adjustment applied: {e}"))?;
                summary.applied += 1;
            }
            Err(err) => {
                warn!(
                    record_id = %entry.record_id,
                    product_id = %entry.product_id,
                    "stock decrement failed: {err}"
                );
                let conn = db.conn.lock().map_err(|e| e.to_string())?;
                conn.execute(
                    "UPDATE stock_queue SET
                        status = 'failed', attempts = attempts + 1, last_error = ?1
                     WHERE id = ?2",
                    params![err, entry.id],
                )
                .map_err(|e| format!("mark adjustment failed: {e}"))?;
                summary.failed += 1;
            }
        }
    }

    if summary.applied > 0 || summary.failed > 0 {
        info!(
            applied = summary.applied,
            failed = summary.failed,
            "Stock queue drained"
        );
    }

    Ok(summary)
}

/// Number of entries still awaiting a successful decrement.
pub fn pending_count(db: &DbState) -> Result<i64, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.query_row(
        "SELECT COUNT(*) FROM stock_queue WHERE status IN ('pending', 'failed')",
        [],
        |row| row.get(0),
    )
    .map_err(|e| e.to_string())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;
    use std::cell::RefCell;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    fn item(product_id: &str, quantity: i64) -> LineItem {
        LineItem {
            product_id: product_id.to_string(),
            product_name: format!("Product {product_id}"),
            unit_price: 10.0,
            quantity,
        }
    }

    /// Records every call; optionally fails for a given product.
    struct RecordingAdjuster {
        calls: RefCell<Vec<(String, i64)>>,
        fail_product: Option<String>,
    }

    impl RecordingAdjuster {
        fn new() -> Self {
            RecordingAdjuster {
                calls: RefCell::new(Vec::new()),
                fail_product: None,
            }
        }

        fn failing_on(product_id: &str) -> Self {
            RecordingAdjuster {
                calls: RefCell::new(Vec::new()),
                fail_product: Some(product_id.to_string()),
            }
        }
    }

    impl StockAdjuster for RecordingAdjuster {
        fn decrement_stock(&self, product_id: &str, quantity: i64) -> Result<(), String> {
            self.calls
                .borrow_mut()
                .push((product_id.to_string(), quantity));
            if self.fail_product.as_deref() == Some(product_id) {
                return Err("inventory service unavailable".into());
            }
            Ok(())
        }
    }

    #[test]
    fn test_enqueue_skips_zero_quantity_and_blank_ids() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();

        let items = vec![item("p1", 2), item("p2", 0), item("", 3)];
        let inserted = enqueue_for_record(&conn, "rec-1", &items).unwrap();
        assert_eq!(inserted, 1);
    }

    #[test]
    fn test_enqueue_is_idempotent_per_record_and_product() {
        let db = test_db();
        let conn = db.conn.lock().unwrap();

        let items = vec![item("p1", 2), item("p2", 1)];
        assert_eq!(enqueue_for_record(&conn, "rec-1", &items).unwrap(), 2);
        // Re-enqueue (the deferred-then-settled path): nothing new
        assert_eq!(enqueue_for_record(&conn, "rec-1", &items).unwrap(), 0);
        // Same products for a different record are separate entries
        assert_eq!(enqueue_for_record(&conn, "rec-2", &items).unwrap(), 2);
    }

    #[test]
    fn test_apply_pending_marks_applied() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            enqueue_for_record(&conn, "rec-1", &[item("p1", 2), item("p2", 1)]).unwrap();
        }

        let adjuster = RecordingAdjuster::new();
        let summary = apply_pending(&db, &adjuster).unwrap();
        assert_eq!(summary.applied, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            *adjuster.calls.borrow(),
            vec![("p1".to_string(), 2), ("p2".to_string(), 1)]
        );
        assert_eq!(pending_count(&db).unwrap(), 0);

        // A second pass finds nothing to do
        let summary = apply_pending(&db, &adjuster).unwrap();
        assert_eq!(summary, ApplySummary::default());
        assert_eq!(adjuster.calls.borrow().len(), 2);
    }

    #[test]
    fn test_failed_entries_are_retried_later() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            enqueue_for_record(&conn, "rec-1", &[item("p1", 2), item("p2", 1)]).unwrap();
        }

        let flaky = RecordingAdjuster::failing_on("p2");
        let summary = apply_pending(&db, &flaky).unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(pending_count(&db).unwrap(), 1);

        // The failure is recorded on the entry
        {
            let conn = db.conn.lock().unwrap();
            let (attempts, last_error): (i64, String) = conn
                .query_row(
                    "SELECT attempts, last_error FROM stock_queue WHERE product_id = 'p2'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .unwrap();
            assert_eq!(attempts, 1);
            assert!(last_error.contains("unavailable"));
        }

        // Next pass with a healthy adjuster applies only the failed entry
        let healthy = RecordingAdjuster::new();
        let summary = apply_pending(&db, &healthy).unwrap();
        assert_eq!(summary.applied, 1);
        assert_eq!(*healthy.calls.borrow(), vec![("p2".to_string(), 1)]);
        assert_eq!(pending_count(&db).unwrap(), 0);
    }
}
