//! Sale record ledger for Sari POS.
//!
//! A `SaleRecord` is the persisted unit of truth for one transaction:
//! frozen line items, the total at sale-time prices, cashier identity,
//! and a single tagged settlement state (`unpaid` / `paid` / `voided`).
//!
//! **Rules:**
//! - `total_price` always equals the sum of line subtotals at the prices
//!   captured when the sale was settled or recorded
//! - `unpaid -> paid` happens at most once; `created_at` survives it
//! - `voided` is terminal
//!
//! Records written before multi-product support carry their single service
//! in the legacy columns; `effective_items` folds both shapes into one.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::DbState;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Settlement state of a sale record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementState {
    Unpaid,
    Paid,
    Voided,
}

impl SettlementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementState::Unpaid => "unpaid",
            SettlementState::Paid => "paid",
            SettlementState::Voided => "voided",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(SettlementState::Unpaid),
            "paid" => Some(SettlementState::Paid),
            "voided" => Some(SettlementState::Voided),
            _ => None,
        }
    }
}

/// Accepted payment methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Gcash,
    Card,
    Maya,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Gcash => "gcash",
            PaymentMethod::Card => "card",
            PaymentMethod::Maya => "maya",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(PaymentMethod::Cash),
            "gcash" => Some(PaymentMethod::Gcash),
            "card" => Some(PaymentMethod::Card),
            "maya" => Some(PaymentMethod::Maya),
            _ => None,
        }
    }

    /// Display label for receipts and tables.
    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::Gcash => "GCash",
            PaymentMethod::Card => "Card",
            PaymentMethod::Maya => "Maya",
        }
    }
}

/// One frozen product line within a sale record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    pub product_name: String,
    /// Unit price at sale time, not the live catalog price.
    #[serde(rename = "price")]
    pub unit_price: f64,
    pub quantity: i64,
}

impl LineItem {
    pub fn subtotal(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }
}

/// A persisted sale transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub id: String,
    pub customer_name: String,
    pub line_items: Vec<LineItem>,
    /// Legacy single-service columns, present on pre-multi-product records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_quantity: Option<i64>,
    pub total_price: f64,
    pub cashier_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cashier_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub state: SettlementState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_tendered: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_given: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub void_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voided_at: Option<DateTime<Utc>>,
}

impl SaleRecord {
    /// Line items, falling back to the legacy single-service columns for
    /// records written before multi-product support.
    pub fn effective_items(&self) -> Vec<LineItem> {
        if !self.line_items.is_empty() {
            return self.line_items.clone();
        }
        if self.legacy_service_id.is_some() || self.legacy_service_name.is_some() {
            let quantity = self.legacy_quantity.unwrap_or(1).max(1);
            return vec![LineItem {
                product_id: self.legacy_service_id.clone().unwrap_or_default(),
                product_name: self.legacy_service_name.clone().unwrap_or_default(),
                unit_price: self.total_price / quantity as f64,
                quantity,
            }];
        }
        Vec::new()
    }

    /// Distinct product names on this record (legacy name included).
    pub fn product_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .effective_items()
            .into_iter()
            .map(|i| i.product_name)
            .filter(|n| !n.is_empty())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const RECORD_COLUMNS: &str = "id, customer_name, service_id, service_name, quantity,
        total_price, cashier_id, cashier_name, state, payment_method,
        amount_tendered, change_given, created_at, line_items,
        void_reason, voided_by, voided_at";

/// Parse a stored timestamp. Settlement writes RFC 3339; rows created by
/// SQLite defaults use `datetime('now')` format.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|n| Utc.from_utc_datetime(&n))
        })
}

fn timestamp_err(idx: usize, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unparseable timestamp: {raw}").into(),
    )
}

fn map_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SaleRecord> {
    let created_raw: String = row.get(12)?;
    let created_at = parse_timestamp(&created_raw).ok_or_else(|| timestamp_err(12, &created_raw))?;

    let voided_at = match row.get::<_, Option<String>>(16)? {
        Some(raw) => Some(parse_timestamp(&raw).ok_or_else(|| timestamp_err(16, &raw))?),
        None => None,
    };

    let state_raw: String = row.get(8)?;
    let state = SettlementState::parse(&state_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown settlement state: {state_raw}").into(),
        )
    })?;

    let items_raw: String = row.get(13)?;
    let line_items: Vec<LineItem> = serde_json::from_str(&items_raw).unwrap_or_else(|e| {
        warn!("malformed line_items JSON, falling back to legacy columns: {e}");
        Vec::new()
    });

    Ok(SaleRecord {
        id: row.get(0)?,
        customer_name: row.get(1)?,
        legacy_service_id: row.get(2)?,
        legacy_service_name: row.get(3)?,
        legacy_quantity: row.get(4)?,
        total_price: row.get(5)?,
        cashier_id: row.get(6)?,
        cashier_name: row.get(7)?,
        state,
        payment_method: row
            .get::<_, Option<String>>(9)?
            .as_deref()
            .and_then(PaymentMethod::parse),
        amount_tendered: row.get(10)?,
        change_given: row.get(11)?,
        created_at,
        line_items,
        void_reason: row.get(14)?,
        voided_by: row.get(15)?,
        voided_at,
    })
}

// ---------------------------------------------------------------------------
// Store operations
// ---------------------------------------------------------------------------

/// Fetch the full ledger, newest first. Malformed rows are skipped.
pub fn list_records(db: &DbState) -> Result<Vec<SaleRecord>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM sale_records ORDER BY created_at DESC, id DESC"
        ))
        .map_err(|e| e.to_string())?;

    let rows = stmt.query_map([], map_record).map_err(|e| e.to_string())?;

    let mut records = Vec::new();
    for row in rows {
        match row {
            Ok(r) => records.push(r),
            Err(e) => warn!("skipping malformed sale record row: {e}"),
        }
    }

    Ok(records)
}

/// Fetch one record by id.
pub fn get_record(db: &DbState, record_id: &str) -> Result<SaleRecord, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    get_record_tx(&conn, record_id)
}

/// Fetch one record using a caller-held connection (settlement runs this
/// inside its transaction).
pub(crate) fn get_record_tx(conn: &Connection, record_id: &str) -> Result<SaleRecord, String> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM sale_records WHERE id = ?1"),
        params![record_id],
        map_record,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => format!("Record not found: {record_id}"),
        _ => format!("query record: {e}"),
    })
}

/// Insert a freshly settled or deferred record.
pub(crate) fn insert_record_tx(conn: &Connection, record: &SaleRecord) -> Result<(), String> {
    let items_json = serde_json::to_string(&record.line_items)
        .map_err(|e| format!("serialize line items: {e}"))?;

    conn.execute(
        "INSERT INTO sale_records (
            id, customer_name, line_items, total_price,
            cashier_id, cashier_name, state, payment_method,
            amount_tendered, change_given, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            record.id,
            record.customer_name,
            items_json,
            record.total_price,
            record.cashier_id,
            record.cashier_name,
            record.state.as_str(),
            record.payment_method.map(|m| m.as_str()),
            record.amount_tendered,
            record.change_given,
            record.created_at.to_rfc3339(),
        ],
    )
    .map_err(|e| format!("insert record: {e}"))?;

    Ok(())
}

/// Transition an `unpaid` record to `paid` in place, refreshing the frozen
/// line items, total, customer, and cashier. `created_at` is untouched.
///
/// Returns `Ok(false)` when the record exists but is no longer awaiting
/// payment — the losing side of two operators resuming the same record.
pub(crate) fn mark_paid_tx(conn: &Connection, record: &SaleRecord) -> Result<bool, String> {
    let items_json = serde_json::to_string(&record.line_items)
        .map_err(|e| format!("serialize line items: {e}"))?;

    let changed = conn
        .execute(
            "UPDATE sale_records SET
                customer_name = ?1,
                line_items = ?2,
                total_price = ?3,
                cashier_id = ?4,
                cashier_name = ?5,
                state = 'paid',
                payment_method = ?6,
                amount_tendered = ?7,
                change_given = ?8,
                updated_at = ?9
             WHERE id = ?10 AND state = 'unpaid'",
            params![
                record.customer_name,
                items_json,
                record.total_price,
                record.cashier_id,
                record.cashier_name,
                record.payment_method.map(|m| m.as_str()),
                record.amount_tendered,
                record.change_given,
                Utc::now().to_rfc3339(),
                record.id,
            ],
        )
        .map_err(|e| format!("mark record paid: {e}"))?;

    Ok(changed == 1)
}

/// Void a record. Terminal: voided records cannot be voided again, and no
/// later writer touches them.
pub fn void_record(
    db: &DbState,
    record_id: &str,
    reason: &str,
    voided_by: Option<&str>,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let now = Utc::now().to_rfc3339();
    let changed = conn
        .execute(
            "UPDATE sale_records SET
                state = 'voided', void_reason = ?1, voided_by = ?2,
                voided_at = ?3, updated_at = ?3
             WHERE id = ?4 AND state != 'voided'",
            params![reason, voided_by, now, record_id],
        )
        .map_err(|e| format!("void record: {e}"))?;

    if changed == 0 {
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM sale_records WHERE id = ?1",
                params![record_id],
                |_| Ok(true),
            )
            .unwrap_or(false);
        return Err(if exists {
            format!("Record already voided: {record_id}")
        } else {
            format!("Record not found: {record_id}")
        });
    }

    info!(record_id = %record_id, reason = %reason, "Sale record voided");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use rusqlite::Connection;

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

    fn sample_record(id: &str, state: SettlementState) -> SaleRecord {
        SaleRecord {
            id: id.to_string(),
            customer_name: "Maria Santos".to_string(),
            line_items: vec![
                LineItem {
                    product_id: "p1".into(),
                    product_name: "Car Shampoo".into(),
                    unit_price: 50.0,
                    quantity: 2,
                },
                LineItem {
                    product_id: "p2".into(),
                    product_name: "Air Freshener".into(),
                    unit_price: 30.0,
                    quantity: 1,
                },
            ],
            legacy_service_id: None,
            legacy_service_name: None,
            legacy_quantity: None,
            total_price: 130.0,
            cashier_id: "cashier-1".into(),
            cashier_name: Some("Ana Reyes".into()),
            created_at: Utc::now(),
            state,
            payment_method: None,
            amount_tendered: None,
            change_given: None,
            void_reason: None,
            voided_by: None,
            voided_at: None,
        }
    }

    #[test]
    fn test_insert_and_list_roundtrip() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            insert_record_tx(&conn, &sample_record("rec-1", SettlementState::Unpaid)).unwrap();
        }

        let records = list_records(&db).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.id, "rec-1");
        assert_eq!(r.customer_name, "Maria Santos");
        assert_eq!(r.line_items.len(), 2);
        assert_eq!(r.line_items[0].subtotal(), 100.0);
        assert_eq!(r.total_price, 130.0);
        assert_eq!(r.state, SettlementState::Unpaid);
        assert!(r.payment_method.is_none());
    }

    #[test]
    fn test_mark_paid_transitions_once() {
        let db = test_db();
        let mut record = sample_record("rec-2", SettlementState::Unpaid);
        {
            let conn = db.conn.lock().unwrap();
            insert_record_tx(&conn, &record).unwrap();
        }

        record.payment_method = Some(PaymentMethod::Cash);
        record.amount_tendered = Some(200.0);
        record.change_given = Some(70.0);

        let conn = db.conn.lock().unwrap();
        assert!(mark_paid_tx(&conn, &record).unwrap());
        // Second attempt loses the race guard
        assert!(!mark_paid_tx(&conn, &record).unwrap());
        drop(conn);

        let stored = get_record(&db, "rec-2").unwrap();
        assert_eq!(stored.state, SettlementState::Paid);
        assert_eq!(stored.payment_method, Some(PaymentMethod::Cash));
        assert_eq!(stored.amount_tendered, Some(200.0));
        assert_eq!(stored.change_given, Some(70.0));
    }

    #[test]
    fn test_mark_paid_preserves_created_at() {
        let db = test_db();
        let record = sample_record("rec-3", SettlementState::Unpaid);
        let original_created = record.created_at;
        {
            let conn = db.conn.lock().unwrap();
            insert_record_tx(&conn, &record).unwrap();
            mark_paid_tx(&conn, &record).unwrap();
        }

        let stored = get_record(&db, "rec-3").unwrap();
        assert_eq!(
            stored.created_at.timestamp_millis(),
            original_created.timestamp_millis()
        );
    }

    #[test]
    fn test_void_is_terminal() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            insert_record_tx(&conn, &sample_record("rec-4", SettlementState::Unpaid)).unwrap();
        }

        void_record(&db, "rec-4", "Wrong entry", Some("admin-1")).unwrap();

        let stored = get_record(&db, "rec-4").unwrap();
        assert_eq!(stored.state, SettlementState::Voided);
        assert_eq!(stored.void_reason.as_deref(), Some("Wrong entry"));
        assert_eq!(stored.voided_by.as_deref(), Some("admin-1"));
        assert!(stored.voided_at.is_some());

        // Re-voiding is rejected
        let err = void_record(&db, "rec-4", "again", None).unwrap_err();
        assert!(err.contains("already voided"));

        // And a voided record can no longer be marked paid
        let conn = db.conn.lock().unwrap();
        assert!(!mark_paid_tx(&conn, &sample_record("rec-4", SettlementState::Voided)).unwrap());
    }

    #[test]
    fn test_void_missing_record() {
        let db = test_db();
        let err = void_record(&db, "ghost", "n/a", None).unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_legacy_record_fallback() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            // A pre-multi-product row: service columns set, no line_items
            conn.execute(
                "INSERT INTO sale_records (
                    id, customer_name, service_id, service_name, quantity,
                    total_price, cashier_id, state, created_at, updated_at
                ) VALUES ('rec-old', 'Jun Cruz', 'p9', 'Wax Treatment', 2,
                          300.0, 'cashier-1', 'unpaid', datetime('now'), datetime('now'))",
                [],
            )
            .unwrap();
        }

        let record = get_record(&db, "rec-old").unwrap();
        assert!(record.line_items.is_empty());

        let items = record.effective_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id, "p9");
        assert_eq!(items[0].product_name, "Wax Treatment");
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[0].unit_price, 150.0);

        assert_eq!(record.product_names(), vec!["Wax Treatment".to_string()]);
    }

    #[test]
    fn test_product_names_dedupes() {
        let mut record = sample_record("rec-5", SettlementState::Paid);
        record.line_items.push(LineItem {
            product_id: "p1".into(),
            product_name: "Car Shampoo".into(),
            unit_price: 50.0,
            quantity: 3,
        });

        let names = record.product_names();
        assert_eq!(
            names,
            vec!["Air Freshener".to_string(), "Car Shampoo".to_string()]
        );
    }

    #[test]
    fn test_list_skips_malformed_rows() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            insert_record_tx(&conn, &sample_record("rec-good", SettlementState::Paid)).unwrap();
            conn.execute(
                "INSERT INTO sale_records (id, customer_name, total_price, cashier_id, state, created_at, updated_at)
                 VALUES ('rec-bad-ts', 'X', 10.0, 'c1', 'paid', 'not-a-timestamp', 'not-a-timestamp')",
                [],
            )
            .unwrap();
        }

        let records = list_records(&db).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "rec-good");
    }
}
