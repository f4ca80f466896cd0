//! Receipt preview rendering.
//!
//! Builds an HTML receipt preview for a sale record from the record itself
//! and the store header settings. Display-only: currency formatting here is
//! not part of the data contract.

use rusqlite::params;

use crate::db::{self, DbState};
use crate::ledger::{self, SettlementState};

/// Currency symbol used when no `store.currency_symbol` setting exists.
const DEFAULT_CURRENCY: &str = "₱";

fn money(symbol: &str, value: f64) -> String {
    format!("{symbol}{value:.2}")
}

/// Build an HTML receipt preview for a record.
pub fn get_receipt_preview(db: &DbState, record_id: &str) -> Result<String, String> {
    let record = ledger::get_record(db, record_id)?;

    let (store_name, store_address, symbol) = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        (
            db::get_setting(&conn, "store", "name").unwrap_or_else(|| "Sari POS".to_string()),
            db::get_setting(&conn, "store", "address").unwrap_or_default(),
            db::get_setting(&conn, "store", "currency_symbol")
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        )
    };

    // Items section
    let items = record.effective_items();
    let mut items_html = String::new();
    for item in &items {
        items_html.push_str(&format!(
            "<div style=\"display:flex;justify-content:space-between;\"><span>{}x {}</span><span>{}</span></div>\n",
            item.quantity,
            item.product_name,
            money(&symbol, item.subtotal()),
        ));
    }
    if items_html.is_empty() {
        items_html = "<div style=\"text-align:center;color:#888;\">No items</div>".to_string();
    }

    // Payment section
    let mut payment_html = String::new();
    match record.state {
        SettlementState::Paid => {
            let method_label = record
                .payment_method
                .map(|m| m.label())
                .unwrap_or("Unknown");
            payment_html.push_str(&format!(
                "<div style=\"display:flex;justify-content:space-between;\"><span>{method_label}</span><span>{}</span></div>\n",
                money(&symbol, record.total_price),
            ));
            if let Some(tendered) = record.amount_tendered {
                payment_html.push_str(&format!(
                    "<div style=\"display:flex;justify-content:space-between;color:#666;\"><span>Tendered</span><span>{}</span></div>\n",
                    money(&symbol, tendered),
                ));
            }
            if let Some(change) = record.change_given {
                payment_html.push_str(&format!(
                    "<div style=\"display:flex;justify-content:space-between;color:#666;\"><span>Change</span><span>{}</span></div>\n",
                    money(&symbol, change),
                ));
            }
        }
        SettlementState::Unpaid => {
            payment_html.push_str(
                "<div style=\"text-align:center;color:#888;\">UNPAID — payment to be collected</div>\n",
            );
        }
        SettlementState::Voided => {
            payment_html.push_str(
                "<div style=\"text-align:center;color:#c00;font-weight:bold;\">*** VOID ***</div>\n",
            );
            if let Some(ref reason) = record.void_reason {
                payment_html.push_str(&format!(
                    "<div style=\"color:#888;font-size:9px;\">Reason: {reason}</div>\n"
                ));
            }
        }
    }

    let cashier_line = record
        .cashier_name
        .clone()
        .unwrap_or_else(|| record.cashier_id.clone());

    let address_line = if store_address.is_empty() {
        String::new()
    } else {
        format!("{store_address}<br/>")
    };

    let total_line = money(&symbol, record.total_price);
    let date = record.created_at.to_rfc3339();

    let html = format!(
        r#"<div style="font-family:monospace;font-size:10px;line-height:1.4;width:100%;">
<div style="text-align:center;margin-bottom:8px;">
<strong style="font-size:14px;">{store_name}</strong><br/>
{address_line}</div>
<hr style="border:none;border-top:1px dashed #000;"/>
<div style="margin:4px 0;">
Customer: {customer}<br/>
Cashier: {cashier_line}<br/>
Date: {date}
</div>
<hr style="border:none;border-top:1px dashed #000;"/>
{items_html}
<hr style="border:none;border-top:1px dashed #000;"/>
<div style="display:flex;justify-content:space-between;"><strong>TOTAL</strong><strong>{total_line}</strong></div>
<hr style="border:none;border-top:1px dashed #000;"/>
<div style="margin:4px 0;"><strong>Payment</strong></div>
{payment_html}
<hr style="border:none;border-top:1px dashed #000;"/>
<div style="text-align:center;margin-top:8px;font-size:9px;">
Thank you!
</div>
</div>"#,
        customer = record.customer_name,
    );

    Ok(html)
}

/// Convenience wrapper for persisting the store header used on receipts.
pub fn set_store_header(db: &DbState, name: &str, address: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, "store", "name", name)?;
    db::set_setting(&conn, "store", "address", address)?;
    Ok(())
}

/// True when the record still exists; used by callers that cache previews.
pub fn record_exists(db: &DbState, record_id: &str) -> Result<bool, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    conn.query_row(
        "SELECT 1 FROM sale_records WHERE id = ?1",
        params![record_id],
        |_| Ok(()),
    )
    .map(|_| true)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(false),
        other => Err(other.to_string()),
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::ledger::{LineItem, PaymentMethod, SaleRecord};
    use chrono::Utc;
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

    fn paid_record(id: &str) -> SaleRecord {
        SaleRecord {
            id: id.to_string(),
            customer_name: "Maria Santos".into(),
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
            state: SettlementState::Paid,
            payment_method: Some(PaymentMethod::Cash),
            amount_tendered: Some(200.0),
            change_given: Some(70.0),
            void_reason: None,
            voided_by: None,
            voided_at: None,
        }
    }

    fn insert(db: &DbState, record: &SaleRecord) {
        let conn = db.conn.lock().unwrap();
        crate::ledger::insert_record_tx(&conn, record).unwrap();
    }

    #[test]
    fn test_receipt_for_paid_record() {
        let db = test_db();
        set_store_header(&db, "Sari Store", "123 Rizal Ave").unwrap();
        insert(&db, &paid_record("rec-1"));

        let html = get_receipt_preview(&db, "rec-1").unwrap();
        assert!(html.contains("Sari Store"));
        assert!(html.contains("123 Rizal Ave"));
        assert!(html.contains("Maria Santos"));
        assert!(html.contains("Ana Reyes"));
        assert!(html.contains("2x Car Shampoo"));
        assert!(html.contains("1x Air Freshener"));
        assert!(html.contains("₱130.00"));
        assert!(html.contains("Cash"));
        assert!(html.contains("₱200.00")); // tendered
        assert!(html.contains("₱70.00")); // change
    }

    #[test]
    fn test_receipt_for_unpaid_record() {
        let db = test_db();
        let mut record = paid_record("rec-2");
        record.state = SettlementState::Unpaid;
        record.payment_method = None;
        record.amount_tendered = None;
        record.change_given = None;
        insert(&db, &record);

        let html = get_receipt_preview(&db, "rec-2").unwrap();
        assert!(html.contains("UNPAID"));
        assert!(!html.contains("Change"));
    }

    #[test]
    fn test_receipt_for_voided_record() {
        let db = test_db();
        insert(&db, &paid_record("rec-3"));
        crate::ledger::void_record(&db, "rec-3", "Test entry", None).unwrap();

        let html = get_receipt_preview(&db, "rec-3").unwrap();
        assert!(html.contains("*** VOID ***"));
        assert!(html.contains("Reason: Test entry"));
    }

    #[test]
    fn test_receipt_missing_record() {
        let db = test_db();
        let err = get_receipt_preview(&db, "ghost").unwrap_err();
        assert!(err.contains("not found"));
        assert!(!record_exists(&db, "ghost").unwrap());
    }

    #[test]
    fn test_custom_currency_symbol() {
        let db = test_db();
        {
            let conn = db.conn.lock().unwrap();
            db::set_setting(&conn, "store", "currency_symbol", "$").unwrap();
        }
        insert(&db, &paid_record("rec-4"));

        let html = get_receipt_preview(&db, "rec-4").unwrap();
        assert!(html.contains("$130.00"));
        assert!(!html.contains("₱"));
    }
}
