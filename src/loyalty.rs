//! Loyalty customer reference data.
//!
//! Customers are read-only from the sales workflow's perspective: they feed
//! the customer autocomplete and the name-resolution precedence chain. A
//! sale copies the resolved name onto the record; there is no foreign key
//! back to this collection.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::db::DbState;

/// A vehicle registered to a loyalty customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerCar {
    pub car_name: String,
    pub plate_number: String,
}

/// A registered loyalty customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyCustomer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cars: Vec<CustomerCar>,
}

// ---------------------------------------------------------------------------
// Store operations
// ---------------------------------------------------------------------------

/// Fetch the full loyalty customer collection.
pub fn list_customers(db: &DbState) -> Result<Vec<LoyaltyCustomer>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut stmt = conn
        .prepare("SELECT id, name, cars FROM loyalty_customers ORDER BY name COLLATE NOCASE")
        .map_err(|e| e.to_string())?;

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let cars_raw: String = row.get(2)?;
            Ok((id, name, cars_raw))
        })
        .map_err(|e| e.to_string())?;

    let mut customers = Vec::new();
    for row in rows {
        match row {
            Ok((id, name, cars_raw)) => {
                let cars: Vec<CustomerCar> = serde_json::from_str(&cars_raw).unwrap_or_else(|e| {
                    warn!(customer = %name, "malformed cars JSON: {e}");
                    Vec::new()
                });
                customers.push(LoyaltyCustomer { id, name, cars });
            }
            Err(e) => warn!("skipping malformed loyalty customer row: {e}"),
        }
    }

    Ok(customers)
}

/// Insert or update a customer by name, returning the id.
pub fn upsert_customer(db: &DbState, name: &str, cars: &[CustomerCar]) -> Result<String, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Customer name must not be empty".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let cars_json = serde_json::to_string(cars).map_err(|e| format!("serialize cars: {e}"))?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM loyalty_customers WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .ok();

    let id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());
    conn.execute(
        "INSERT INTO loyalty_customers (id, name, cars, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            cars = excluded.cars,
            updated_at = excluded.updated_at",
        params![id, name, cars_json],
    )
    .map_err(|e| format!("upsert customer: {e}"))?;

    Ok(id)
}

// ---------------------------------------------------------------------------
// Customer resolution
// ---------------------------------------------------------------------------

/// Find a customer in a snapshot by exact name.
pub fn find_by_name<'a>(
    customers: &'a [LoyaltyCustomer],
    name: &str,
) -> Option<&'a LoyaltyCustomer> {
    customers.iter().find(|c| c.name == name)
}

/// Resolve the customer name persisted on a sale record.
///
/// Precedence: selected loyalty customer, then the free-typed name, then
/// the name already stored on a resumed record, then `"N/A"`.
pub fn resolve_customer_name(
    selected: Option<&str>,
    typed: &str,
    stored: Option<&str>,
) -> String {
    if let Some(name) = selected {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    let typed = typed.trim();
    if !typed.is_empty() {
        return typed.to_string();
    }
    if let Some(name) = stored {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    "N/A".to_string()
}

// ===========================================================================
// Tests
// ===========================================================================
