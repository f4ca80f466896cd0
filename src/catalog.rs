//! Product catalog for Sari POS.
//!
//! The catalog is reference data from the sales workflow's perspective:
//! products are listed as a full snapshot, filtered for availability, and
//! looked up by id when pricing a cart. Stock levels live with the external
//! inventory service, not here.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::db::DbState;

/// A product available for sale.
///
/// `available = false` hides a product from selection but keeps it in the
/// catalog so historical records still resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: f64,
    pub cost: f64,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Store operations
// ---------------------------------------------------------------------------

/// Fetch the full product collection.
pub fn list_products(db: &DbState) -> Result<Vec<Product>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let mut stmt = conn
        .prepare(
            "SELECT id, name, description, price, cost, available
             FROM products
             ORDER BY name COLLATE NOCASE",
        )
        .map_err(|e| e.to_string())?;

    let rows = stmt
        .query_map([], |row| {
            Ok(Product {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                price: row.get(3)?,
                cost: row.get(4)?,
                available: row.get::<_, i64>(5)? != 0,
            })
        })
        .map_err(|e| e.to_string())?;

    let mut products = Vec::new();
    for row in rows {
        match row {
            Ok(p) => products.push(p),
            Err(e) => warn!("skipping malformed product row: {e}"),
        }
    }

    Ok(products)
}

/// Insert or update a product, returning its id.
///
/// The catalog is maintained elsewhere; this is the ingest path used when
/// catalog data arrives from the back office (and by tests).
pub fn upsert_product(db: &DbState, product: &Product) -> Result<String, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let id = if product.id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        product.id.clone()
    };

    conn.execute(
        "INSERT INTO products (id, name, description, price, cost, available, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            price = excluded.price,
            cost = excluded.cost,
            available = excluded.available,
            updated_at = excluded.updated_at",
        params![
            id,
            product.name,
            product.description,
            product.price,
            product.cost,
            product.available as i64,
        ],
    )
    .map_err(|e| format!("upsert product: {e}"))?;

    Ok(id)
}

// ---------------------------------------------------------------------------
// Snapshot helpers
// ---------------------------------------------------------------------------

/// Find a product in a catalog snapshot by id.
pub fn find<'a>(products: &'a [Product], product_id: &str) -> Option<&'a Product> {
    products.iter().find(|p| p.id == product_id)
}

/// Live catalog price for a product, or `None` when it is not in the snapshot.
pub fn price_of(products: &[Product], product_id: &str) -> Option<f64> {
    find(products, product_id).map(|p| p.price)
}

/// Products eligible for the selection grid: available, and matching the
/// search query against name or description (case-insensitive substring).
/// An empty query matches everything available.
pub fn search_available<'a>(products: &'a [Product], query: &str) -> Vec<&'a Product> {
    let needle = query.trim().to_lowercase();
    products
        .iter()
        .filter(|p| p.available)
        .filter(|p| {
            if needle.is_empty() {
                return true;
            }
            p.name.to_lowercase().contains(&needle)
                || p.description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle))
        })
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================
