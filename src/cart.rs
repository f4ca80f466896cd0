//! Cart accumulator for the active sale.
//!
//! A cart is a transient list of (product, quantity) pairs owned by the
//! current sale attempt. Totals are computed against the live catalog
//! snapshot; prices are only frozen onto the record at settlement time.
//!
//! **Rules:**
//! - A product appears at most once; re-adding it is a no-op
//! - Quantity is always >= 1; setting it lower clamps to 1
//! - An empty cart totals 0 and cannot be settled

use serde::{Deserialize, Serialize};

use crate::catalog::{self, Product};
use crate::ledger::SaleRecord;

/// One product-and-quantity entry in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: String,
    pub quantity: i64,
}

/// The in-memory cart for the active sale attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// Creates a new empty cart.
    pub fn new() -> Self {
        Cart { lines: Vec::new() }
    }

    /// Seed a cart from a stored record's line items (the resume path).
    /// Legacy single-service records fall back to their service columns.
    pub fn seed_from_record(record: &SaleRecord) -> Self {
        let lines = record
            .effective_items()
            .into_iter()
            .map(|item| CartLine {
                product_id: item.product_id,
                quantity: item.quantity.max(1),
            })
            .collect();
        Cart { lines }
    }

    /// Add a product with quantity 1. No-op if the product is already in
    /// the cart (quantities are changed via `set_quantity`).
    pub fn add(&mut self, product_id: &str) {
        if self.lines.iter().any(|l| l.product_id == product_id) {
            return;
        }
        self.lines.push(CartLine {
            product_id: product_id.to_string(),
            quantity: 1,
        });
    }

    /// Set the quantity for a product already in the cart, clamped to a
    /// minimum of 1. Unknown products are ignored.
    pub fn set_quantity(&mut self, product_id: &str, quantity: i64) {
        if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity = quantity.max(1);
        }
    }

    /// Remove a product's line entirely.
    pub fn remove(&mut self, product_id: &str) {
        self.lines.retain(|l| l.product_id != product_id);
    }

    /// Remove all lines.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Cart total at live catalog prices. Products missing from the
    /// snapshot contribute 0 rather than failing the whole total.
    pub fn total(&self, products: &[Product]) -> f64 {
        self.lines
            .iter()
            .map(|l| {
                catalog::price_of(products, &l.product_id).unwrap_or(0.0) * l.quantity as f64
            })
            .sum()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, price: f64) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Product {id}"),
            description: None,
            price,
            cost: 0.0,
            available: true,
        }
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut cart = Cart::new();
        cart.add("p1");
        cart.add("p1");

        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity, 1);
    }

    #[test]
    fn test_set_quantity_clamps_to_one() {
        let mut cart = Cart::new();
        cart.add("p1");

        cart.set_quantity("p1", 5);
        assert_eq!(cart.lines()[0].quantity, 5);

        cart.set_quantity("p1", 0);
        assert_eq!(cart.lines()[0].quantity, 1);

        cart.set_quantity("p1", -3);
        assert_eq!(cart.lines()[0].quantity, 1);

        // Unknown product: ignored, nothing inserted
        cart.set_quantity("ghost", 4);
        assert_eq!(cart.lines().len(), 1);
    }

    #[test]
    fn test_remove_deletes_line() {
        let mut cart = Cart::new();
        cart.add("p1");
        cart.add("p2");

        cart.remove("p1");
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].product_id, "p2");
    }

    #[test]
    fn test_total_uses_live_prices() {
        let products = vec![product("p1", 50.0), product("p2", 30.0)];

        let mut cart = Cart::new();
        cart.add("p1");
        cart.set_quantity("p1", 2);
        cart.add("p2");

        assert_eq!(cart.total(&products), 130.0);
    }

    #[test]
    fn test_total_of_empty_cart_is_zero() {
        let cart = Cart::new();
        assert_eq!(cart.total(&[]), 0.0);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_total_skips_unknown_products() {
        let products = vec![product("p1", 50.0)];

        let mut cart = Cart::new();
        cart.add("p1");
        cart.add("vanished");
        cart.set_quantity("vanished", 10);

        assert_eq!(cart.total(&products), 50.0);
    }
}
