//! Inventory service API client.
//!
//! Implements `StockAdjuster` over HTTP against the back-office inventory
//! endpoint. The outbox (`stock` module) owns retries; this client only
//! performs single decrement calls and maps transport failures to
//! operator-readable messages.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::stock::StockAdjuster;

/// Default timeout for inventory requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the inventory service URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_inventory_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach inventory service at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid inventory service URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn friendly_status(status: StatusCode) -> String {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            "Inventory service rejected the API key".to_string()
        }
        StatusCode::NOT_FOUND => "Inventory endpoint not found — check the service URL".to_string(),
        s if s.is_server_error() => {
            format!("Inventory service error ({})", s.as_u16())
        }
        s => format!("Inventory request failed ({})", s.as_u16()),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// `StockAdjuster` backed by the back-office inventory HTTP API.
pub struct HttpStockAdjuster {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl HttpStockAdjuster {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| format!("build http client: {e}"))?;

        Ok(HttpStockAdjuster {
            base_url: normalize_inventory_url(base_url),
            api_key,
            client,
        })
    }

    fn decrement_url(&self) -> String {
        format!("{}/api/inventory/decrement", self.base_url)
    }
}

impl StockAdjuster for HttpStockAdjuster {
    fn decrement_stock(&self, product_id: &str, quantity: i64) -> Result<(), String> {
        let url = self.decrement_url();
        debug!(product_id = %product_id, quantity = %quantity, "POST {url}");

        let mut request = self.client.post(&url).json(&json!({
            "productId": product_id,
            "quantity": quantity,
        }));
        if let Some(ref key) = self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        if !response.status().is_success() {
            return Err(friendly_status(response.status()));
        }

        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
