//! Ledger filtering and aggregates.
//!
//! Pure functions over a full sale-record snapshot. Filters compose
//! conjunctively: a record must satisfy every active filter to appear.
//! Aggregates are always computed over the unfiltered set.

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::ledger::{SaleRecord, SettlementState};

/// Status filter. Voided is its own state rather than a flavour of unpaid,
/// matching the tagged settlement state on the record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    Any,
    Paid,
    Unpaid,
    Voided,
}

/// Filters applied to the ledger view. All fields are optional and
/// combined with AND.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Inclusive, from local day-start.
    pub date_from: Option<NaiveDate>,
    /// Inclusive, to local day-end.
    pub date_to: Option<NaiveDate>,
    /// Exact customer name match.
    pub customer: Option<String>,
    /// Exact product name match against any of the record's product names.
    pub product: Option<String>,
    pub status: StatusFilter,
    /// Case-insensitive substring match on the customer name.
    pub search: Option<String>,
}

// ---------------------------------------------------------------------------
// Day boundaries
// ---------------------------------------------------------------------------

fn local_day_start(date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// True when the record satisfies every active filter.
pub fn matches(record: &SaleRecord, filter: &RecordFilter) -> bool {
    if let Some(from) = filter.date_from {
        if record.created_at < local_day_start(from) {
            return false;
        }
    }
    // Inclusive day-end: anything before the start of the following day
    if let Some(next_day) = filter.date_to.and_then(|to| to.succ_opt()) {
        if record.created_at >= local_day_start(next_day) {
            return false;
        }
    }

    if let Some(ref customer) = filter.customer {
        if record.customer_name != *customer {
            return false;
        }
    }

    if let Some(ref product) = filter.product {
        if !record.product_names().iter().any(|n| n == product) {
            return false;
        }
    }

    match filter.status {
        StatusFilter::Any => {}
        StatusFilter::Paid => {
            if record.state != SettlementState::Paid {
                return false;
            }
        }
        StatusFilter::Unpaid => {
            if record.state != SettlementState::Unpaid {
                return false;
            }
        }
        StatusFilter::Voided => {
            if record.state != SettlementState::Voided {
                return false;
            }
        }
    }

    if let Some(ref search) = filter.search {
        let needle = search.trim().to_lowercase();
        if !needle.is_empty() && !record.customer_name.to_lowercase().contains(&needle) {
            return false;
        }
    }

    true
}

/// Apply the filter to a snapshot, preserving order.
pub fn filter_records<'a>(
    records: &'a [SaleRecord],
    filter: &RecordFilter,
) -> Vec<&'a SaleRecord> {
    records.iter().filter(|r| matches(r, filter)).collect()
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Headline numbers for the ledger view, over the full unfiltered set.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LedgerStats {
    pub total_transactions: usize,
    pub total_paid: usize,
    /// Records not paid: unpaid and voided both count.
    pub total_unpaid: usize,
    /// Sum of `total_price` over paid records only.
    pub total_sales: f64,
}

pub fn ledger_stats(records: &[SaleRecord]) -> LedgerStats {
    let mut stats = LedgerStats {
        total_transactions: records.len(),
        ..LedgerStats::default()
    };
    for record in records {
        if record.state == SettlementState::Paid {
            stats.total_paid += 1;
            stats.total_sales += record.total_price;
        } else {
            stats.total_unpaid += 1;
        }
    }
    stats
}

/// The most-availed product names with their record counts, descending.
/// Each record counts a product name once, however many units it sold.
pub fn most_availed(records: &[SaleRecord], limit: usize) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        for name in record.product_names() {
            *counts.entry(name).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    // BTreeMap iteration gives the name-ascending tiebreak
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(limit);
    ranked
}

/// Distinct customer names for the filter dropdown.
pub fn unique_customers(records: &[SaleRecord]) -> Vec<String> {
    let names: BTreeSet<String> = records
        .iter()
        .map(|r| r.customer_name.clone())
        .filter(|n| !n.is_empty())
        .collect();
    names.into_iter().collect()
}

/// Distinct product names for the filter dropdown.
pub fn unique_products(records: &[SaleRecord]) -> Vec<String> {
    let names: BTreeSet<String> = records
        .iter()
        .flat_map(|r| r.product_names())
        .collect();
    names.into_iter().collect()
}

// ===========================================================================
// Tests
// ===========================================================================
