//! Positions and the realized-PnL ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Net holdings of (account, symbol). `qty` is signed: negative means short
/// (only when shorting is enabled by configuration). `avg_price` is the
/// cost-basis average and is undefined (None) when flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub account_id: String,
    pub symbol: String,
    pub qty: i64,
    pub avg_price: Option<Decimal>,
    pub last_updated_at: DateTime<Utc>,
}

impl Position {
    pub fn flat(account_id: impl Into<String>, symbol: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.into(),
            symbol: symbol.into(),
            qty: 0,
            avg_price: None,
            last_updated_at: now,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.qty == 0
    }
}

/// Append-only realized-PnL ledger row, one per realizing fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlLedgerEntry {
    pub entry_id: i64,
    pub account_id: String,
    pub symbol: String,
    pub fill_id: String,
    pub realized_delta: Decimal,
    pub cumulative_realized: Decimal,
    pub created_at: DateTime<Utc>,
}
