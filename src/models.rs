// src/models.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub hash: String,
    pub cash: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    Purchase,
    Sale,
}

impl TradeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeKind::Purchase => "purchase",
            TradeKind::Sale => "sale",
        }
    }
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(TradeKind::Purchase),
            "sale" => Ok(TradeKind::Sale),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

/// One row of the append-only transaction ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub kind: TradeKind,
    pub shares: u32,
    pub symbol: String,
    pub total: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    pub fn price_per_share(&self) -> Decimal {
        (self.total / Decimal::from(self.shares)).round_dp(2)
    }
}

/// Net position in one symbol, aggregated from the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Holding {
    pub symbol: String,
    pub shares: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
}

/// Trims and upper-cases a ticker symbol.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_kind_round_trips_through_text() {
        assert_eq!("purchase".parse::<TradeKind>(), Ok(TradeKind::Purchase));
        assert_eq!(TradeKind::Sale.to_string(), "sale");
        assert!("refund".parse::<TradeKind>().is_err());
    }

    #[test]
    fn price_per_share_divides_total() {
        let tx = Transaction {
            id: 1,
            user_id: 1,
            kind: TradeKind::Purchase,
            shares: 3,
            symbol: "AAPL".into(),
            total: Decimal::new(10000, 2),
            timestamp: Utc::now(),
        };
        assert_eq!(tx.price_per_share(), Decimal::new(3333, 2));
    }

    #[test]
    fn symbols_are_trimmed_and_uppercased() {
        assert_eq!(normalize_symbol("  nflx "), "NFLX");
    }
}
