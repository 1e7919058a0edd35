// src/portfolio.rs
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::Holding;
use crate::quote::QuoteSource;
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRow {
    pub symbol: String,
    pub name: String,
    pub shares: i64,
    pub price: Decimal,
    pub value: Decimal,
}

/// A user's cash plus every open position valued at the live price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Portfolio {
    pub rows: Vec<PositionRow>,
    pub cash: Decimal,
    pub total: Decimal,
}

impl Portfolio {
    /// Values `holdings` against `quotes`. A symbol the source no longer
    /// knows fails the whole valuation.
    pub async fn value(holdings: Vec<Holding>, cash: Decimal, quotes: &dyn QuoteSource) -> Result<Self> {
        let mut rows = Vec::with_capacity(holdings.len());
        let mut total = cash;

        for holding in holdings {
            let quote = quotes.lookup(&holding.symbol).await?.ok_or_else(|| {
                AppError::QuoteService(format!("no quote available for {}", holding.symbol))
            })?;
            let value = quote.price * Decimal::from(holding.shares);
            total += value;
            rows.push(PositionRow {
                symbol: holding.symbol,
                name: quote.name,
                shares: holding.shares,
                price: quote.price,
                value,
            });
        }

        Ok(Portfolio { rows, cash, total })
    }

    pub async fn for_user(db: &Database, user_id: i64, quotes: &dyn QuoteSource) -> Result<Self> {
        let holdings = db.holdings(user_id).await?;
        let cash = db.cash(user_id).await?;
        Self::value(holdings, cash, quotes).await
    }
}
