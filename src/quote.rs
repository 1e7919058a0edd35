// src/quote.rs
use crate::error::{AppError, Result};
use crate::models::{normalize_symbol, Quote};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;

/// Looks up the current price of a ticker symbol.
///
/// `Ok(None)` means the source does not know the symbol.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>>;
}

#[derive(Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
}

#[derive(Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    quote: Option<GlobalQuote>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct SymbolMatch {
    #[serde(rename = "1. symbol")]
    symbol: String,
    #[serde(rename = "2. name")]
    name: String,
}

#[derive(Deserialize)]
struct SymbolSearchResponse {
    #[serde(rename = "bestMatches", default)]
    best_matches: Vec<SymbolMatch>,
}

/// Quotes from the Alpha Vantage REST API.
pub struct AlphaVantage {
    client: Client,
    api_key: Arc<String>,
    base_url: String,
}

impl AlphaVantage {
    pub fn new(client: Client, api_key: Arc<String>, base_url: impl Into<String>) -> Self {
        AlphaVantage {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn global_quote(&self, symbol: &str) -> Result<Option<(String, Decimal)>> {
        let url = format!("{}/query", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<GlobalQuoteResponse>()
            .await?;
        parse_global_quote(response)
    }

    async fn symbol_search(&self, symbol: &str) -> reqwest::Result<SymbolSearchResponse> {
        let url = format!("{}/query", self.base_url);
        self.client
            .get(&url)
            .query(&[
                ("function", "SYMBOL_SEARCH"),
                ("keywords", symbol),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<SymbolSearchResponse>()
            .await
    }

    /// Best-match company name; the symbol itself when the search fails.
    async fn company_name(&self, symbol: &str) -> String {
        match self.symbol_search(symbol).await {
            Ok(search) => search
                .best_matches
                .into_iter()
                .find(|m| m.symbol.eq_ignore_ascii_case(symbol))
                .map(|m| m.name)
                .unwrap_or_else(|| symbol.to_string()),
            Err(e) => {
                warn!("Symbol search for {} failed: {}", symbol, e);
                symbol.to_string()
            }
        }
    }
}

#[async_trait]
impl QuoteSource for AlphaVantage {
    async fn lookup(&self, symbol: &str) -> Result<Option<Quote>> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Ok(None);
        }
        let Some((symbol, price)) = self.global_quote(&symbol).await? else {
            info!("No quote for {}", symbol);
            return Ok(None);
        };
        let name = self.company_name(&symbol).await;
        info!("Quoted {} ({}) at {}", symbol, name, price);
        Ok(Some(Quote {
            symbol,
            name,
            price,
        }))
    }
}

fn parse_global_quote(response: GlobalQuoteResponse) -> Result<Option<(String, Decimal)>> {
    if let Some(message) = response
        .note
        .or(response.information)
        .or(response.error_message)
    {
        return Err(AppError::QuoteService(message));
    }
    let Some(GlobalQuote {
        symbol: Some(symbol),
        price: Some(price),
    }) = response.quote
    else {
        return Ok(None);
    };
    let price = Decimal::from_str(price.trim())
        .map_err(|e| AppError::QuoteService(format!("bad price {:?}: {}", price, e)))?;
    if price <= Decimal::ZERO {
        return Ok(None);
    }
    Ok(Some((symbol, price)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<Option<(String, Decimal)>> {
        parse_global_quote(serde_json::from_str(body).unwrap())
    }

    #[test]
    fn parses_price_from_global_quote() {
        let body = r#"{"Global Quote": {"01. symbol": "IBM", "02. open": "170.0000", "05. price": "172.5300"}}"#;
        let (symbol, price) = parse(body).unwrap().unwrap();
        assert_eq!(symbol, "IBM");
        assert_eq!(price, Decimal::new(17253, 2));
    }

    #[test]
    fn empty_quote_means_unknown_symbol() {
        assert!(parse(r#"{"Global Quote": {}}"#).unwrap().is_none());
        assert!(parse(r#"{}"#).unwrap().is_none());
    }

    #[test]
    fn throttling_note_is_an_error() {
        let body = r#"{"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}"#;
        assert!(matches!(parse(body), Err(AppError::QuoteService(_))));
    }

    #[test]
    fn unparseable_price_is_an_error() {
        let body = r#"{"Global Quote": {"01. symbol": "IBM", "05. price": "n/a"}}"#;
        assert!(matches!(parse(body), Err(AppError::QuoteService(_))));
    }
}
