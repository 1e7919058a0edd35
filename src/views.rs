// src/views.rs
//! Server-rendered HTML pages.
use crate::models::{Quote, Transaction};
use crate::portfolio::Portfolio;
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt::Write;
use std::str::FromStr;
use warp::http::StatusCode;

/// One-shot message shown after a redirect, carried in a cookie by code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flash {
    Welcome,
    Registered,
    Bought,
    Sold,
    LoggedOut,
}

impl Flash {
    pub fn code(&self) -> &'static str {
        match self {
            Flash::Welcome => "welcome",
            Flash::Registered => "registered",
            Flash::Bought => "bought",
            Flash::Sold => "sold",
            Flash::LoggedOut => "logged-out",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Flash::Welcome => "Welcome!",
            Flash::Registered => "Registered!",
            Flash::Bought => "Bought!",
            Flash::Sold => "Sold!",
            Flash::LoggedOut => "Logged out.",
        }
    }
}

impl FromStr for Flash {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "welcome" => Ok(Flash::Welcome),
            "registered" => Ok(Flash::Registered),
            "bought" => Ok(Flash::Bought),
            "sold" => Ok(Flash::Sold),
            "logged-out" => Ok(Flash::LoggedOut),
            _ => Err(()),
        }
    }
}

/// Formats an amount as US dollars, e.g. `$1,234.56`.
pub fn usd(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let text = format!("{:.2}", rounded.abs());
    let (whole, cents) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    format!("{}${}.{}", sign, grouped, cents)
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, logged_in: bool, flash: Option<Flash>, main: &str) -> String {
    let nav = if logged_in {
        r#"<ul class="nav">
        <li><a href="/quote">Quote</a></li>
        <li><a href="/buy">Buy</a></li>
        <li><a href="/sell">Sell</a></li>
        <li><a href="/history">History</a></li>
        <li><a href="/logout">Log Out</a></li>
      </ul>"#
    } else {
        r#"<ul class="nav">
        <li><a href="/register">Register</a></li>
        <li><a href="/login">Log In</a></li>
      </ul>"#
    };
    let flash = flash
        .map(|f| format!(r#"<div class="flash" role="alert">{}</div>"#, f.message()))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8">
    <meta name="viewport" content="initial-scale=1, width=device-width">
    <title>Finance: {title}</title>
  </head>
  <body>
    <nav>
      <a class="brand" href="/">Finance</a>
      {nav}
    </nav>
    {flash}
    <main>
{main}
    </main>
  </body>
</html>
"#,
        title = escape(title),
        nav = nav,
        flash = flash,
        main = main
    )
}

pub fn apology(message: &str, status: StatusCode) -> String {
    let main = format!(
        r#"      <h1>{}</h1>
      <p class="apology">Sorry: {}</p>"#,
        status.as_u16(),
        escape(message)
    );
    layout("Apology", false, None, &main)
}

pub fn login(flash: Option<Flash>) -> String {
    layout(
        "Log In",
        false,
        flash,
        r#"      <form action="/login" method="post">
        <input autocomplete="off" autofocus name="username" placeholder="Username" type="text">
        <input name="password" placeholder="Password" type="password">
        <button type="submit">Log In</button>
      </form>"#,
    )
}

pub fn register() -> String {
    layout(
        "Register",
        false,
        None,
        r#"      <form action="/register" method="post">
        <input autocomplete="off" autofocus name="username" placeholder="Username" type="text">
        <input name="password" placeholder="Password" type="password">
        <input name="confirmation" placeholder="Confirm password" type="password">
        <button type="submit">Register</button>
      </form>"#,
    )
}

pub fn quote_form() -> String {
    layout(
        "Quote",
        true,
        None,
        r#"      <form action="/quote" method="post">
        <input autocomplete="off" autofocus name="symbol" placeholder="Symbol" type="text">
        <button type="submit">Quote</button>
      </form>"#,
    )
}

pub fn quoted(quote: &Quote) -> String {
    let main = format!(
        r#"      <p>A share of {} ({}) costs {}.</p>"#,
        escape(&quote.name),
        escape(&quote.symbol),
        usd(quote.price)
    );
    layout("Quoted", true, None, &main)
}

pub fn buy_form(flash: Option<Flash>) -> String {
    layout(
        "Buy",
        true,
        flash,
        r#"      <form action="/buy" method="post">
        <input autocomplete="off" autofocus name="symbol" placeholder="Symbol" type="text">
        <input min="1" name="shares" placeholder="Shares" type="number">
        <button type="submit">Buy</button>
      </form>"#,
    )
}

pub fn sell_form(symbols: &[String]) -> String {
    let mut options = String::new();
    for symbol in symbols {
        let symbol = escape(symbol);
        let _ = writeln!(options, r#"          <option value="{0}">{0}</option>"#, symbol);
    }
    let main = format!(
        r#"      <form action="/sell" method="post">
        <select name="symbol">
          <option disabled selected value="">Symbol</option>
{}        </select>
        <input min="1" name="shares" placeholder="Shares" type="number">
        <button type="submit">Sell</button>
      </form>"#,
        options
    );
    layout("Sell", true, None, &main)
}

pub fn index(portfolio: &Portfolio, flash: Option<Flash>) -> String {
    let mut rows = String::new();
    for row in &portfolio.rows {
        let _ = writeln!(
            rows,
            "          <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&row.symbol),
            escape(&row.name),
            row.shares,
            usd(row.price),
            usd(row.value)
        );
    }
    let main = format!(
        r#"      <table class="portfolio">
        <thead>
          <tr><th>Symbol</th><th>Name</th><th>Shares</th><th>Price</th><th>TOTAL</th></tr>
        </thead>
        <tbody>
{rows}        </tbody>
        <tfoot>
          <tr><td colspan="4">CASH</td><td class="cash">{cash}</td></tr>
          <tr><td colspan="4">TOTAL</td><td class="total">{total}</td></tr>
        </tfoot>
      </table>"#,
        rows = rows,
        cash = usd(portfolio.cash),
        total = usd(portfolio.total)
    );
    layout("Portfolio", true, flash, &main)
}

pub fn history(transactions: &[Transaction]) -> String {
    let mut rows = String::new();
    for tx in transactions {
        let _ = writeln!(
            rows,
            "          <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            tx.kind,
            escape(&tx.symbol),
            usd(tx.price_per_share()),
            tx.shares,
            tx.timestamp.format("%Y-%m-%d"),
            tx.timestamp.format("%H:%M:%S")
        );
    }
    let main = format!(
        r#"      <table class="history">
        <thead>
          <tr><th>Type</th><th>Symbol</th><th>Price</th><th>Shares</th><th>Date</th><th>Time</th></tr>
        </thead>
        <tbody>
{}        </tbody>
      </table>"#,
        rows
    );
    layout("History", true, None, &main)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_groups_thousands() {
        assert_eq!(usd(Decimal::new(123456789, 2)), "$1,234,567.89");
        assert_eq!(usd(Decimal::new(5, 1)), "$0.50");
        assert_eq!(usd(Decimal::new(100000, 0)), "$100,000.00");
        assert_eq!(usd(Decimal::new(-12345, 1)), "-$1,234.50");
        assert_eq!(usd(Decimal::new(-1, 3)), "$0.00");
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape(r#"<b>"AT&T"</b>"#), "&lt;b&gt;&quot;AT&amp;T&quot;&lt;/b&gt;");
    }

    #[test]
    fn flash_codes_parse_back() {
        for flash in [Flash::Welcome, Flash::Registered, Flash::Bought, Flash::Sold, Flash::LoggedOut] {
            assert_eq!(flash.code().parse::<Flash>(), Ok(flash));
        }
        assert!("nope".parse::<Flash>().is_err());
    }

    #[test]
    fn apology_page_shows_status_and_message() {
        let page = apology("not enough <shares>", StatusCode::CONFLICT);
        assert!(page.contains("409"));
        assert!(page.contains("not enough &lt;shares&gt;"));
    }
}
