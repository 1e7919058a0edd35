// src/api.rs
use crate::auth::{clear_session_cookie, require_user, with_auth, Authenticator};
use crate::db::Database;
use crate::error::{handle_rejection, AppError, Result};
use crate::models::{normalize_symbol, Quote};
use crate::portfolio::Portfolio;
use crate::quote::QuoteSource;
use crate::views::{self, Flash};
use log::info;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::header::{self, HeaderMap, HeaderValue};
use warp::http::StatusCode;
use warp::hyper::Body;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const FLASH_COOKIE: &str = "flash";
const MAX_FORM_BYTES: u64 = 16 * 1024;

#[derive(Deserialize, Default)]
#[serde(default)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RegisterForm {
    username: String,
    password: String,
    confirmation: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct TradeForm {
    symbol: String,
    shares: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct QuoteForm {
    symbol: String,
}

/// The full application: routes, error pages, no-cache headers and request logging.
pub fn app(
    db: Database,
    quotes: Arc<dyn QuoteSource>,
    auth: Arc<Authenticator>,
    starting_cash: Decimal,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let mut no_cache = HeaderMap::new();
    no_cache.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    no_cache.insert(header::EXPIRES, HeaderValue::from_static("0"));
    no_cache.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));

    routes(db, quotes, auth, starting_cash)
        .recover(handle_rejection)
        .with(warp::reply::with::headers(no_cache))
        .with(warp::log("stock_trader"))
}

pub fn routes(
    db: Database,
    quotes: Arc<dyn QuoteSource>,
    auth: Arc<Authenticator>,
    starting_cash: Decimal,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .and(require_user(auth.clone(), db.clone()))
        .and(flash())
        .and(with_db(db.clone()))
        .and(with_quotes(quotes.clone()))
        .and_then(index_handler);

    let buy_form = warp::path!("buy")
        .and(warp::get())
        .and(require_user(auth.clone(), db.clone()))
        .and(flash())
        .and_then(buy_form_handler);

    let buy = warp::path!("buy")
        .and(warp::post())
        .and(require_user(auth.clone(), db.clone()))
        .and(form_body::<TradeForm>())
        .and(with_db(db.clone()))
        .and(with_quotes(quotes.clone()))
        .and_then(buy_handler);

    let history = warp::path!("history")
        .and(warp::get())
        .and(require_user(auth.clone(), db.clone()))
        .and(with_db(db.clone()))
        .and_then(history_handler);

    let login_form = warp::path!("login")
        .and(warp::get())
        .and(flash())
        .and_then(login_form_handler);

    let login = warp::path!("login")
        .and(warp::post())
        .and(form_body::<LoginForm>())
        .and(with_db(db.clone()))
        .and(with_auth(auth.clone()))
        .and_then(login_handler);

    let logout = warp::path!("logout")
        .and(warp::get())
        .and_then(logout_handler);

    let quote_form = warp::path!("quote")
        .and(warp::get())
        .and(require_user(auth.clone(), db.clone()))
        .and_then(quote_form_handler);

    let quote = warp::path!("quote")
        .and(warp::post())
        .and(require_user(auth.clone(), db.clone()))
        .and(form_body::<QuoteForm>())
        .and(with_quotes(quotes.clone()))
        .and_then(quote_handler);

    let register_form = warp::path!("register")
        .and(warp::get())
        .and_then(register_form_handler);

    let register = warp::path!("register")
        .and(warp::post())
        .and(form_body::<RegisterForm>())
        .and(with_db(db.clone()))
        .and(with_auth(auth.clone()))
        .and(warp::any().map(move || starting_cash))
        .and_then(register_handler);

    let sell_form = warp::path!("sell")
        .and(warp::get())
        .and(require_user(auth.clone(), db.clone()))
        .and(with_db(db.clone()))
        .and_then(sell_form_handler);

    let sell = warp::path!("sell")
        .and(warp::post())
        .and(require_user(auth, db.clone()))
        .and(form_body::<TradeForm>())
        .and(with_db(db))
        .and(with_quotes(quotes))
        .and_then(sell_handler);

    index
        .or(buy_form)
        .or(buy)
        .or(history)
        .or(login_form)
        .or(login)
        .or(logout)
        .or(quote_form)
        .or(quote)
        .or(register_form)
        .or(register)
        .or(sell_form)
        .or(sell)
}

fn with_db(db: Database) -> impl Filter<Extract = (Database,), Error = Infallible> + Clone {
    warp::any().map(move || db.clone())
}

fn with_quotes(
    quotes: Arc<dyn QuoteSource>,
) -> impl Filter<Extract = (Arc<dyn QuoteSource>,), Error = Infallible> + Clone {
    warp::any().map(move || quotes.clone())
}

fn flash() -> impl Filter<Extract = (Option<Flash>,), Error = Infallible> + Clone {
    warp::cookie::optional::<Flash>(FLASH_COOKIE)
}

fn form_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send + 'static,
{
    warp::body::content_length_limit(MAX_FORM_BYTES).and(warp::body::form())
}

// ---------- handlers ----------

async fn index_handler(
    user_id: i64,
    flash: Option<Flash>,
    db: Database,
    quotes: Arc<dyn QuoteSource>,
) -> std::result::Result<Response, Rejection> {
    if db.transaction_count(user_id).await? == 0 {
        return Ok(redirect("/buy", &[])?);
    }
    let portfolio = Portfolio::for_user(&db, user_id, quotes.as_ref()).await?;
    Ok(page(views::index(&portfolio, flash), flash.is_some()))
}

async fn buy_form_handler(
    _user_id: i64,
    flash: Option<Flash>,
) -> std::result::Result<Response, Rejection> {
    Ok(page(views::buy_form(flash), flash.is_some()))
}

async fn buy_handler(
    user_id: i64,
    form: TradeForm,
    db: Database,
    quotes: Arc<dyn QuoteSource>,
) -> std::result::Result<Response, Rejection> {
    let shares = parse_shares(&form.shares)?;
    let symbol = required_symbol(&form.symbol)?;
    let quote = lookup(quotes.as_ref(), &symbol).await?;

    let tx = db
        .record_purchase(user_id, &quote.symbol, shares, quote.price)
        .await?;
    info!(
        "User {} bought {} {} for {}",
        user_id, tx.shares, tx.symbol, tx.total
    );
    Ok(redirect("/", &[flash_cookie(Flash::Bought)])?)
}

async fn history_handler(user_id: i64, db: Database) -> std::result::Result<Response, Rejection> {
    let transactions = db.history(user_id).await?;
    Ok(page(views::history(&transactions), false))
}

/// Visiting the login page forgets any current session.
async fn login_form_handler(flash: Option<Flash>) -> std::result::Result<Response, Rejection> {
    let mut response = page(views::login(flash), flash.is_some());
    let cleared = HeaderValue::try_from(clear_session_cookie())
        .map_err(|e| AppError::from(warp::http::Error::from(e)))?;
    response.headers_mut().append(header::SET_COOKIE, cleared);
    Ok(response)
}

async fn login_handler(
    form: LoginForm,
    db: Database,
    auth: Arc<Authenticator>,
) -> std::result::Result<Response, Rejection> {
    let username = form.username.trim();
    if username.is_empty() {
        return Err(AppError::apology("must provide username", StatusCode::FORBIDDEN).into());
    }
    if form.password.is_empty() {
        return Err(AppError::apology("must provide password", StatusCode::FORBIDDEN).into());
    }

    let user = match db.find_user_by_username(username).await? {
        Some(user) if auth.verify_password(&form.password, &user.hash) => user,
        _ => {
            return Err(AppError::apology(
                "invalid username and/or password",
                StatusCode::FORBIDDEN,
            )
            .into())
        }
    };

    info!("User {} logged in", user.id);
    let session = auth.session_cookie(user.id)?;
    Ok(redirect("/", &[session, flash_cookie(Flash::Welcome)])?)
}

async fn logout_handler() -> std::result::Result<Response, Rejection> {
    Ok(redirect(
        "/",
        &[clear_session_cookie(), flash_cookie(Flash::LoggedOut)],
    )?)
}

async fn quote_form_handler(_user_id: i64) -> std::result::Result<Response, Rejection> {
    Ok(page(views::quote_form(), false))
}

async fn quote_handler(
    _user_id: i64,
    form: QuoteForm,
    quotes: Arc<dyn QuoteSource>,
) -> std::result::Result<Response, Rejection> {
    let symbol = required_symbol(&form.symbol)?;
    let quote = lookup(quotes.as_ref(), &symbol).await?;
    Ok(page(views::quoted(&quote), false))
}

async fn register_form_handler() -> std::result::Result<Response, Rejection> {
    Ok(page(views::register(), false))
}

async fn register_handler(
    form: RegisterForm,
    db: Database,
    auth: Arc<Authenticator>,
    starting_cash: Decimal,
) -> std::result::Result<Response, Rejection> {
    let username = form.username.trim();
    if username.is_empty() || form.password.is_empty() || form.confirmation.is_empty() {
        return Err(AppError::apology("input cannot be blank", StatusCode::LENGTH_REQUIRED).into());
    }
    if form.password != form.confirmation {
        return Err(AppError::apology(
            "password and confirmation do not match",
            StatusCode::CONFLICT,
        )
        .into());
    }

    let hash = auth.hash_password(&form.password)?;
    let user_id = db.create_user(username, &hash, starting_cash).await?;
    let session = auth.session_cookie(user_id)?;
    Ok(redirect("/", &[session, flash_cookie(Flash::Registered)])?)
}

async fn sell_form_handler(user_id: i64, db: Database) -> std::result::Result<Response, Rejection> {
    let symbols = db.owned_symbols(user_id).await?;
    Ok(page(views::sell_form(&symbols), false))
}

async fn sell_handler(
    user_id: i64,
    form: TradeForm,
    db: Database,
    quotes: Arc<dyn QuoteSource>,
) -> std::result::Result<Response, Rejection> {
    let symbol = required_symbol(&form.symbol)?;
    let shares = parse_shares(&form.shares)?;
    if i64::from(shares) > db.shares_held(user_id, &symbol).await? {
        return Err(AppError::InsufficientShares.into());
    }
    let quote = lookup(quotes.as_ref(), &symbol).await?;

    let tx = db
        .record_sale(user_id, &quote.symbol, shares, quote.price)
        .await?;
    info!(
        "User {} sold {} {} for {}",
        user_id, tx.shares, tx.symbol, tx.total
    );
    Ok(redirect("/", &[flash_cookie(Flash::Sold)])?)
}

// ---------- helpers ----------

fn required_symbol(raw: &str) -> Result<String> {
    let symbol = normalize_symbol(raw);
    if symbol.is_empty() {
        return Err(AppError::apology("must provide symbol", StatusCode::CONFLICT));
    }
    Ok(symbol)
}

/// Share counts must be positive whole numbers.
fn parse_shares(raw: &str) -> Result<u32> {
    let raw = raw.trim();
    let invalid = || AppError::apology("# of shares has to be a positive integer", StatusCode::CONFLICT);
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match raw.parse::<u32>() {
        Ok(shares) if shares > 0 => Ok(shares),
        _ => Err(invalid()),
    }
}

async fn lookup(quotes: &dyn QuoteSource, symbol: &str) -> Result<Quote> {
    quotes
        .lookup(symbol)
        .await?
        .ok_or_else(|| AppError::apology("invalid symbol", StatusCode::CONFLICT))
}

fn flash_cookie(flash: Flash) -> String {
    format!(
        "{}={}; Path=/; Max-Age=60; SameSite=Lax",
        FLASH_COOKIE,
        flash.code()
    )
}

/// An HTML page, expiring the flash cookie once its message has been shown.
fn page(markup: String, flash_shown: bool) -> Response {
    let mut response = warp::reply::html(markup).into_response();
    if flash_shown {
        response.headers_mut().append(
            header::SET_COOKIE,
            HeaderValue::from_static("flash=; Path=/; Max-Age=0; SameSite=Lax"),
        );
    }
    response
}

fn redirect(location: &'static str, cookies: &[String]) -> Result<Response> {
    let mut builder = warp::http::Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(header::LOCATION, location);
    for cookie in cookies {
        builder = builder.header(header::SET_COOKIE, cookie.as_str());
    }
    Ok(builder.body(Body::empty())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_must_be_positive_integers() {
        assert_eq!(parse_shares("12").unwrap(), 12);
        assert_eq!(parse_shares(" 3 ").unwrap(), 3);
        for bad in ["", "0", "-1", "1.5", "ten", "+4", "99999999999"] {
            let err = parse_shares(bad).unwrap_err();
            assert_eq!(err.status(), StatusCode::CONFLICT, "{:?} accepted", bad);
        }
    }

    #[test]
    fn blank_symbol_is_refused() {
        assert_eq!(required_symbol(" aapl ").unwrap(), "AAPL");
        assert_eq!(required_symbol("  ").unwrap_err().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn redirect_sets_every_cookie() {
        let response = redirect("/", &[flash_cookie(Flash::Sold), clear_session_cookie()]).unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/");
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
    }
}
