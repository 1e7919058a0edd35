// src/db.rs
use crate::error::{AppError, Result};
use crate::models::{Holding, TradeKind, Transaction, User};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use rust_decimal::{Decimal, RoundingStrategy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    username     TEXT NOT NULL UNIQUE,
    hash         TEXT NOT NULL,
    cash_cents   INTEGER NOT NULL                 -- balance in cents
);

CREATE TABLE IF NOT EXISTS transactions (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id      INTEGER NOT NULL REFERENCES users(id),
    type         TEXT NOT NULL CHECK (type IN ('purchase', 'sale')),
    shares       INTEGER NOT NULL CHECK (shares > 0),
    symbol       TEXT NOT NULL,
    total_cents  INTEGER NOT NULL,                -- price x shares, in cents
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_user_symbol ON transactions (user_id, symbol);
CREATE INDEX IF NOT EXISTS idx_transactions_type ON transactions (type);
"#;

/// Net shares of one symbol, purchases minus sales.
const SHARES_HELD_SQL: &str = "SELECT COALESCE(SUM(CASE WHEN type = 'purchase' THEN shares ELSE -shares END), 0)
     FROM transactions WHERE user_id = ?1 AND symbol = ?2";

const HOLDINGS_SQL: &str = r#"
SELECT symbol,
       SUM(CASE WHEN type = 'purchase' THEN shares ELSE 0 END) AS bought_shares,
       SUM(CASE WHEN type = 'sale' THEN shares ELSE 0 END)     AS sold_shares
FROM transactions
WHERE user_id = ?1
GROUP BY symbol
HAVING bought_shares - sold_shares > 0
ORDER BY symbol
"#;

/// SQLite-backed store for users and the transaction ledger.
#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the database file at `path`.
    pub async fn open_at_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Opening database at: {:?}", path);

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        info!("SQLite journal mode: {}", mode);

        Self::init(conn, path)
    }

    /// Create an in-memory database instance for testing
    pub async fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        if let Err(e) = conn.execute_batch(SCHEMA) {
            error!("Failed to apply schema: {}", e);
            return Err(e.into());
        }
        info!("Database schema ready");
        Ok(Database {
            connection: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn health_check(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    async fn with_connection<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send,
        R: Send,
    {
        let conn = self.connection.lock().await;
        f(&conn)
    }

    /// Runs `f` inside a SQL transaction; any error rolls it back.
    async fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send,
        R: Send,
    {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    // ---------- users ----------

    pub async fn create_user(&self, username: &str, hash: &str, starting_cash: Decimal) -> Result<i64> {
        let cash_cents = to_cents(starting_cash)?;
        self.with_connection(|conn| {
            match conn.execute(
                "INSERT INTO users (username, hash, cash_cents) VALUES (?1, ?2, ?3)",
                params![username, hash, cash_cents],
            ) {
                Ok(_) => {
                    let id = conn.last_insert_rowid();
                    info!("Registered user {} with id {}", username, id);
                    Ok(id)
                }
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    Err(AppError::UsernameTaken)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.with_connection(|conn| {
            let user = conn
                .query_row(
                    "SELECT id, username, hash, cash_cents FROM users WHERE username = ?1",
                    [username],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        self.with_connection(|conn| {
            let user = conn
                .query_row(
                    "SELECT id, username, hash, cash_cents FROM users WHERE id = ?1",
                    [user_id],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    pub async fn cash(&self, user_id: i64) -> Result<Decimal> {
        self.with_connection(|conn| cash_cents(conn, user_id).map(from_cents))
            .await
    }

    // ---------- trades ----------

    /// Appends a purchase and debits `price x shares` from the user's cash.
    pub async fn record_purchase(
        &self,
        user_id: i64,
        symbol: &str,
        shares: u32,
        price: Decimal,
    ) -> Result<Transaction> {
        let total = trade_total(price, shares);
        let total_cents = to_cents(total)?;
        let now = Utc::now();

        self.transaction(|conn| {
            if total_cents > cash_cents(conn, user_id)? {
                return Err(AppError::InsufficientFunds);
            }
            let id = insert_trade(conn, user_id, TradeKind::Purchase, shares, symbol, total_cents, now)?;
            conn.execute(
                "UPDATE users SET cash_cents = cash_cents - ?1 WHERE id = ?2",
                params![total_cents, user_id],
            )?;
            Ok(Transaction {
                id,
                user_id,
                kind: TradeKind::Purchase,
                shares,
                symbol: symbol.to_string(),
                total,
                timestamp: now,
            })
        })
        .await
    }

    /// Appends a sale and credits `price x shares`. Refused when the user
    /// holds fewer than `shares` of `symbol`.
    pub async fn record_sale(
        &self,
        user_id: i64,
        symbol: &str,
        shares: u32,
        price: Decimal,
    ) -> Result<Transaction> {
        let total = trade_total(price, shares);
        let total_cents = to_cents(total)?;
        let now = Utc::now();

        self.transaction(|conn| {
            cash_cents(conn, user_id)?;
            if i64::from(shares) > shares_held(conn, user_id, symbol)? {
                return Err(AppError::InsufficientShares);
            }
            let id = insert_trade(conn, user_id, TradeKind::Sale, shares, symbol, total_cents, now)?;
            conn.execute(
                "UPDATE users SET cash_cents = cash_cents + ?1 WHERE id = ?2",
                params![total_cents, user_id],
            )?;
            Ok(Transaction {
                id,
                user_id,
                kind: TradeKind::Sale,
                shares,
                symbol: symbol.to_string(),
                total,
                timestamp: now,
            })
        })
        .await
    }

    // ---------- aggregates ----------

    pub async fn shares_held(&self, user_id: i64, symbol: &str) -> Result<i64> {
        self.with_connection(|conn| shares_held(conn, user_id, symbol))
            .await
    }

    /// Current positions, one per symbol with a positive share count.
    pub async fn holdings(&self, user_id: i64) -> Result<Vec<Holding>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(HOLDINGS_SQL)?;
            let rows = stmt.query_map([user_id], |row| {
                let bought_shares: i64 = row.get(1)?;
                let sold_shares: i64 = row.get(2)?;
                Ok(Holding {
                    symbol: row.get(0)?,
                    shares: bought_shares - sold_shares,
                })
            })?;
            let holdings = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(holdings)
        })
        .await
    }

    pub async fn owned_symbols(&self, user_id: i64) -> Result<Vec<String>> {
        Ok(self
            .holdings(user_id)
            .await?
            .into_iter()
            .map(|h| h.symbol)
            .collect())
    }

    pub async fn transaction_count(&self, user_id: i64) -> Result<i64> {
        self.with_connection(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM transactions WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }

    /// Every transaction of the user, oldest first.
    pub async fn history(&self, user_id: i64) -> Result<Vec<Transaction>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, type, shares, symbol, total_cents, created_at
                 FROM transactions WHERE user_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map([user_id], |row| {
                Ok(Transaction {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    kind: row.get(2)?,
                    shares: row.get(3)?,
                    symbol: row.get(4)?,
                    total: from_cents(row.get(5)?),
                    timestamp: row.get(6)?,
                })
            })?;
            let transactions = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(transactions)
        })
        .await
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        hash: row.get(2)?,
        cash: from_cents(row.get(3)?),
    })
}

/// Missing user means a stale session.
fn cash_cents(conn: &Connection, user_id: i64) -> Result<i64> {
    conn.query_row("SELECT cash_cents FROM users WHERE id = ?1", [user_id], |row| {
        row.get(0)
    })
    .optional()?
    .ok_or(AppError::LoginRequired)
}

fn shares_held(conn: &Connection, user_id: i64, symbol: &str) -> Result<i64> {
    let held = conn.query_row(SHARES_HELD_SQL, params![user_id, symbol], |row| row.get(0))?;
    Ok(held)
}

fn insert_trade(
    conn: &Connection,
    user_id: i64,
    kind: TradeKind,
    shares: u32,
    symbol: &str,
    total_cents: i64,
    at: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO transactions (user_id, type, shares, symbol, total_cents, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![user_id, kind, shares, symbol, total_cents, at],
    )?;
    Ok(conn.last_insert_rowid())
}

/// `price x shares`, rounded half away from zero to whole cents.
pub fn trade_total(price: Decimal, shares: u32) -> Decimal {
    (price * Decimal::from(shares)).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub(crate) fn to_cents(amount: Decimal) -> Result<i64> {
    let mut cents = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    cents.rescale(2);
    i64::try_from(cents.mantissa()).map_err(|_| AppError::Amount(amount.to_string()))
}

pub(crate) fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

impl ToSql for TradeKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TradeKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn db_with_user(cash: &str) -> (Database, i64) {
        let _ = env_logger::builder().is_test(true).try_init();
        let db = Database::new_in_memory().await.expect("in-memory database");
        let id = db.create_user("alice", "hash", dec(cash)).await.unwrap();
        (db, id)
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let (db, _) = db_with_user("100.00").await;
        let err = db.create_user("alice", "other", dec("5")).await.unwrap_err();
        assert!(matches!(err, AppError::UsernameTaken));
    }

    #[tokio::test]
    async fn purchase_debits_exact_total_and_appends_row() {
        let (db, id) = db_with_user("1000.00").await;
        let tx = db.record_purchase(id, "AAPL", 3, dec("123.45")).await.unwrap();

        assert_eq!(tx.total, dec("370.35"));
        assert_eq!(db.cash(id).await.unwrap(), dec("629.65"));
        assert_eq!(db.transaction_count(id).await.unwrap(), 1);
        assert_eq!(db.shares_held(id, "AAPL").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn purchase_beyond_cash_is_refused_without_side_effects() {
        let (db, id) = db_with_user("100.00").await;
        let err = db.record_purchase(id, "MSFT", 1, dec("100.01")).await.unwrap_err();

        assert!(matches!(err, AppError::InsufficientFunds));
        assert_eq!(db.cash(id).await.unwrap(), dec("100.00"));
        assert_eq!(db.transaction_count(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purchase_of_entire_balance_is_allowed() {
        let (db, id) = db_with_user("100.00").await;
        db.record_purchase(id, "MSFT", 4, dec("25")).await.unwrap();
        assert_eq!(db.cash(id).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn sale_credits_cash_and_reduces_holding() {
        let (db, id) = db_with_user("1000.00").await;
        db.record_purchase(id, "NFLX", 5, dec("10")).await.unwrap();
        db.record_sale(id, "NFLX", 2, dec("12.50")).await.unwrap();

        assert_eq!(db.cash(id).await.unwrap(), dec("975.00"));
        assert_eq!(db.shares_held(id, "NFLX").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn selling_more_than_held_is_refused() {
        let (db, id) = db_with_user("1000.00").await;
        db.record_purchase(id, "NFLX", 2, dec("10")).await.unwrap();

        let err = db.record_sale(id, "NFLX", 3, dec("10")).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientShares));
        let err = db.record_sale(id, "TSLA", 1, dec("10")).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientShares));
        assert_eq!(db.cash(id).await.unwrap(), dec("980.00"));
    }

    #[tokio::test]
    async fn holdings_aggregate_per_symbol_and_drop_closed_positions() {
        let (db, id) = db_with_user("10000.00").await;
        db.record_purchase(id, "AAPL", 2, dec("100")).await.unwrap();
        db.record_purchase(id, "AAPL", 3, dec("110")).await.unwrap();
        db.record_sale(id, "AAPL", 1, dec("120")).await.unwrap();
        db.record_purchase(id, "GOOG", 1, dec("50")).await.unwrap();
        db.record_sale(id, "GOOG", 1, dec("55")).await.unwrap();

        let holdings = db.holdings(id).await.unwrap();
        assert_eq!(
            holdings,
            vec![Holding {
                symbol: "AAPL".into(),
                shares: 4,
            }]
        );
        assert_eq!(db.owned_symbols(id).await.unwrap(), vec!["AAPL".to_string()]);
    }

    #[tokio::test]
    async fn holdings_are_scoped_to_the_user() {
        let (db, alice) = db_with_user("1000.00").await;
        let bob = db.create_user("bob", "hash", dec("1000")).await.unwrap();
        db.record_purchase(alice, "AAPL", 1, dec("10")).await.unwrap();

        assert!(db.holdings(bob).await.unwrap().is_empty());
        let err = db.record_sale(bob, "AAPL", 1, dec("10")).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientShares));
    }

    #[tokio::test]
    async fn history_lists_trades_oldest_first() {
        let (db, id) = db_with_user("1000.00").await;
        db.record_purchase(id, "AAPL", 2, dec("10")).await.unwrap();
        db.record_sale(id, "AAPL", 1, dec("11")).await.unwrap();

        let history = db.history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, TradeKind::Purchase);
        assert_eq!(history[1].kind, TradeKind::Sale);
        assert_eq!(history[1].total, dec("11.00"));
    }

    #[tokio::test]
    async fn unknown_user_reads_as_stale_session() {
        let db = Database::new_in_memory().await.unwrap();
        assert!(matches!(db.cash(42).await.unwrap_err(), AppError::LoginRequired));
        assert!(db.get_user(42).await.unwrap().is_none());
        assert!(db.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn file_database_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finance.db");
        {
            let db = Database::open_at_path(&path).await.unwrap();
            db.create_user("carol", "hash", dec("10")).await.unwrap();
        }
        let db = Database::open_at_path(&path).await.unwrap();
        let user = db.find_user_by_username("carol").await.unwrap().unwrap();
        assert_eq!(user.cash, dec("10.00"));
    }

    #[test]
    fn cents_conversion_rounds_half_away_from_zero() {
        assert_eq!(to_cents(dec("1.005")).unwrap(), 101);
        assert_eq!(to_cents(dec("7")).unwrap(), 700);
        assert_eq!(from_cents(12345), dec("123.45"));
        assert_eq!(trade_total(dec("0.333"), 3), dec("1.00"));
    }
}
