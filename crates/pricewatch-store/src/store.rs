//! SQLite-backed record collections.
//!
//! Each logical operation runs in a single transaction so partial writes
//! are never observable. Keyed collections hold JSON values; `coins`
//! additionally materializes the record's `name` field into an indexed
//! column for search. The pending-mutation log uses an AUTOINCREMENT key
//! so ids are monotonic and never reused, across deletes and reloads.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use pricewatch_core::{Alert, Coin, MarketOverview, Mutation, PendingMutation, WatchlistEntry};

use crate::error::{StoreError, StoreResult};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS watchlist (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
    "CREATE TABLE IF NOT EXISTS alerts (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
    "CREATE TABLE IF NOT EXISTS coins (key TEXT PRIMARY KEY, name TEXT NOT NULL DEFAULT '', value TEXT NOT NULL)",
    "CREATE INDEX IF NOT EXISTS idx_coins_name ON coins (name)",
    "CREATE TABLE IF NOT EXISTS market (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
    "CREATE TABLE IF NOT EXISTS pending_mutations (id INTEGER PRIMARY KEY AUTOINCREMENT, value TEXT NOT NULL, enqueued_at INTEGER NOT NULL)",
];

/// Named keyed collections.
///
/// The pending-mutation log is not listed here; it has its own id scheme
/// and its own methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Watchlist,
    Alerts,
    Coins,
    Market,
}

impl Collection {
    fn table(self) -> &'static str {
        match self {
            Self::Watchlist => "watchlist",
            Self::Alerts => "alerts",
            Self::Coins => "coins",
            Self::Market => "market",
        }
    }

    fn upsert_sql(self) -> &'static str {
        match self {
            Self::Coins => {
                "INSERT INTO coins (key, name, value) \
                 VALUES (?1, COALESCE(json_extract(?2, '$.name'), ''), ?2) \
                 ON CONFLICT(key) DO UPDATE SET name = excluded.name, value = excluded.value"
            }
            Self::Watchlist => {
                "INSERT INTO watchlist (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value"
            }
            Self::Alerts => {
                "INSERT INTO alerts (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value"
            }
            Self::Market => {
                "INSERT INTO market (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value"
            }
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

/// The durable local store.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    durable: bool,
}

impl LocalStore {
    /// Open the store at `path`, creating the database if missing.
    ///
    /// On any open error this logs a warning and falls back to an
    /// in-memory database so callers keep a working (non-durable) store.
    /// An error is returned only if even the in-memory engine cannot
    /// start.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        match Self::open_file(path).await {
            Ok(pool) => {
                debug!(path = %path.display(), "Durable store opened");
                Ok(Self {
                    pool,
                    durable: true,
                })
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Store unavailable on disk; continuing in memory (non-durable)"
                );
                Self::open_in_memory().await
            }
        }
    }

    /// Open a purely in-memory store (never durable).
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single connection keeps every reader on the same in-memory db.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::init_schema(&pool).await?;
        Ok(Self {
            pool,
            durable: false,
        })
    }

    async fn open_file(path: &Path) -> Result<SqlitePool, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Corrupt {
                    collection: "open".to_string(),
                    detail: format!("cannot create {}: {e}", parent.display()),
                })?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::init_schema(&pool).await?;
        Ok(pool)
    }

    async fn init_schema(pool: &SqlitePool) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(pool).await?;
        }
        Ok(())
    }

    /// Whether records survive a restart.
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Close the pool, flushing outstanding writes.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ---- keyed collections -------------------------------------------------

    /// All records of a collection, ordered by key.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        collection: Collection,
    ) -> StoreResult<Vec<T>> {
        let sql = format!(
            "SELECT value FROM {} ORDER BY key ASC",
            collection.table()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let value: String = row.try_get("value")?;
            out.push(serde_json::from_str(&value)?);
        }
        Ok(out)
    }

    /// One record by key.
    pub async fn get<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &str,
    ) -> StoreResult<Option<T>> {
        let sql = format!("SELECT value FROM {} WHERE key = ?1", collection.table());
        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => {
                let value: String = row.try_get("value")?;
                Ok(Some(serde_json::from_str(&value)?))
            }
            None => Ok(None),
        }
    }

    /// Insert or overwrite one record.
    pub async fn put<T: Serialize>(
        &self,
        collection: Collection,
        key: &str,
        value: &T,
    ) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        sqlx::query(collection.upsert_sql())
            .bind(key)
            .bind(&json)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert or overwrite several records in one transaction.
    pub async fn put_many<T: Serialize>(
        &self,
        collection: Collection,
        items: &[(String, T)],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in items {
            let json = serde_json::to_string(value)?;
            sqlx::query(collection.upsert_sql())
                .bind(key)
                .bind(&json)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Replace the entire collection atomically.
    pub async fn replace_all<T: Serialize>(
        &self,
        collection: Collection,
        items: &[(String, T)],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let clear = format!("DELETE FROM {}", collection.table());
        sqlx::query(&clear).execute(&mut *tx).await?;
        for (key, value) in items {
            let json = serde_json::to_string(value)?;
            sqlx::query(collection.upsert_sql())
                .bind(key)
                .bind(&json)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete one record by key. Returns whether a record existed.
    pub async fn delete(&self, collection: Collection, key: &str) -> StoreResult<bool> {
        let sql = format!("DELETE FROM {} WHERE key = ?1", collection.table());
        let result = sqlx::query(&sql).bind(key).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every record of a collection.
    pub async fn clear(&self, collection: Collection) -> StoreResult<()> {
        let sql = format!("DELETE FROM {}", collection.table());
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    // ---- typed conveniences ------------------------------------------------

    /// Replace the watchlist snapshot.
    pub async fn replace_watchlist(&self, entries: &[WatchlistEntry]) -> StoreResult<()> {
        let items: Vec<(String, &WatchlistEntry)> =
            entries.iter().map(|e| (e.symbol.clone(), e)).collect();
        self.replace_all(Collection::Watchlist, &items).await
    }

    /// Load the watchlist snapshot, ordered by symbol.
    pub async fn watchlist(&self) -> StoreResult<Vec<WatchlistEntry>> {
        self.get_all(Collection::Watchlist).await
    }

    /// Replace the alerts snapshot.
    pub async fn replace_alerts(&self, alerts: &[Alert]) -> StoreResult<()> {
        let items: Vec<(String, &Alert)> = alerts.iter().map(|a| (a.id.clone(), a)).collect();
        self.replace_all(Collection::Alerts, &items).await
    }

    /// Load the alerts snapshot, ordered by id.
    pub async fn alerts(&self) -> StoreResult<Vec<Alert>> {
        self.get_all(Collection::Alerts).await
    }

    /// Replace the searchable coin list.
    pub async fn replace_coins(&self, coins: &[Coin]) -> StoreResult<()> {
        let items: Vec<(String, &Coin)> = coins.iter().map(|c| (c.symbol.clone(), c)).collect();
        self.replace_all(Collection::Coins, &items).await
    }

    /// Store the market overview under its `"overview"` tag.
    pub async fn put_market_overview(&self, overview: &MarketOverview) -> StoreResult<()> {
        self.put(Collection::Market, "overview", overview).await
    }

    /// Load the market overview, if one was stored.
    pub async fn market_overview(&self) -> StoreResult<Option<MarketOverview>> {
        self.get(Collection::Market, "overview").await
    }

    /// Search coins by symbol or name substring, case-insensitive.
    pub async fn search_coins(&self, query: &str, limit: Option<u32>) -> StoreResult<Vec<Coin>> {
        let pattern = like_pattern(query);
        let limit = i64::from(limit.unwrap_or(50));
        let rows = sqlx::query(
            "SELECT value FROM coins \
             WHERE key LIKE ?1 ESCAPE '\\' OR name LIKE ?1 ESCAPE '\\' \
             ORDER BY key ASC LIMIT ?2",
        )
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let value: String = row.try_get("value")?;
            out.push(serde_json::from_str(&value)?);
        }
        Ok(out)
    }

    // ---- pending-mutation log ----------------------------------------------

    /// Append a mutation to the durable log, returning its assigned id.
    pub async fn append_mutation(&self, mutation: &Mutation) -> StoreResult<i64> {
        let json = serde_json::to_string(mutation)?;
        let result =
            sqlx::query("INSERT INTO pending_mutations (value, enqueued_at) VALUES (?1, ?2)")
                .bind(&json)
                .bind(Utc::now().timestamp_millis())
                .execute(&self.pool)
                .await?;
        Ok(result.last_insert_rowid())
    }

    /// All queued mutations, ordered by id ascending (enqueue order).
    pub async fn pending_mutations(&self) -> StoreResult<Vec<PendingMutation>> {
        let rows =
            sqlx::query("SELECT id, value, enqueued_at FROM pending_mutations ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let value: String = row.try_get("value")?;
            let enqueued_ms: i64 = row.try_get("enqueued_at")?;
            let enqueued_at = DateTime::from_timestamp_millis(enqueued_ms).ok_or_else(|| {
                StoreError::Corrupt {
                    collection: "pending_mutations".to_string(),
                    detail: format!("bad enqueued_at {enqueued_ms} for id {id}"),
                }
            })?;
            out.push(PendingMutation {
                id,
                mutation: serde_json::from_str(&value)?,
                enqueued_at,
            });
        }
        Ok(out)
    }

    /// Remove one mutation after a confirmed replay. Returns whether the
    /// id was present.
    pub async fn remove_mutation(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM pending_mutations WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop the whole log (manual clear). Returns removed count.
    pub async fn clear_mutations(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM pending_mutations")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Number of queued mutations.
    pub async fn pending_count(&self) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pending_mutations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricewatch_core::{AlertCondition, AlertSpec};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    async fn temp_store() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path().join("test.db")).await.unwrap();
        assert!(store.is_durable());
        (dir, store)
    }

    fn coin(symbol: &str, name: &str) -> Coin {
        Coin {
            symbol: symbol.to_string(),
            name: name.to_string(),
            rank: None,
        }
    }

    #[tokio::test]
    async fn test_put_get_delete_round_trip() {
        let (_dir, store) = temp_store().await;
        let entry = WatchlistEntry::new("BTCUSDT");

        store
            .put(Collection::Watchlist, &entry.symbol, &entry)
            .await
            .unwrap();
        let loaded: Option<WatchlistEntry> =
            store.get(Collection::Watchlist, "BTCUSDT").await.unwrap();
        assert_eq!(loaded.unwrap().symbol, "BTCUSDT");

        assert!(store.delete(Collection::Watchlist, "BTCUSDT").await.unwrap());
        assert!(!store.delete(Collection::Watchlist, "BTCUSDT").await.unwrap());
        let all: Vec<WatchlistEntry> = store.get_all(Collection::Watchlist).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_replace_all_removes_stale_keys() {
        let (_dir, store) = temp_store().await;
        store
            .replace_watchlist(&[WatchlistEntry::new("BTCUSDT"), WatchlistEntry::new("ETHUSDT")])
            .await
            .unwrap();
        store
            .replace_watchlist(&[WatchlistEntry::new("SOLUSDT")])
            .await
            .unwrap();

        let all: Vec<WatchlistEntry> = store.get_all(Collection::Watchlist).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].symbol, "SOLUSDT");
    }

    #[tokio::test]
    async fn test_coin_search_matches_symbol_and_name() {
        let (_dir, store) = temp_store().await;
        store
            .replace_coins(&[
                coin("BTCUSDT", "Bitcoin"),
                coin("ETHUSDT", "Ethereum"),
                coin("BCHUSDT", "Bitcoin Cash"),
            ])
            .await
            .unwrap();

        let by_name = store.search_coins("bitcoin", None).await.unwrap();
        assert_eq!(by_name.len(), 2);

        let by_symbol = store.search_coins("ETH", None).await.unwrap();
        assert_eq!(by_symbol.len(), 1);
        assert_eq!(by_symbol[0].name, "Ethereum");

        let limited = store.search_coins("USDT", Some(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_mutation_ids_are_monotonic_and_never_reused() {
        let (_dir, store) = temp_store().await;
        let a = Mutation::AddWatchlist {
            symbol: "SOL".to_string(),
        };
        let b = Mutation::RemoveWatchlist {
            symbol: "DOGE".to_string(),
        };

        let id_a = store.append_mutation(&a).await.unwrap();
        let id_b = store.append_mutation(&b).await.unwrap();
        assert!(id_b > id_a);

        assert!(store.remove_mutation(id_b).await.unwrap());
        let id_c = store.append_mutation(&a).await.unwrap();
        assert!(id_c > id_b, "ids must not be reused after deletion");
    }

    #[tokio::test]
    async fn test_pending_mutations_fifo_order() {
        let (_dir, store) = temp_store().await;
        let first = Mutation::CreateAlert(AlertSpec {
            symbol: "BTCUSDT".to_string(),
            condition: AlertCondition::Above,
            threshold: dec!(50000),
        });
        let second = Mutation::DeleteAlert {
            id: "a-1".to_string(),
        };
        store.append_mutation(&first).await.unwrap();
        store.append_mutation(&second).await.unwrap();

        let pending = store.pending_mutations().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].mutation, first);
        assert_eq!(pending[1].mutation, second);
        assert!(pending[0].id < pending[1].id);
    }

    #[tokio::test]
    async fn test_mutations_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");

        let store = LocalStore::open(&path).await.unwrap();
        store
            .append_mutation(&Mutation::AddWatchlist {
                symbol: "SOL".to_string(),
            })
            .await
            .unwrap();
        store.close().await;

        let reopened = LocalStore::open(&path).await.unwrap();
        let pending = reopened.pending_mutations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            pending[0].mutation,
            Mutation::AddWatchlist {
                symbol: "SOL".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_open_falls_back_to_memory() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        // Parent path is a file, so the on-disk open must fail.
        let store = LocalStore::open(blocker.join("db.sqlite")).await.unwrap();
        assert!(!store.is_durable());

        // Degraded mode still accepts work.
        let id = store
            .append_mutation(&Mutation::AddWatchlist {
                symbol: "SOL".to_string(),
            })
            .await
            .unwrap();
        assert!(id > 0);
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_market_overview_round_trip() {
        let (_dir, store) = temp_store().await;
        assert!(store.market_overview().await.unwrap().is_none());

        let overview = MarketOverview {
            total_market_cap: dec!(1700000000000),
            total_volume_24h: dec!(98000000000),
            btc_dominance: dec!(52.3),
            updated_at: Utc::now(),
        };
        store.put_market_overview(&overview).await.unwrap();
        let loaded = store.market_overview().await.unwrap().unwrap();
        assert_eq!(loaded.btc_dominance, dec!(52.3));
    }
}
