//! Key-value primitives (strings with expiry, sets, hashes) on SQLite.
//!
//! The primitive functions take a plain `&Connection` so they compose inside
//! a [`KvStore::transaction`] as well as in single-statement calls.

use anyhow::{anyhow, Context};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task;

use crate::storage_layout::{ensure_parent_dir, open_connection};

#[derive(Debug, Clone)]
pub struct KvStore {
    db_path: PathBuf,
}

impl KvStore {
    pub fn initialize(db_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let db_path = db_path.into();
        ensure_parent_dir(&db_path)?;

        let conn = open_connection(&db_path)
            .with_context(|| format!("Failed to open key-value database: {}", db_path.display()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_strings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at INTEGER NULL
            );

            CREATE TABLE IF NOT EXISTS kv_sets (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
            );

            CREATE TABLE IF NOT EXISTS kv_hashes (
                key TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, field)
            );

            CREATE INDEX IF NOT EXISTS idx_kv_strings_expires_at
                ON kv_strings(expires_at);
            "#,
        )
        .context("Failed to initialize key-value schema")?;

        Ok(Self { db_path })
    }

    pub async fn get(&self, key: impl Into<String>) -> anyhow::Result<Option<String>> {
        let key = key.into();
        self.with_connection(move |conn| get(conn, &key)).await
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) -> anyhow::Result<()> {
        let (key, value) = (key.into(), value.into());
        self.with_connection(move |conn| set(conn, &key, &value))
            .await
    }

    pub async fn set_nx_ex(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) -> anyhow::Result<bool> {
        let (key, value) = (key.into(), value.into());
        self.with_connection(move |conn| set_nx_ex(conn, &key, &value, ttl))
            .await
    }

    pub async fn incr(&self, key: impl Into<String>) -> anyhow::Result<i64> {
        let key = key.into();
        self.with_connection(move |conn| incr(conn, &key)).await
    }

    pub async fn sadd(
        &self,
        key: impl Into<String>,
        member: impl Into<String>,
    ) -> anyhow::Result<bool> {
        let (key, member) = (key.into(), member.into());
        self.with_connection(move |conn| sadd(conn, &key, &member))
            .await
    }

    pub async fn smembers(&self, key: impl Into<String>) -> anyhow::Result<Vec<String>> {
        let key = key.into();
        self.with_connection(move |conn| smembers(conn, &key)).await
    }

    pub async fn hset(
        &self,
        key: impl Into<String>,
        fields: Vec<(String, String)>,
    ) -> anyhow::Result<()> {
        let key = key.into();
        self.transaction(move |conn| hset(conn, &key, &fields)).await
    }

    pub async fn hgetall(&self, key: impl Into<String>) -> anyhow::Result<BTreeMap<String, String>> {
        let key = key.into();
        self.with_connection(move |conn| hgetall(conn, &key)).await
    }

    /// Run `task_fn` inside one IMMEDIATE transaction, committing on `Ok`.
    pub async fn transaction<F, T>(&self, task_fn: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_blocking(move |db_path| {
            let mut conn = open_connection(&db_path)?;
            let tx = conn
                .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                .context("Failed to begin key-value transaction")?;
            let value = task_fn(&*tx)?;
            tx.commit().context("Failed to commit key-value transaction")?;
            Ok(value)
        })
        .await
    }

    /// Run read-only `task_fn` inside one deferred transaction, so several
    /// reads see the same snapshot without taking the write lock.
    pub async fn read<F, T>(&self, task_fn: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_connection(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .context("Failed to begin key-value read")?;
            let value = task_fn(&*tx)?;
            tx.finish().context("Failed to end key-value read")?;
            Ok(value)
        })
        .await
    }

    async fn with_connection<F, T>(&self, task_fn: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run_blocking(move |db_path| {
            let conn = open_connection(&db_path)?;
            task_fn(&conn)
        })
        .await
    }

    async fn run_blocking<F, T>(&self, task_fn: F) -> anyhow::Result<T>
    where
        F: FnOnce(PathBuf) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        task::spawn_blocking(move || task_fn(db_path))
            .await
            .map_err(|err| anyhow!("Key-value storage worker failed: {err}"))?
    }
}

pub fn get(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM kv_strings
         WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
        params![key, now_unix_millis_i64()],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("Failed to read key {key}"))
}

/// Store `value` without expiry, replacing any previous value and TTL.
pub fn set(conn: &Connection, key: &str, value: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO kv_strings (key, value, expires_at) VALUES (?1, ?2, NULL)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = NULL",
        params![key, value],
    )
    .with_context(|| format!("Failed to write key {key}"))?;
    Ok(())
}

/// Set `key` only if it is absent or expired. Returns whether it was set.
pub fn set_nx_ex(conn: &Connection, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
    let now = now_unix_millis_i64();
    purge_expired(conn, key, now)?;
    let ttl_ms = i64::try_from(ttl.as_millis()).context("TTL overflow")?;
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO kv_strings (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, now.saturating_add(ttl_ms)],
        )
        .with_context(|| format!("Failed to write key {key}"))?;
    Ok(inserted == 1)
}

/// Increment the integer at `key`, treating absent or expired as zero.
/// An existing expiry is kept.
pub fn incr(conn: &Connection, key: &str) -> anyhow::Result<i64> {
    purge_expired(conn, key, now_unix_millis_i64())?;
    let current = match get(conn, key)? {
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .with_context(|| format!("Value at {key} is not an integer"))?,
        None => 0,
    };
    let next = current
        .checked_add(1)
        .ok_or_else(|| anyhow!("Increment overflow at {key}"))?;
    conn.execute(
        "INSERT INTO kv_strings (key, value, expires_at) VALUES (?1, ?2, NULL)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, next.to_string()],
    )
    .with_context(|| format!("Failed to increment key {key}"))?;
    Ok(next)
}

pub fn sadd(conn: &Connection, key: &str, member: &str) -> anyhow::Result<bool> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO kv_sets (key, member) VALUES (?1, ?2)",
            params![key, member],
        )
        .with_context(|| format!("Failed to add member to set {key}"))?;
    Ok(inserted == 1)
}

pub fn smembers(conn: &Connection, key: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT member FROM kv_sets WHERE key = ?1 ORDER BY member")?;
    let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
    let mut members = Vec::new();
    for row in rows {
        members.push(row?);
    }
    Ok(members)
}

pub fn hset(conn: &Connection, key: &str, fields: &[(String, String)]) -> anyhow::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO kv_hashes (key, field, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
    )?;
    for (field, value) in fields {
        stmt.execute(params![key, field, value])
            .with_context(|| format!("Failed to write field {field} of hash {key}"))?;
    }
    Ok(())
}

pub fn hgetall(conn: &Connection, key: &str) -> anyhow::Result<BTreeMap<String, String>> {
    let mut stmt = conn.prepare("SELECT field, value FROM kv_hashes WHERE key = ?1")?;
    let rows = stmt.query_map(params![key], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut fields = BTreeMap::new();
    for row in rows {
        let (field, value) = row?;
        fields.insert(field, value);
    }
    Ok(fields)
}

fn purge_expired(conn: &Connection, key: &str, now: i64) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM kv_strings WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
        params![key, now],
    )
    .with_context(|| format!("Failed to purge expired key {key}"))?;
    Ok(())
}

fn now_unix_millis_i64() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::KvStore;
    use std::path::PathBuf;
    use uuid::Uuid;

    /// A store in a throwaway directory, removed on drop.
    pub struct TempKv {
        pub store: KvStore,
        dir: PathBuf,
    }

    impl TempKv {
        pub fn new() -> Self {
            let dir = std::env::temp_dir().join(format!("folio-kv-test-{}", Uuid::new_v4()));
            let store = KvStore::initialize(dir.join("folio.sqlite3")).expect("kv store");
            Self { store, dir }
        }

        pub fn db_path(&self) -> PathBuf {
            self.dir.join("folio.sqlite3")
        }
    }

    impl Drop for TempKv {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::TempKv;
    use super::*;

    #[tokio::test]
    async fn strings_round_trip_and_overwrite() {
        let kv = TempKv::new();
        assert_eq!(kv.store.get("missing").await.unwrap(), None);

        kv.store.set("greeting", "hola").await.unwrap();
        kv.store.set("greeting", "hello").await.unwrap();
        assert_eq!(
            kv.store.get("greeting").await.unwrap().as_deref(),
            Some("hello")
        );
    }

    #[tokio::test]
    async fn set_nx_ex_only_sets_once_until_expiry() {
        let kv = TempKv::new();
        let ttl = Duration::from_millis(50);

        assert!(kv.store.set_nx_ex("dedup", "1", ttl).await.unwrap());
        assert!(!kv.store.set_nx_ex("dedup", "1", ttl).await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(kv.store.get("dedup").await.unwrap(), None);
        assert!(kv.store.set_nx_ex("dedup", "1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn incr_starts_from_zero_and_rejects_non_integers() {
        let kv = TempKv::new();
        assert_eq!(kv.store.incr("views:a").await.unwrap(), 1);
        assert_eq!(kv.store.incr("views:a").await.unwrap(), 2);

        kv.store.set("views:b", "not a number").await.unwrap();
        assert!(kv.store.incr("views:b").await.is_err());
    }

    #[tokio::test]
    async fn sets_ignore_duplicates() {
        let kv = TempKv::new();
        assert!(kv.store.sadd("index", "b").await.unwrap());
        assert!(kv.store.sadd("index", "a").await.unwrap());
        assert!(!kv.store.sadd("index", "b").await.unwrap());

        assert_eq!(kv.store.smembers("index").await.unwrap(), vec!["a", "b"]);
        assert!(kv.store.smembers("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hashes_merge_fields() {
        let kv = TempKv::new();
        kv.store
            .hset(
                "meta",
                vec![
                    ("timestamp".to_string(), "t1".to_string()),
                    ("preview".to_string(), "hi".to_string()),
                ],
            )
            .await
            .unwrap();
        kv.store
            .hset("meta", vec![("timestamp".to_string(), "t2".to_string())])
            .await
            .unwrap();

        let fields = kv.store.hgetall("meta").await.unwrap();
        assert_eq!(fields.get("timestamp").map(String::as_str), Some("t2"));
        assert_eq!(fields.get("preview").map(String::as_str), Some("hi"));
    }

    #[tokio::test]
    async fn failed_transaction_rolls_back() {
        let kv = TempKv::new();
        let result: anyhow::Result<()> = kv
            .store
            .transaction(|conn| {
                set(conn, "partial", "written")?;
                Err(anyhow!("abort"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(kv.store.get("partial").await.unwrap(), None);
    }
}
