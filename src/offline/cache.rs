use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

use super::network::{Response, ResponseKind};
use super::OfflineError;
use crate::storage::StorageHandle;

/// Named buckets of cached responses keyed by request URL.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the bucket if it does not exist yet.
    async fn open(&self, name: &str) -> Result<(), OfflineError>;

    async fn has(&self, name: &str) -> Result<bool, OfflineError>;

    /// Bucket names in creation order.
    async fn keys(&self) -> Result<Vec<String>, OfflineError>;

    async fn delete(&self, name: &str) -> Result<bool, OfflineError>;

    /// First match for `url` across all buckets, oldest bucket first.
    async fn match_any(&self, url: &str) -> Result<Option<Response>, OfflineError>;

    async fn put(&self, name: &str, url: &str, response: &Response) -> Result<(), OfflineError>;

    /// Stores every entry or none of them.
    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(String, Response)>,
    ) -> Result<(), OfflineError>;
}

#[derive(Default)]
pub struct MemoryCacheStorage {
    buckets: RwLock<IndexMap<String, IndexMap<String, Response>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_count(&self, name: &str) -> usize {
        self.buckets.read().get(name).map_or(0, IndexMap::len)
    }
}

fn missing_bucket(name: &str) -> OfflineError {
    OfflineError::Cache(anyhow::anyhow!("cache bucket {name} is not open"))
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), OfflineError> {
        self.buckets.write().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, OfflineError> {
        Ok(self.buckets.read().contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>, OfflineError> {
        Ok(self.buckets.read().keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool, OfflineError> {
        Ok(self.buckets.write().shift_remove(name).is_some())
    }

    async fn match_any(&self, url: &str) -> Result<Option<Response>, OfflineError> {
        Ok(self
            .buckets
            .read()
            .values()
            .find_map(|bucket| bucket.get(url).cloned()))
    }

    async fn put(&self, name: &str, url: &str, response: &Response) -> Result<(), OfflineError> {
        let mut buckets = self.buckets.write();
        let bucket = buckets.get_mut(name).ok_or_else(|| missing_bucket(name))?;
        bucket.insert(url.to_string(), response.clone());
        Ok(())
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(String, Response)>,
    ) -> Result<(), OfflineError> {
        let mut buckets = self.buckets.write();
        let bucket = buckets.get_mut(name).ok_or_else(|| missing_bucket(name))?;
        bucket.extend(entries);
        Ok(())
    }
}

/// Buckets stored in the application database next to the key/value data.
#[derive(Clone)]
pub struct SqliteCacheStorage {
    storage: StorageHandle,
}

impl SqliteCacheStorage {
    pub fn new(storage: StorageHandle) -> Self {
        Self { storage }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, OfflineError>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.with_connection(f))
            .await
            .map_err(|err| OfflineError::Cache(anyhow::anyhow!("cache task failed: {err}")))?
            .map_err(OfflineError::Cache)
    }
}

fn insert_entry(conn: &Connection, name: &str, url: &str, response: &Response) -> anyhow::Result<()> {
    let headers = serde_json::to_string(&response.headers).context("encoding headers")?;
    conn.execute(
        "INSERT INTO cache_entries (bucket, url, status, kind, headers, body, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(bucket, url) DO UPDATE SET status = excluded.status,
                                                kind = excluded.kind,
                                                headers = excluded.headers,
                                                body = excluded.body,
                                                stored_at = excluded.stored_at",
        params![
            name,
            url,
            response.status,
            response.kind.as_ref(),
            headers,
            response.body,
            OffsetDateTime::now_utc().unix_timestamp()
        ],
    )
    .with_context(|| format!("storing {url} in {name}"))?;
    Ok(())
}

fn bucket_exists(conn: &Connection, name: &str) -> anyhow::Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM cache_buckets WHERE name = ?1",
            [name],
            |_| Ok(()),
        )
        .optional()
        .with_context(|| format!("looking up bucket {name}"))?;
    Ok(found.is_some())
}

#[async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn open(&self, name: &str) -> Result<(), OfflineError> {
        let name = name.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO cache_buckets (name, created_at) VALUES (?1, ?2)",
                params![name, OffsetDateTime::now_utc().unix_timestamp()],
            )
            .with_context(|| format!("opening bucket {name}"))?;
            Ok(())
        })
        .await
    }

    async fn has(&self, name: &str) -> Result<bool, OfflineError> {
        let name = name.to_string();
        self.blocking(move |conn| bucket_exists(conn, &name)).await
    }

    async fn keys(&self) -> Result<Vec<String>, OfflineError> {
        self.blocking(|conn| {
            let mut stmt = conn
                .prepare("SELECT name FROM cache_buckets ORDER BY created_at, rowid")
                .context("listing buckets")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<bool, OfflineError> {
        let name = name.to_string();
        self.blocking(move |conn| {
            let removed = conn
                .execute("DELETE FROM cache_buckets WHERE name = ?1", [&name])
                .with_context(|| format!("deleting bucket {name}"))?;
            Ok(removed > 0)
        })
        .await
    }

    async fn match_any(&self, url: &str) -> Result<Option<Response>, OfflineError> {
        let url = url.to_string();
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT e.status, e.kind, e.headers, e.body
                     FROM cache_entries e
                     JOIN cache_buckets b ON b.name = e.bucket
                     WHERE e.url = ?1
                     ORDER BY b.created_at, b.rowid
                     LIMIT 1",
                    [&url],
                    |row| {
                        Ok((
                            row.get::<_, u16>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Vec<u8>>(3)?,
                        ))
                    },
                )
                .optional()
                .with_context(|| format!("matching {url}"))?;
            let Some((status, kind, headers, body)) = row else {
                return Ok(None);
            };
            let kind = ResponseKind::from_str(&kind)
                .with_context(|| format!("unknown response kind {kind}"))?;
            let headers = serde_json::from_str(&headers).context("decoding headers")?;
            Ok(Some(Response {
                url,
                status,
                kind,
                headers,
                body,
            }))
        })
        .await
    }

    async fn put(&self, name: &str, url: &str, response: &Response) -> Result<(), OfflineError> {
        let (name, url, response) = (name.to_string(), url.to_string(), response.clone());
        self.blocking(move |conn| {
            if !bucket_exists(conn, &name)? {
                anyhow::bail!("cache bucket {name} is not open");
            }
            insert_entry(conn, &name, &url, &response)
        })
        .await
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(String, Response)>,
    ) -> Result<(), OfflineError> {
        let name = name.to_string();
        self.blocking(move |conn| {
            if !bucket_exists(conn, &name)? {
                anyhow::bail!("cache bucket {name} is not open");
            }
            let tx = conn
                .unchecked_transaction()
                .context("starting cache transaction")?;
            for (url, response) in &entries {
                insert_entry(&tx, &name, url, response)?;
            }
            tx.commit().context("committing cache entries")?;
            Ok(())
        })
        .await
    }
}
