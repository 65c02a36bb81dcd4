//! Per-slug view counter with per-visitor deduplication.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use folio_core::RetryPolicy;
use tracing::debug;

use crate::kv_store::{self, KvStore};

pub fn views_key(slug: &str) -> String {
    format!("views:{slug}")
}

pub fn dedup_key(unique_id: &str, slug: &str) -> String {
    format!("deduplication:{unique_id}:{slug}")
}

#[derive(Clone)]
pub struct ViewStore {
    kv: Arc<KvStore>,
    dedup_window: Duration,
    retry: RetryPolicy,
}

impl ViewStore {
    pub fn new(kv: Arc<KvStore>, dedup_window: Duration, retry: RetryPolicy) -> Self {
        Self {
            kv,
            dedup_window,
            retry,
        }
    }

    /// Count one view of `slug` by `unique_id` and return the counter.
    ///
    /// A repeat within the dedup window returns the current value unchanged.
    pub async fn increment_view(&self, slug: &str, unique_id: &str) -> anyhow::Result<i64> {
        let kv = &self.kv;
        let ttl = self.dedup_window;
        let views = self
            .retry
            .run("increment_view", move || {
                let slug = slug.to_string();
                let unique_id = unique_id.to_string();
                kv.transaction(move |conn| {
                    let first_view =
                        kv_store::set_nx_ex(conn, &dedup_key(&unique_id, &slug), "1", ttl)?;
                    if first_view {
                        kv_store::incr(conn, &views_key(&slug))
                    } else {
                        read_count(conn, &slug)
                    }
                })
            })
            .await?;

        debug!(slug, views, "View recorded");
        Ok(views)
    }

    pub async fn get_views(&self, slug: &str) -> anyhow::Result<i64> {
        let slug = slug.to_string();
        self.kv.read(move |conn| read_count(conn, &slug)).await
    }

    pub async fn get_multiple_views(&self, slugs: &[String]) -> anyhow::Result<BTreeMap<String, i64>> {
        let slugs = slugs.to_vec();
        self.kv
            .read(move |conn| {
                let mut counts = BTreeMap::new();
                for slug in slugs {
                    let views = read_count(conn, &slug)?;
                    counts.insert(slug, views);
                }
                Ok(counts)
            })
            .await
    }
}

fn read_count(conn: &rusqlite::Connection, slug: &str) -> anyhow::Result<i64> {
    match kv_store::get(conn, &views_key(slug))? {
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .with_context(|| format!("Stored view count for {slug} is not an integer")),
        None => Ok(0),
    }
}
