//! Short handles for submitted URLs.
//!
//! Handles are derived from the URL itself (`base64url(md5(url))[..12]`), so
//! storing the same URL twice yields the same handle. Truncation means two
//! different URLs can collide; the later one wins.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

pub const HANDLE_LEN: usize = 12;
pub const FALLBACK_HANDLE: &str = "default";

#[derive(Debug, Clone)]
struct Entry {
    url: String,
    stored_at: DateTime<Utc>,
}

/// Process-wide handle → URL map with TTL and capacity eviction.
#[derive(Debug, Clone)]
pub struct UrlRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    ttl_seconds: i64,
    capacity: usize,
}

impl UrlRegistry {
    pub fn new(ttl_seconds: i64, capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl_seconds,
            capacity: capacity.max(1),
        }
    }

    pub async fn store(&self, url: &str) -> String {
        self.store_at(url, Utc::now()).await
    }

    pub async fn resolve(&self, id: &str) -> Option<String> {
        self.resolve_at(id, Utc::now()).await
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub(crate) async fn store_at(&self, url: &str, now: DateTime<Utc>) -> String {
        let id = url_handle(url);
        let mut entries = self.entries.lock().await;
        self.prune(&mut entries, now);
        entries.insert(
            id.clone(),
            Entry {
                url: url.to_string(),
                stored_at: now,
            },
        );
        self.trim(&mut entries);
        debug!(id = %id, size = entries.len(), "Stored URL handle");
        id
    }

    pub(crate) async fn resolve_at(&self, id: &str, now: DateTime<Utc>) -> Option<String> {
        let mut entries = self.entries.lock().await;
        self.prune(&mut entries, now);
        entries.get(id).map(|entry| entry.url.clone())
    }

    fn prune(&self, entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) {
        entries.retain(|_, entry| (now - entry.stored_at).num_seconds() <= self.ttl_seconds);
    }

    fn trim(&self, entries: &mut HashMap<String, Entry>) {
        if entries.len() <= self.capacity {
            return;
        }

        let overflow = entries.len() - self.capacity;
        let mut oldest = entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.stored_at))
            .collect::<Vec<_>>();
        oldest.sort_by_key(|(_, stored_at)| *stored_at);

        for (id, _) in oldest.into_iter().take(overflow) {
            entries.remove(&id);
        }
    }
}

/// Fixed-width URL-safe token for `url`.
pub fn url_handle(url: &str) -> String {
    let digest = md5::compute(url.as_bytes());
    let encoded = URL_SAFE.encode(digest.0);
    encoded
        .get(..HANDLE_LEN)
        .unwrap_or(FALLBACK_HANDLE)
        .to_string()
}
