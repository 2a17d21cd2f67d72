//! Post signatures and the two-tier deduplication cache for LRSF.
//!
//! The signature functions are pure; the cache pairs a bounded in-memory LRU
//! tier with a durable SQLite tier so "have I seen this post" survives
//! restarts. The durable tier is best-effort: storage errors degrade to
//! memory-only operation and are never surfaced to callers.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;
use url::Url;

pub const CRATE_NAME: &str = "lrsf-dedup";

/// Lowercase, collapse whitespace runs to single spaces, trim.
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Content signature over normalized text + author. Sha-256 keeps collisions
/// negligible; the author component keeps empty-text posts from different
/// authors apart.
pub fn content_signature(text: &str, author: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    hasher.update(b"|");
    hasher.update(normalize_text(author).as_bytes());
    format!("txt:{}", hex::encode(hasher.finalize()))
}

/// Canonical URL signature: host + path without query, fragment, scheme or
/// trailing slash, so tracking parameters never split one post in two.
pub fn url_signature(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    match Url::parse(trimmed) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
            let path = parsed.path().trim_end_matches('/');
            format!("url:{host}{path}")
        }
        Err(_) => {
            let cut = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
            format!("url:{}", cut.trim_end_matches('/').to_ascii_lowercase())
        }
    }
}

/// Namespaced passthrough for platform post ids.
pub fn post_id_signature(id: &str) -> String {
    format!("pid:{}", id.trim())
}

/// Select the most stable available identity: post id, then URL, then content
/// hash. Returns an empty string only when every input is empty or blank;
/// callers must treat that as "cannot deduplicate, always process".
pub fn composite_signature(
    url: Option<&str>,
    post_id: Option<&str>,
    text: Option<&str>,
    author: Option<&str>,
) -> String {
    if let Some(id) = post_id.map(str::trim).filter(|s| !s.is_empty()) {
        return post_id_signature(id);
    }
    if let Some(u) = url.map(str::trim).filter(|s| !s.is_empty()) {
        return url_signature(u);
    }
    let text = text.unwrap_or("").trim();
    let author = author.unwrap_or("").trim();
    if text.is_empty() && author.is_empty() {
        return String::new();
    }
    content_signature(text, author)
}

/// One row of the durable tier.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub signature: String,
    pub first_seen: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub source: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub checks: u64,
    pub hits: u64,
    pub additions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.checks == 0 {
            0.0
        } else {
            self.hits as f64 / self.checks as f64
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("opening dedup store {url}: {source}")]
    Open {
        url: String,
        #[source]
        source: sqlx::Error,
    },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Durable tier: signature -> {first_seen, expires_at, source} in SQLite.
/// Upsert semantics keep concurrent marks of the same signature harmless.
#[derive(Debug, Clone)]
pub struct SqliteSeenStore {
    pool: SqlitePool,
}

impl SqliteSeenStore {
    pub async fn open(database_url: &str) -> Result<Self, CacheError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|source| CacheError::Open {
                url: database_url.to_string(),
                source,
            })?
            .create_if_missing(true);
        // A single connection keeps in-memory databases coherent and is
        // plenty for a local cache.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| CacheError::Open {
                url: database_url.to_string(),
                source,
            })?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS seen_posts (
                signature TEXT PRIMARY KEY,
                first_seen INTEGER NOT NULL,
                expires_at INTEGER,
                source TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// True when the signature is present and not expired. Expired rows read
    /// as "not seen" so a stale entry can never discard a fresh post.
    pub async fn contains(&self, signature: &str, now: DateTime<Utc>) -> Result<bool, CacheError> {
        let row = sqlx::query("SELECT expires_at FROM seen_posts WHERE signature = ?1")
            .bind(signature)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        let expires_at: Option<i64> = row.try_get("expires_at")?;
        Ok(match expires_at {
            Some(ts) => ts > now.timestamp(),
            None => true,
        })
    }

    pub async fn upsert(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO seen_posts (signature, first_seen, expires_at, source)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(signature) DO NOTHING",
        )
        .bind(&entry.signature)
        .bind(entry.first_seen.timestamp())
        .bind(entry.expires_at.map(|ts| ts.timestamp()))
        .bind(&entry.source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove(&self, signature: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM seen_posts WHERE signature = ?1")
            .bind(signature)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM seen_posts").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheError> {
        let result = sqlx::query(
            "DELETE FROM seen_posts WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        )
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn len(&self) -> Result<u64, CacheError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM seen_posts")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }
}

/// Strict-capacity LRU over signature strings. HashMap for O(1) membership,
/// BTreeMap recency index for eviction order.
#[derive(Debug)]
struct LruTier {
    capacity: usize,
    entries: HashMap<String, u64>,
    recency: BTreeMap<u64, String>,
    clock: u64,
}

impl LruTier {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
        }
    }

    fn touch(&mut self, signature: &str) -> bool {
        let Some(stamp) = self.entries.get(signature).copied() else {
            return false;
        };
        self.clock += 1;
        self.recency.remove(&stamp);
        self.recency.insert(self.clock, signature.to_string());
        self.entries.insert(signature.to_string(), self.clock);
        true
    }

    fn insert(&mut self, signature: &str) {
        if self.touch(signature) {
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some((&oldest, _)) = self.recency.iter().next() {
                if let Some(evicted) = self.recency.remove(&oldest) {
                    self.entries.remove(&evicted);
                }
            }
        }
        self.clock += 1;
        self.entries.insert(signature.to_string(), self.clock);
        self.recency.insert(self.clock, signature.to_string());
    }

    fn remove(&mut self, signature: &str) {
        if let Some(stamp) = self.entries.remove(signature) {
            self.recency.remove(&stamp);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone)]
pub struct DedupCacheConfig {
    pub memory_capacity: usize,
    pub ttl: Option<Duration>,
    pub source_tag: String,
}

impl Default for DedupCacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 2048,
            ttl: None,
            source_tag: "harvest".to_string(),
        }
    }
}

#[derive(Debug)]
struct MemoryState {
    lru: LruTier,
    stats: CacheStats,
}

/// Two-tier duplicate detector. The memory tier answers most checks; durable
/// hits warm the memory tier so repeated lookups stay fast.
#[derive(Debug)]
pub struct DedupCache {
    memory: Mutex<MemoryState>,
    durable: Option<SqliteSeenStore>,
    ttl: Option<Duration>,
    source_tag: String,
}

impl DedupCache {
    /// Memory-only cache; nothing survives a restart.
    pub fn in_memory(config: DedupCacheConfig) -> Self {
        Self {
            memory: Mutex::new(MemoryState {
                lru: LruTier::new(config.memory_capacity),
                stats: CacheStats::default(),
            }),
            durable: None,
            ttl: config.ttl,
            source_tag: config.source_tag,
        }
    }

    /// Cache backed by a SQLite durable tier. An unreachable store degrades
    /// to memory-only operation rather than failing the pipeline.
    pub async fn open(config: DedupCacheConfig, database_url: &str) -> Self {
        let durable = match SqliteSeenStore::open(database_url).await {
            Ok(store) => Some(store),
            Err(err) => {
                warn!(
                    error = %err,
                    url = database_url,
                    "durable dedup tier unavailable, running memory-only"
                );
                None
            }
        };
        Self {
            memory: Mutex::new(MemoryState {
                lru: LruTier::new(config.memory_capacity),
                stats: CacheStats::default(),
            }),
            durable,
            ttl: config.ttl,
            source_tag: config.source_tag,
        }
    }

    pub fn has_durable_tier(&self) -> bool {
        self.durable.is_some()
    }

    pub async fn is_duplicate(
        &self,
        url: Option<&str>,
        post_id: Option<&str>,
        text: Option<&str>,
        author: Option<&str>,
    ) -> bool {
        let signature = composite_signature(url, post_id, text, author);
        if signature.is_empty() {
            return false;
        }
        self.is_duplicate_signature(&signature).await
    }

    pub async fn is_duplicate_signature(&self, signature: &str) -> bool {
        if signature.is_empty() {
            return false;
        }
        {
            let mut state = self.memory.lock().await;
            state.stats.checks += 1;
            if state.lru.touch(signature) {
                state.stats.hits += 1;
                return true;
            }
        }
        let Some(store) = &self.durable else {
            return false;
        };
        match store.contains(signature, Utc::now()).await {
            Ok(true) => {
                let mut state = self.memory.lock().await;
                state.lru.insert(signature);
                state.stats.hits += 1;
                true
            }
            Ok(false) => false,
            Err(err) => {
                // Ambiguous state defaults to "not a duplicate": re-storing a
                // post is acceptable, silently dropping a new one is not.
                warn!(error = %err, "durable dedup check failed, treating as unseen");
                false
            }
        }
    }

    pub async fn mark_processed(
        &self,
        url: Option<&str>,
        post_id: Option<&str>,
        text: Option<&str>,
        author: Option<&str>,
    ) {
        let signature = composite_signature(url, post_id, text, author);
        if signature.is_empty() {
            return;
        }
        let tag = self.source_tag.clone();
        self.mark_signature(&signature, &tag).await;
    }

    /// Idempotent: marking the same signature twice neither errors nor
    /// duplicates durable rows.
    pub async fn mark_signature(&self, signature: &str, source: &str) {
        if signature.is_empty() {
            return;
        }
        let now = Utc::now();
        {
            let mut state = self.memory.lock().await;
            state.lru.insert(signature);
            state.stats.additions += 1;
        }
        let Some(store) = &self.durable else {
            return;
        };
        let entry = CacheEntry {
            signature: signature.to_string(),
            first_seen: now,
            expires_at: self.ttl.map(|ttl| now + ttl),
            source: source.to_string(),
        };
        if let Err(err) = store.upsert(&entry).await {
            warn!(error = %err, "durable dedup insert failed, entry kept memory-only");
        }
    }

    pub async fn remove(
        &self,
        url: Option<&str>,
        post_id: Option<&str>,
        text: Option<&str>,
        author: Option<&str>,
    ) {
        let signature = composite_signature(url, post_id, text, author);
        if signature.is_empty() {
            return;
        }
        {
            let mut state = self.memory.lock().await;
            state.lru.remove(&signature);
        }
        if let Some(store) = &self.durable {
            if let Err(err) = store.remove(&signature).await {
                warn!(error = %err, "durable dedup remove failed");
            }
        }
    }

    /// Forgets the memory tier only; durable entries still answer true via
    /// the warm-cache path.
    pub async fn clear_memory(&self) {
        let mut state = self.memory.lock().await;
        state.lru.clear();
    }

    pub async fn clear_all(&self) {
        self.clear_memory().await;
        if let Some(store) = &self.durable {
            if let Err(err) = store.clear().await {
                warn!(error = %err, "durable dedup clear failed");
            }
        }
    }

    pub async fn purge_expired(&self) -> u64 {
        let Some(store) = &self.durable else {
            return 0;
        };
        match store.purge_expired(Utc::now()).await {
            Ok(purged) => purged,
            Err(err) => {
                warn!(error = %err, "durable dedup purge failed");
                0
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.memory.lock().await.stats
    }

    pub async fn memory_len(&self) -> usize {
        self.memory.lock().await.lru.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(capacity: usize) -> DedupCache {
        DedupCache::in_memory(DedupCacheConfig {
            memory_capacity: capacity,
            ..Default::default()
        })
    }

    #[test]
    fn normalization_ignores_case_and_whitespace() {
        assert_eq!(
            content_signature("Hello   world", "A"),
            content_signature("hello world", "a")
        );
        assert_ne!(
            content_signature("hello world", "a"),
            content_signature("hello world", "b")
        );
    }

    #[test]
    fn empty_text_signatures_differ_by_author() {
        assert_ne!(content_signature("", "alice"), content_signature("", "bob"));
    }

    #[test]
    fn url_signature_drops_tracking_query() {
        assert_eq!(
            url_signature("https://x.com/post/1?ref=feed"),
            url_signature("https://x.com/post/1")
        );
        assert_eq!(
            url_signature("HTTPS://X.com/post/1/"),
            url_signature("https://x.com/post/1")
        );
        assert_ne!(
            url_signature("https://x.com/post/1"),
            url_signature("https://x.com/post/2")
        );
    }

    #[test]
    fn composite_prefers_post_id_over_url() {
        let signature = composite_signature(
            Some("https://x.com/post/1"),
            Some("7254339911"),
            Some("text"),
            Some("author"),
        );
        assert!(signature.starts_with("pid:"));

        let url_only = composite_signature(Some("https://x.com/post/1"), None, Some("text"), None);
        assert!(url_only.starts_with("url:"));

        let content_only = composite_signature(None, None, Some("text"), Some("author"));
        assert!(content_only.starts_with("txt:"));
    }

    #[test]
    fn composite_is_empty_only_when_all_inputs_empty() {
        assert_eq!(composite_signature(None, None, None, None), "");
        assert_eq!(composite_signature(Some("  "), Some(""), Some(" "), None), "");
        assert!(!composite_signature(None, None, None, Some("author")).is_empty());
    }

    #[tokio::test]
    async fn lru_evicts_least_recently_accessed() {
        let cache = small_cache(2);
        cache.mark_signature("pid:a", "test").await;
        cache.mark_signature("pid:b", "test").await;

        // Touching A protects it from eviction ahead of untouched B.
        assert!(cache.is_duplicate_signature("pid:a").await);
        cache.mark_signature("pid:c", "test").await;

        assert!(cache.is_duplicate_signature("pid:a").await);
        assert!(!cache.is_duplicate_signature("pid:b").await);
        assert!(cache.is_duplicate_signature("pid:c").await);
        assert_eq!(cache.memory_len().await, 2);
    }

    #[tokio::test]
    async fn empty_signature_never_matches() {
        let cache = small_cache(4);
        cache.mark_processed(None, None, None, None).await;
        assert!(!cache.is_duplicate(None, None, None, None).await);
        assert_eq!(cache.memory_len().await, 0);
    }

    #[tokio::test]
    async fn stats_track_checks_hits_additions() {
        let cache = small_cache(4);
        assert_eq!(cache.stats().await.hit_rate(), 0.0);

        cache.mark_signature("pid:a", "test").await;
        assert!(cache.is_duplicate_signature("pid:a").await);
        assert!(!cache.is_duplicate_signature("pid:x").await);

        let stats = cache.stats().await;
        assert_eq!(stats.additions, 1);
        assert_eq!(stats.checks, 2);
        assert_eq!(stats.hits, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn durable_tier_survives_memory_clear() {
        let config = DedupCacheConfig::default();
        let cache = DedupCache::open(config, "sqlite::memory:").await;
        assert!(cache.has_durable_tier());

        cache
            .mark_processed(Some("https://x.com/post/42"), None, Some("text"), None)
            .await;
        cache.clear_memory().await;
        assert_eq!(cache.memory_len().await, 0);

        // Warm-cache contract: durable hit repopulates the memory tier.
        assert!(
            cache
                .is_duplicate(Some("https://x.com/post/42"), None, None, None)
                .await
        );
        assert_eq!(cache.memory_len().await, 1);
    }

    #[tokio::test]
    async fn marking_twice_is_idempotent() {
        let store = SqliteSeenStore::open("sqlite::memory:").await.expect("open");
        let entry = CacheEntry {
            signature: "pid:1".to_string(),
            first_seen: Utc::now(),
            expires_at: None,
            source: "test".to_string(),
        };
        store.upsert(&entry).await.expect("first upsert");
        store.upsert(&entry).await.expect("second upsert");
        assert_eq!(store.len().await.expect("len"), 1);
        assert!(store.contains("pid:1", Utc::now()).await.expect("contains"));
    }

    #[tokio::test]
    async fn expired_entries_read_as_unseen() {
        let store = SqliteSeenStore::open("sqlite::memory:").await.expect("open");
        let now = Utc::now();
        let entry = CacheEntry {
            signature: "pid:old".to_string(),
            first_seen: now - Duration::days(10),
            expires_at: Some(now - Duration::days(3)),
            source: "test".to_string(),
        };
        store.upsert(&entry).await.expect("upsert");
        assert!(!store.contains("pid:old", now).await.expect("contains"));
        assert_eq!(store.purge_expired(now).await.expect("purge"), 1);
        assert_eq!(store.len().await.expect("len"), 0);
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("seen.db");
        let url = format!("sqlite://{}", db_path.display());

        {
            let cache = DedupCache::open(DedupCacheConfig::default(), &url).await;
            cache
                .mark_processed(None, Some("7254339911"), None, None)
                .await;
        }

        let reopened = DedupCache::open(DedupCacheConfig::default(), &url).await;
        assert!(
            reopened
                .is_duplicate(None, Some("7254339911"), None, None)
                .await
        );
    }

    #[tokio::test]
    async fn clear_all_forgets_both_tiers() {
        let cache = DedupCache::open(DedupCacheConfig::default(), "sqlite::memory:").await;
        cache.mark_signature("pid:1", "test").await;
        cache.clear_all().await;
        assert!(!cache.is_duplicate_signature("pid:1").await);
    }
}
