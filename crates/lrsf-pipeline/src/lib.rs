//! Harvest pipeline orchestration: capture bundles in, accepted records and
//! run reports out. One malformed bundle or post never aborts a run; every
//! per-item failure is logged and counted instead.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Float64Array, RecordBatch, StringArray, UInt64Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Duration, Utc};
use lrsf_classify::UnifiedFilter;
use lrsf_core::{AcceptedPost, IntentLabel, RawPost};
use lrsf_dedup::{composite_signature, normalize_text, DedupCache, DedupCacheConfig};
use lrsf_extract::normalize_post;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strsim::jaro_winkler;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "lrsf-pipeline";

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub workspace_root: PathBuf,
    pub captures_dir: PathBuf,
    pub cache_db_url: String,
    pub memory_cache_capacity: usize,
    pub cache_ttl_days: Option<i64>,
    pub review_similarity_threshold: f64,
    pub scheduler_enabled: bool,
    pub harvest_cron_1: String,
    pub harvest_cron_2: String,
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            captures_dir: std::env::var("LRSF_CAPTURES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./captures")),
            cache_db_url: std::env::var("LRSF_CACHE_DB")
                .unwrap_or_else(|_| "sqlite://state/seen_posts.db".to_string()),
            memory_cache_capacity: std::env::var("LRSF_CACHE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2048),
            cache_ttl_days: std::env::var("LRSF_CACHE_TTL_DAYS")
                .ok()
                .and_then(|v| v.parse().ok()),
            review_similarity_threshold: std::env::var("LRSF_REVIEW_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.92),
            scheduler_enabled: std::env::var("LRSF_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            harvest_cron_1: std::env::var("HARVEST_CRON_1")
                .unwrap_or_else(|_| "0 7 * * *".to_string()),
            harvest_cron_2: std::env::var("HARVEST_CRON_2")
                .unwrap_or_else(|_| "0 19 * * *".to_string()),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.workspace_root.join("state")
    }

    fn keyword_state_path(&self) -> PathBuf {
        self.state_dir().join("keyword_stats.json")
    }

    fn reports_root(&self) -> PathBuf {
        self.workspace_root.join("reports")
    }
}

/// One collector handoff: the raw posts found for one keyword search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureBundle {
    pub bundle_id: String,
    pub keyword: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub collector_version: String,
    pub posts: Vec<RawPost>,
}

pub async fn load_capture_bundle(path: &PathBuf) -> Result<CaptureBundle> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Per-keyword productivity counters, persisted across sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordStats {
    pub keyword: String,
    pub attempts: u64,
    pub posts_found: u64,
    pub posts_retained: u64,
}

impl KeywordStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.5
        } else {
            self.posts_found as f64 / self.attempts as f64
        }
    }

    pub fn relevance_rate(&self) -> f64 {
        if self.posts_found == 0 {
            0.5
        } else {
            self.posts_retained as f64 / self.posts_found as f64
        }
    }

    pub fn yield_score(&self) -> f64 {
        0.4 * self.success_rate() + 0.6 * self.relevance_rate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeywordStateFile {
    version: u32,
    keywords: Vec<KeywordStats>,
}

/// Ranks keywords by yield so the collector can prioritize searches.
/// Consistently unproductive keywords are retired from rotation once they
/// have had a fair number of attempts.
#[derive(Debug, Clone)]
pub struct KeywordYieldTracker {
    stats: BTreeMap<String, KeywordStats>,
    retirement_min_attempts: u64,
    retirement_floor: f64,
}

impl Default for KeywordYieldTracker {
    fn default() -> Self {
        Self {
            stats: BTreeMap::new(),
            retirement_min_attempts: 5,
            retirement_floor: 0.35,
        }
    }
}

impl KeywordYieldTracker {
    pub fn record_batch(&mut self, keyword: &str, posts_found: u64, posts_retained: u64) {
        let entry = self
            .stats
            .entry(keyword.to_string())
            .or_insert_with(|| KeywordStats {
                keyword: keyword.to_string(),
                ..Default::default()
            });
        entry.attempts += 1;
        entry.posts_found += posts_found;
        entry.posts_retained += posts_retained;
    }

    pub fn get(&self, keyword: &str) -> Option<&KeywordStats> {
        self.stats.get(keyword)
    }

    pub fn is_retired(&self, stats: &KeywordStats) -> bool {
        stats.attempts >= self.retirement_min_attempts
            && stats.yield_score() < self.retirement_floor
    }

    /// Active keywords ordered by descending yield score.
    pub fn ranked(&self) -> Vec<&KeywordStats> {
        let mut active: Vec<&KeywordStats> = self
            .stats
            .values()
            .filter(|stats| !self.is_retired(stats))
            .collect();
        active.sort_by(|a, b| {
            b.yield_score()
                .partial_cmp(&a.yield_score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.keyword.cmp(&b.keyword))
        });
        active
    }

    pub fn all(&self) -> Vec<&KeywordStats> {
        self.stats.values().collect()
    }

    /// Missing or corrupt state files start an empty tracker; continuity is
    /// a convenience, never a hard requirement.
    pub async fn load(path: &PathBuf) -> Self {
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<KeywordStateFile>(&text) {
            Ok(state) => {
                let mut tracker = Self::default();
                for stats in state.keywords {
                    tracker.stats.insert(stats.keyword.clone(), stats);
                }
                tracker
            }
            Err(err) => {
                warn!(error = %err, path = %path.display(), "keyword state unreadable, starting fresh");
                Self::default()
            }
        }
    }

    pub async fn save(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let state = KeywordStateFile {
            version: 1,
            keywords: self.stats.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&state).context("serializing keyword state")?;
        fs::write(path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

/// Pair of accepted posts whose content looks suspiciously similar despite
/// distinct signatures. Flagged for review, never silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearDuplicateReviewItem {
    pub signature_a: String,
    pub signature_b: String,
    pub similarity: f64,
}

/// Pairwise Jaro-Winkler over author+text comparison keys; marks both sides
/// of each near-match as review_required.
pub fn review_near_duplicates(
    accepted: &mut [AcceptedPost],
    review_keys: &[String],
    threshold: f64,
) -> Vec<NearDuplicateReviewItem> {
    let mut items = Vec::new();
    for i in 0..accepted.len() {
        for j in (i + 1)..accepted.len() {
            let similarity = jaro_winkler(&review_keys[i], &review_keys[j]);
            if similarity >= threshold {
                items.push(NearDuplicateReviewItem {
                    signature_a: accepted[i].canonical_signature.clone(),
                    signature_b: accepted[j].canonical_signature.clone(),
                    similarity,
                });
                for index in [i, j] {
                    accepted[index].review_required = true;
                    let best = accepted[index]
                        .near_duplicate_similarity
                        .map_or(similarity, |s| s.max(similarity));
                    accepted[index].near_duplicate_similarity = Some(best);
                }
            }
        }
    }
    items
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub bundles_processed: usize,
    pub bundles_failed: usize,
    pub posts_seen: usize,
    pub undedupable_posts: usize,
    pub duplicates_skipped: usize,
    pub accepted: usize,
    pub rejected: BTreeMap<String, usize>,
    pub review_flagged: usize,
    pub degraded_extractions: usize,
    pub low_confidence_extractions: usize,
    pub cache_checks: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    pub filter_config_hash: String,
    pub reports_dir: String,
    pub parquet_manifest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifest {
    pub schema_version: u32,
    pub files: Vec<SnapshotManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

enum PostOutcome {
    Duplicate,
    Accepted(Box<AcceptedPost>, String),
    Rejected(IntentLabel),
}

pub struct HarvestPipeline {
    config: HarvestConfig,
    filter: UnifiedFilter,
    cache: DedupCache,
    tracker: Mutex<KeywordYieldTracker>,
}

impl HarvestPipeline {
    pub async fn new(config: HarvestConfig) -> Result<Self> {
        let filter = UnifiedFilter::from_workspace_root(&config.workspace_root)
            .context("loading filter config")?;
        fs::create_dir_all(config.state_dir())
            .await
            .with_context(|| format!("creating {}", config.state_dir().display()))?;
        let cache = DedupCache::open(
            DedupCacheConfig {
                memory_capacity: config.memory_cache_capacity,
                ttl: config.cache_ttl_days.map(Duration::days),
                ..Default::default()
            },
            &config.cache_db_url,
        )
        .await;
        let tracker = KeywordYieldTracker::load(&config.keyword_state_path()).await;
        Ok(Self {
            config,
            filter,
            cache,
            tracker: Mutex::new(tracker),
        })
    }

    pub fn filter(&self) -> &UnifiedFilter {
        &self.filter
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let mut bundles_processed = 0usize;
        let mut bundles_failed = 0usize;
        let mut posts_seen = 0usize;
        let mut undedupable_posts = 0usize;
        let mut duplicates_skipped = 0usize;
        let mut rejected: BTreeMap<String, usize> = BTreeMap::new();
        let mut degraded_extractions = 0usize;
        let mut low_confidence_extractions = 0usize;
        let mut accepted: Vec<AcceptedPost> = Vec::new();
        let mut review_keys: Vec<String> = Vec::new();

        for path in self.capture_paths().await? {
            let bundle = match load_capture_bundle(&path).await {
                Ok(bundle) => bundle,
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "skipping unreadable capture bundle");
                    bundles_failed += 1;
                    continue;
                }
            };
            bundles_processed += 1;

            let mut bundle_retained = 0u64;
            let bundle_found = bundle.posts.len() as u64;
            for raw in &bundle.posts {
                posts_seen += 1;
                if !raw.is_dedupable() {
                    undedupable_posts += 1;
                }
                let (outcome, degraded, low_confidence) =
                    self.process_post(&bundle.keyword, raw).await;
                if degraded {
                    degraded_extractions += 1;
                }
                if low_confidence {
                    low_confidence_extractions += 1;
                }
                match outcome {
                    PostOutcome::Duplicate => duplicates_skipped += 1,
                    PostOutcome::Accepted(post, review_key) => {
                        bundle_retained += 1;
                        accepted.push(*post);
                        review_keys.push(review_key);
                    }
                    PostOutcome::Rejected(intent) => {
                        *rejected.entry(intent.as_str().to_string()).or_default() += 1;
                    }
                }
            }

            let mut tracker = self.tracker.lock().await;
            tracker.record_batch(&bundle.keyword, bundle_found, bundle_retained);
        }

        let review_items = review_near_duplicates(
            &mut accepted,
            &review_keys,
            self.config.review_similarity_threshold,
        );

        {
            let tracker = self.tracker.lock().await;
            if let Err(err) = tracker.save(&self.config.keyword_state_path()).await {
                warn!(error = %err, "keyword state not persisted");
            }
        }

        let stats = self.cache.stats().await;
        let finished_at = Utc::now();
        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at,
            bundles_processed,
            bundles_failed,
            posts_seen,
            undedupable_posts,
            duplicates_skipped,
            accepted: accepted.len(),
            rejected,
            review_flagged: accepted.iter().filter(|p| p.review_required).count(),
            degraded_extractions,
            low_confidence_extractions,
            cache_checks: stats.checks,
            cache_hits: stats.hits,
            cache_hit_rate: stats.hit_rate(),
            filter_config_hash: self.filter.get_config_hash().to_string(),
            reports_dir: String::new(),
            parquet_manifest: String::new(),
        };

        let reports_dir = self
            .write_reports(run_id, &summary, &accepted, &review_items)
            .await?;
        let manifest_path = self
            .export_parquet_snapshots(&reports_dir, &accepted)
            .await?;
        summary.reports_dir = reports_dir.display().to_string();
        summary.parquet_manifest = manifest_path.display().to_string();

        info!(
            run_id = %run_id,
            accepted = summary.accepted,
            duplicates = summary.duplicates_skipped,
            "harvest run complete"
        );
        Ok(summary)
    }

    async fn capture_paths(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.config.captures_dir;
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, dir = %dir.display(), "captures directory unreadable");
                return Ok(Vec::new());
            }
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("listing {}", dir.display()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn process_post(&self, keyword: &str, raw: &RawPost) -> (PostOutcome, bool, bool) {
        let normalized = normalize_post(raw, Utc::now());

        let signature = composite_signature(
            raw.permalink_url.as_deref(),
            normalized.permalink.reliable_post_id(),
            raw.text.as_deref(),
            raw.author_name.as_deref(),
        );

        let attempted = |field: &Option<String>| {
            field
                .as_deref()
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
        };
        let degraded = (attempted(&raw.author_name) && !normalized.author.is_valid())
            || (attempted(&raw.date_text) && !normalized.date.is_valid())
            || (attempted(&raw.company_name) && !normalized.company.is_valid());
        let low_confidence = normalized.confidence > 0.0 && normalized.confidence < 0.4;

        if !signature.is_empty() && self.cache.is_duplicate_signature(&signature).await {
            return (PostOutcome::Duplicate, degraded, low_confidence);
        }

        let text = normalized.text.as_deref().unwrap_or("");
        let classification = self.filter.classify_post(
            text,
            normalized.author.value.as_deref(),
            normalized.company.value.as_deref(),
            normalized.declared_language.as_deref(),
        );

        let source_tag = if classification.intent.is_accepted() {
            "accepted".to_string()
        } else {
            format!("rejected:{}", classification.intent.as_str())
        };
        if !signature.is_empty() {
            self.cache.mark_signature(&signature, &source_tag).await;
        }

        if classification.intent.is_accepted() {
            let review_key = format!(
                "{}|{}",
                normalize_text(normalized.author.value.as_deref().unwrap_or("")),
                normalize_text(text)
            );
            let post = AcceptedPost {
                keyword: Some(keyword.to_string()),
                author: normalized.author.value.clone(),
                company: normalized.company.value.clone(),
                posted_at: normalized.date.parsed_at,
                age_hours: normalized.date.age_hours,
                extraction_confidence: normalized.confidence,
                canonical_signature: signature,
                classification,
                review_required: false,
                near_duplicate_similarity: None,
            };
            (
                PostOutcome::Accepted(Box::new(post), review_key),
                degraded,
                low_confidence,
            )
        } else {
            (
                PostOutcome::Rejected(classification.intent),
                degraded,
                low_confidence,
            )
        }
    }

    pub async fn maybe_build_scheduler(&self) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        for cron in [&self.config.harvest_cron_1, &self.config.harvest_cron_2] {
            let job = Job::new_async(cron.as_str(), |_uuid, _lock| {
                Box::pin(async move {
                    info!("scheduled harvest due; run `lrsf harvest` to process pending captures");
                })
            })
            .with_context(|| format!("creating scheduler job for cron {cron}"))?;
            sched.add(job).await.context("adding scheduler job")?;
        }
        Ok(Some(sched))
    }

    async fn write_reports(
        &self,
        run_id: Uuid,
        summary: &RunSummary,
        accepted: &[AcceptedPost],
        review_items: &[NearDuplicateReviewItem],
    ) -> Result<PathBuf> {
        let reports_dir = self.config.reports_root().join(run_id.to_string());
        fs::create_dir_all(&reports_dir)
            .await
            .with_context(|| format!("creating {}", reports_dir.display()))?;

        let accepted_json = serde_json::to_vec_pretty(&serde_json::json!({
            "run": summary,
            "posts": accepted,
            "near_duplicate_review": review_items,
        }))
        .context("serializing accepted posts")?;
        fs::write(reports_dir.join("accepted_posts.json"), accepted_json)
            .await
            .context("writing accepted_posts.json")?;

        let rejected_lines = if summary.rejected.is_empty() {
            "- none".to_string()
        } else {
            summary
                .rejected
                .iter()
                .map(|(category, count)| format!("- {category}: {count}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let brief = format!(
            "# LRSF Harvest Brief\n\n\
             - Run ID: `{}`\n\
             - Started: {}\n\
             - Finished: {}\n\
             - Bundles: {} processed, {} failed\n\
             - Posts seen: {}\n\
             - Duplicates skipped: {} (cache hit rate {:.2})\n\
             - Accepted: {} ({} flagged for near-duplicate review)\n\
             - Degraded extractions: {}\n\
             - Low-confidence extractions: {}\n\
             - Filter config: `{}`\n\n\
             ## Rejections\n{}\n",
            summary.run_id,
            summary.started_at,
            summary.finished_at,
            summary.bundles_processed,
            summary.bundles_failed,
            summary.posts_seen,
            summary.duplicates_skipped,
            summary.cache_hit_rate,
            summary.accepted,
            summary.review_flagged,
            summary.degraded_extractions,
            summary.low_confidence_extractions,
            summary.filter_config_hash,
            rejected_lines
        );
        fs::write(reports_dir.join("run_brief.md"), brief)
            .await
            .context("writing run_brief.md")?;

        Ok(reports_dir)
    }

    async fn export_parquet_snapshots(
        &self,
        reports_dir: &PathBuf,
        accepted: &[AcceptedPost],
    ) -> Result<PathBuf> {
        let snapshot_dir = reports_dir.join("snapshots");
        fs::create_dir_all(&snapshot_dir)
            .await
            .with_context(|| format!("creating {}", snapshot_dir.display()))?;

        let accepted_path = snapshot_dir.join("accepted.parquet");
        let keywords_path = snapshot_dir.join("keywords.parquet");

        write_accepted_parquet(&accepted_path, accepted)?;
        {
            let tracker = self.tracker.lock().await;
            write_keywords_parquet(&keywords_path, &tracker)?;
        }

        let manifest = SnapshotManifest {
            schema_version: 1,
            files: vec![
                manifest_entry("accepted", reports_dir, &accepted_path)?,
                manifest_entry("keywords", reports_dir, &keywords_path)?,
            ],
        };
        let manifest_path = snapshot_dir.join("manifest.json");
        let bytes = serde_json::to_vec_pretty(&manifest).context("serializing snapshot manifest")?;
        fs::write(&manifest_path, bytes)
            .await
            .with_context(|| format!("writing {}", manifest_path.display()))?;
        Ok(manifest_path)
    }

    pub async fn keyword_ranking(&self) -> Vec<KeywordStats> {
        let tracker = self.tracker.lock().await;
        tracker.ranked().into_iter().cloned().collect()
    }
}

pub async fn run_harvest_once_from_env() -> Result<RunSummary> {
    let config = HarvestConfig::from_env();
    let pipeline = HarvestPipeline::new(config).await?;
    pipeline.run_once().await
}

/// Roll the most recent run reports into one operator-facing markdown page.
pub fn report_daily_markdown(runs: usize, workspace_root: Option<PathBuf>) -> Result<String> {
    let root = workspace_root.unwrap_or_else(|| PathBuf::from("."));
    let reports_root = root.join("reports");
    let mut dirs = std::fs::read_dir(&reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|entry| entry.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();
    let dirs = dirs.into_iter().take(runs.max(1)).collect::<Vec<_>>();

    let mut lines = vec!["# LRSF Harvest Daily".to_string(), String::new()];
    for dir in dirs {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let accepted_path = dir.path().join("accepted_posts.json");
        let brief_path = dir.path().join("run_brief.md");
        let manifest_path = dir.path().join("snapshots").join("manifest.json");

        let value: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&accepted_path)
                .with_context(|| format!("reading {}", accepted_path.display()))?,
        )
        .with_context(|| format!("parsing {}", accepted_path.display()))?;
        let accepted_count = value
            .get("posts")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        let duplicates = value
            .get("run")
            .and_then(|v| v.get("duplicates_skipped"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- accepted posts: {accepted_count}"));
        lines.push(format!("- duplicates skipped: {duplicates}"));
        lines.push(format!("- detail: `{}`", accepted_path.display()));
        if manifest_path.exists() {
            lines.push(format!("- snapshot manifest: `{}`", manifest_path.display()));
        }
        if brief_path.exists() {
            lines.push(format!("- brief: `{}`", brief_path.display()));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}

fn write_parquet(path: &PathBuf, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_accepted_parquet(path: &PathBuf, accepted: &[AcceptedPost]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("keyword", DataType::Utf8, true),
        ArrowField::new("author", DataType::Utf8, true),
        ArrowField::new("company", DataType::Utf8, true),
        ArrowField::new("canonical_signature", DataType::Utf8, false),
        ArrowField::new("intent", DataType::Utf8, false),
        ArrowField::new("score", DataType::Float64, false),
        ArrowField::new("confidence", DataType::Float64, false),
        ArrowField::new("review_required", DataType::Boolean, false),
    ]));

    let keywords = StringArray::from(
        accepted
            .iter()
            .map(|p| p.keyword.as_deref())
            .collect::<Vec<_>>(),
    );
    let authors = StringArray::from(
        accepted
            .iter()
            .map(|p| p.author.as_deref())
            .collect::<Vec<_>>(),
    );
    let companies = StringArray::from(
        accepted
            .iter()
            .map(|p| p.company.as_deref())
            .collect::<Vec<_>>(),
    );
    let signatures = StringArray::from(
        accepted
            .iter()
            .map(|p| Some(p.canonical_signature.as_str()))
            .collect::<Vec<_>>(),
    );
    let intents = StringArray::from(
        accepted
            .iter()
            .map(|p| Some(p.classification.intent.as_str()))
            .collect::<Vec<_>>(),
    );
    let scores = Float64Array::from(
        accepted
            .iter()
            .map(|p| p.classification.score)
            .collect::<Vec<_>>(),
    );
    let confidences = Float64Array::from(
        accepted
            .iter()
            .map(|p| p.classification.confidence)
            .collect::<Vec<_>>(),
    );
    let reviews = BooleanArray::from(
        accepted
            .iter()
            .map(|p| p.review_required)
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(keywords),
            Arc::new(authors),
            Arc::new(companies),
            Arc::new(signatures),
            Arc::new(intents),
            Arc::new(scores),
            Arc::new(confidences),
            Arc::new(reviews),
        ],
    )
    .context("building accepted record batch")?;
    write_parquet(path, batch)
}

fn write_keywords_parquet(path: &PathBuf, tracker: &KeywordYieldTracker) -> Result<()> {
    let all = tracker.all();
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("keyword", DataType::Utf8, false),
        ArrowField::new("attempts", DataType::UInt64, false),
        ArrowField::new("posts_found", DataType::UInt64, false),
        ArrowField::new("posts_retained", DataType::UInt64, false),
        ArrowField::new("yield_score", DataType::Float64, false),
    ]));

    let keywords = StringArray::from(
        all.iter()
            .map(|s| Some(s.keyword.as_str()))
            .collect::<Vec<_>>(),
    );
    let attempts = UInt64Array::from(all.iter().map(|s| s.attempts).collect::<Vec<_>>());
    let found = UInt64Array::from(all.iter().map(|s| s.posts_found).collect::<Vec<_>>());
    let retained = UInt64Array::from(all.iter().map(|s| s.posts_retained).collect::<Vec<_>>());
    let yields = Float64Array::from(all.iter().map(|s| s.yield_score()).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(keywords),
            Arc::new(attempts),
            Arc::new(found),
            Arc::new(retained),
            Arc::new(yields),
        ],
    )
    .context("building keywords record batch")?;
    write_parquet(path, batch)
}

fn manifest_entry(
    name: &str,
    reports_dir: &PathBuf,
    path: &PathBuf,
) -> Result<SnapshotManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(SnapshotManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lrsf_core::ClassificationResult;

    fn test_config(root: &std::path::Path) -> HarvestConfig {
        HarvestConfig {
            workspace_root: root.to_path_buf(),
            captures_dir: root.join("captures"),
            cache_db_url: format!("sqlite://{}", root.join("state/seen_posts.db").display()),
            memory_cache_capacity: 64,
            cache_ttl_days: None,
            review_similarity_threshold: 0.92,
            scheduler_enabled: false,
            harvest_cron_1: "0 7 * * *".to_string(),
            harvest_cron_2: "0 19 * * *".to_string(),
        }
    }

    fn relevant_bundle(bundle_id: &str, text: &str, permalink: &str) -> CaptureBundle {
        CaptureBundle {
            bundle_id: bundle_id.to_string(),
            keyword: "juriste fiscal".to_string(),
            captured_at: Utc::now(),
            collector_version: "test".to_string(),
            posts: vec![RawPost {
                text: Some(text.to_string()),
                author_name: Some("Marie Dupont".to_string()),
                permalink_url: Some(permalink.to_string()),
                ..Default::default()
            }],
        }
    }

    async fn write_bundle(dir: &std::path::Path, name: &str, bundle: &CaptureBundle) {
        fs::create_dir_all(dir).await.expect("captures dir");
        let bytes = serde_json::to_vec_pretty(bundle).expect("serialize bundle");
        fs::write(dir.join(name), bytes).await.expect("write bundle");
    }

    #[test]
    fn keyword_rates_use_neutral_defaults() {
        let fresh = KeywordStats {
            keyword: "juriste".to_string(),
            ..Default::default()
        };
        assert_eq!(fresh.success_rate(), 0.5);
        assert_eq!(fresh.relevance_rate(), 0.5);
        assert_eq!(fresh.yield_score(), 0.5);

        let seasoned = KeywordStats {
            keyword: "juriste".to_string(),
            attempts: 4,
            posts_found: 8,
            posts_retained: 2,
        };
        assert_eq!(seasoned.success_rate(), 2.0);
        assert_eq!(seasoned.relevance_rate(), 0.25);
        assert!((seasoned.yield_score() - (0.4 * 2.0 + 0.6 * 0.25)).abs() < 1e-9);
    }

    #[test]
    fn tracker_ranks_by_yield_and_retires_duds() {
        let mut tracker = KeywordYieldTracker::default();
        for _ in 0..6 {
            tracker.record_batch("productive", 3, 2);
            tracker.record_batch("dud", 0, 0);
        }
        tracker.record_batch("new", 1, 1);

        let ranked = tracker.ranked();
        let names: Vec<&str> = ranked.iter().map(|s| s.keyword.as_str()).collect();
        assert!(names.contains(&"productive"));
        assert!(names.contains(&"new"));
        assert!(!names.contains(&"dud"));
        assert_eq!(names.first(), Some(&"productive"));

        let dud = tracker.get("dud").expect("dud stats");
        assert!(tracker.is_retired(dud));
    }

    #[tokio::test]
    async fn tracker_state_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state/keyword_stats.json");

        let mut tracker = KeywordYieldTracker::default();
        tracker.record_batch("juriste fiscal", 5, 2);
        tracker.save(&path).await.expect("save");

        let reloaded = KeywordYieldTracker::load(&path).await;
        let stats = reloaded.get("juriste fiscal").expect("stats");
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.posts_found, 5);
        assert_eq!(stats.posts_retained, 2);
    }

    #[test]
    fn near_duplicates_are_flagged_not_dropped() {
        let mk = |signature: &str| AcceptedPost {
            keyword: None,
            author: Some("Marie Dupont".to_string()),
            company: None,
            posted_at: None,
            age_hours: None,
            extraction_confidence: 0.9,
            canonical_signature: signature.to_string(),
            classification: ClassificationResult {
                intent: IntentLabel::Relevant,
                score: 0.5,
                confidence: 1.0,
                matched_patterns: vec![],
                location_ok: true,
            },
            review_required: false,
            near_duplicate_similarity: None,
        };
        let mut accepted = vec![mk("pid:1"), mk("pid:2"), mk("pid:3")];
        let keys = vec![
            "marie dupont|nous recrutons un juriste fiscal cdi paris".to_string(),
            "marie dupont|nous recrutons un juriste fiscal cdi a paris".to_string(),
            "jean martin|offre de poste de notaire a lyon".to_string(),
        ];
        let items = review_near_duplicates(&mut accepted, &keys, 0.92);
        assert_eq!(items.len(), 1);
        assert_eq!(accepted.len(), 3);
        assert!(accepted[0].review_required);
        assert!(accepted[1].review_required);
        assert!(!accepted[2].review_required);
    }

    #[tokio::test]
    async fn end_to_end_accept_then_duplicate_on_reingest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let captures = config.captures_dir.clone();

        write_bundle(
            &captures,
            "bundle-1.json",
            &relevant_bundle(
                "b1",
                "Nous recrutons un Juriste fiscal pour rejoindre notre équipe à Paris (CDI)",
                "https://example.com/post/42",
            ),
        )
        .await;

        let pipeline = HarvestPipeline::new(config.clone()).await.expect("pipeline");
        let first = pipeline.run_once().await.expect("first run");
        assert_eq!(first.posts_seen, 1);
        assert_eq!(first.duplicates_skipped, 0);
        assert_eq!(first.accepted, 1);

        // Same permalink with altered text must now be a duplicate.
        write_bundle(
            &captures,
            "bundle-2.json",
            &relevant_bundle(
                "b2",
                "Nous recrutons un Juriste fiscal (texte modifié) à Paris en CDI",
                "https://example.com/post/42?utm_source=feed",
            ),
        )
        .await;

        let second = pipeline.run_once().await.expect("second run");
        assert_eq!(second.posts_seen, 2);
        assert_eq!(second.duplicates_skipped, 2);
        assert_eq!(second.accepted, 0);
    }

    #[tokio::test]
    async fn run_writes_reports_and_snapshot_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        write_bundle(
            &config.captures_dir.clone(),
            "bundle-1.json",
            &relevant_bundle(
                "b1",
                "Nous recrutons un juriste fiscal en CDI à Paris",
                "https://example.com/post/1",
            ),
        )
        .await;

        let pipeline = HarvestPipeline::new(config).await.expect("pipeline");
        let summary = pipeline.run_once().await.expect("run");

        let reports_dir = PathBuf::from(&summary.reports_dir);
        assert!(reports_dir.join("accepted_posts.json").exists());
        assert!(reports_dir.join("run_brief.md").exists());

        let manifest_text =
            std::fs::read_to_string(&summary.parquet_manifest).expect("manifest readable");
        let manifest: serde_json::Value =
            serde_json::from_str(&manifest_text).expect("manifest json");
        let files = manifest.get("files").and_then(|f| f.as_array()).expect("files");
        assert_eq!(files.len(), 2);
        for file in files {
            let sha = file.get("sha256").and_then(|s| s.as_str()).expect("sha256");
            assert_eq!(sha.len(), 64);
        }
    }

    #[tokio::test]
    async fn malformed_bundle_never_aborts_the_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let captures = config.captures_dir.clone();
        fs::create_dir_all(&captures).await.expect("captures dir");
        fs::write(captures.join("bad.json"), b"{ not json")
            .await
            .expect("write bad bundle");
        write_bundle(
            &captures,
            "good.json",
            &relevant_bundle(
                "b1",
                "Nous recrutons un juriste fiscal en CDI à Paris",
                "https://example.com/post/7",
            ),
        )
        .await;

        let pipeline = HarvestPipeline::new(config).await.expect("pipeline");
        let summary = pipeline.run_once().await.expect("run");
        assert_eq!(summary.bundles_failed, 1);
        assert_eq!(summary.bundles_processed, 1);
        assert_eq!(summary.accepted, 1);
    }

    #[tokio::test]
    async fn rejected_posts_are_categorized_and_marked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let bundle = CaptureBundle {
            bundle_id: "b1".to_string(),
            keyword: "droit fiscal".to_string(),
            captured_at: Utc::now(),
            collector_version: "test".to_string(),
            posts: vec![RawPost {
                text: Some(
                    "Article d'opinion sur le droit fiscal international sans offre d'emploi"
                        .to_string(),
                ),
                permalink_url: Some("https://example.com/post/9".to_string()),
                ..Default::default()
            }],
        };
        write_bundle(&config.captures_dir.clone(), "bundle.json", &bundle).await;

        let pipeline = HarvestPipeline::new(config).await.expect("pipeline");
        let summary = pipeline.run_once().await.expect("run");
        assert_eq!(summary.accepted, 0);
        assert_eq!(summary.rejected.get("other"), Some(&1));

        // Rejected posts are remembered too: the second pass skips them.
        let second = pipeline.run_once().await.expect("second run");
        assert_eq!(second.duplicates_skipped, 1);
    }
}
