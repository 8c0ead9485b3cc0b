//! Ingestion pipeline orchestration.
//!
//! Drives archive → line normalization → entity resolution → record
//! deduplication, one entry at a time. Every line lands in exactly one of
//! three counters (added, duplicate, malformed); a failing line never stops
//! the batch. The only fatal errors are an unreadable archive and a store
//! that is unavailable at start.
//!
//! With `workers > 1` up to that many lines of an entry are in flight at
//! once. Counters are atomics, and entity races are settled by the store's
//! unique constraints.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::archive::{self, ArchiveItem};
use crate::cache;
use crate::config::{Config, IngestConfig};
use crate::db;
use crate::error::{ArchiveError, StoreError};
use crate::models::{EntityKind, IngestCounts, LineOutcome, RecordOutcome, Triple};
use crate::normalize::normalize_line;
use crate::progress::{NoProgress, ProgressEvent, ProgressMode, ProgressReporter};
use crate::store::{CredentialStore, MemoryStore, SqliteStore};

/// Tuning knobs for an [`Ingestor`].
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub workers: usize,
    pub progress_every: u64,
    pub store_timeout: Duration,
    pub retries: u32,
    /// Skip entries the ledger already marks as completed.
    pub resume: bool,
}

impl IngestOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            workers: config.workers,
            progress_every: config.progress_every,
            store_timeout: config.store_timeout(),
            retries: config.retries,
            resume: false,
        }
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

/// Totals for one archive.
#[derive(Debug, Clone, Default)]
pub struct ArchiveSummary {
    /// Regular-file entries seen, including skipped ones.
    pub entries: u64,
    pub skipped: u64,
    pub counts: IngestCounts,
    /// Per-entry totals in archive order.
    pub per_entry: Vec<(String, IngestCounts)>,
}

#[derive(Default)]
struct Tally {
    added: AtomicU64,
    duplicate: AtomicU64,
    malformed: AtomicU64,
}

impl Tally {
    fn snapshot(&self) -> IngestCounts {
        IngestCounts {
            added: self.added.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Records which entries of an archive have been fully ingested.
pub struct Ledger {
    pool: SqlitePool,
    archive: String,
}

impl Ledger {
    pub fn new(pool: SqlitePool, archive: impl Into<String>) -> Self {
        Self {
            pool,
            archive: archive.into(),
        }
    }

    pub async fn completed_entries(&self) -> Result<HashSet<String>, sqlx::Error> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT entry FROM ingested_entries WHERE archive = ?")
                .bind(&self.archive)
                .fetch_all(&self.pool)
                .await?;
        Ok(names.into_iter().collect())
    }

    pub async fn mark_done(&self, entry: &str, counts: IngestCounts) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO ingested_entries (archive, entry, added, duplicate, malformed, completed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(archive, entry) DO UPDATE SET
                added = excluded.added,
                duplicate = excluded.duplicate,
                malformed = excluded.malformed,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&self.archive)
        .bind(entry)
        .bind(counts.added as i64)
        .bind(counts.duplicate as i64)
        .bind(counts.malformed as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Append-only file of lines that were not stored, one per line as
/// `<reason>\t<raw line>`.
pub struct RejectLog {
    writer: Mutex<BufWriter<File>>,
}

impl RejectLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open reject log: {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn record(&self, reason: &str, line: &str) {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(writer, "{}\t{}", reason, line) {
            warn!(error = %e, "failed to write reject log");
        }
    }

    fn flush(&self) {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writer.flush() {
            warn!(error = %e, "failed to flush reject log");
        }
    }
}

pub struct Ingestor {
    store: Arc<dyn CredentialStore>,
    options: IngestOptions,
    reporter: Box<dyn ProgressReporter>,
    ledger: Option<Ledger>,
    rejects: Option<RejectLog>,
    added_total: AtomicU64,
}

impl Ingestor {
    pub fn new(store: Arc<dyn CredentialStore>, options: IngestOptions) -> Self {
        Self {
            store,
            options,
            reporter: Box::new(NoProgress),
            ledger: None,
            rejects: None,
            added_total: AtomicU64::new(0),
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_reject_log(mut self, rejects: RejectLog) -> Self {
        self.rejects = Some(rejects);
        self
    }

    /// Parses, resolves and persists one raw line.
    pub async fn ingest_line(&self, line: &str) -> LineOutcome {
        let credential = match normalize_line(line) {
            Ok(credential) => credential,
            Err(e) => {
                debug!(error = %e, line, "malformed line");
                self.reject("malformed", line);
                return LineOutcome::Malformed;
            }
        };

        let outcome = async {
            let mut ids = [0i64; 3];
            for (slot, kind) in ids.iter_mut().zip(EntityKind::ALL) {
                let value = credential.value(kind);
                *slot = self
                    .with_retry(true, || self.store.resolve(kind, value))
                    .await?;
            }
            let triple = Triple {
                username_id: ids[0],
                domain_id: ids[1],
                password_id: ids[2],
            };
            self.with_retry(false, || self.store.insert_record(triple))
                .await
        }
        .await;

        match outcome {
            Ok(RecordOutcome::Created) => LineOutcome::Added,
            Ok(RecordOutcome::Duplicate) => LineOutcome::Duplicate,
            Err(e) => {
                warn!(error = %e, email = %credential.email, "skipping rejected line");
                self.reject("rejected", line);
                LineOutcome::Malformed
            }
        }
    }

    /// Runs a batch of lines of `entry` through [`Self::ingest_line`],
    /// at most `workers` at a time.
    async fn ingest_lines<'a>(
        &self,
        tally: &Tally,
        entry: &str,
        lines: impl Iterator<Item = &'a str>,
    ) {
        // A limit of one keeps lines strictly sequential.
        futures::stream::iter(lines)
            .for_each_concurrent(self.options.workers.max(1), |line| async move {
                let outcome = self.ingest_line(line).await;
                self.count(tally, entry, outcome);
            })
            .await;
    }

    /// Reads the archive at `path` entry by entry.
    ///
    /// Fails only when the archive cannot be opened or its stream is corrupt.
    /// An entry with a line that is not valid text is abandoned at that line
    /// and counted as skipped; lines before it keep their outcomes.
    pub async fn ingest_archive(&self, path: &Path) -> Result<ArchiveSummary, ArchiveError> {
        let mut rx = archive::spawn_reader(path)?;

        let completed = match (&self.ledger, self.options.resume) {
            (Some(ledger), true) => ledger.completed_entries().await.unwrap_or_else(|e| {
                warn!(error = %e, "cannot read ingest ledger; ingesting every entry");
                HashSet::new()
            }),
            _ => HashSet::new(),
        };

        let mut summary = ArchiveSummary::default();
        // `None` between entries and while an already-ingested entry drains.
        let mut current: Option<(String, Tally)> = None;
        while let Some(item) = rx.recv().await {
            match item {
                Ok(ArchiveItem::Entry(name)) => {
                    summary.entries += 1;
                    if completed.contains(&name) {
                        info!(entry = %name, "entry already ingested, skipping");
                        summary.skipped += 1;
                        self.reporter.report(ProgressEvent::EntrySkipped {
                            entry: name,
                            reason: "already ingested".to_string(),
                        });
                        continue;
                    }
                    self.reporter.report(ProgressEvent::EntryStarted {
                        entry: name.clone(),
                    });
                    current = Some((name, Tally::default()));
                }
                Ok(ArchiveItem::Lines(batch)) => {
                    if let Some((name, tally)) = &current {
                        self.ingest_lines(tally, name, batch.iter().map(String::as_str))
                            .await;
                    }
                }
                Ok(ArchiveItem::Overlong(prefix)) => {
                    if let Some((name, tally)) = &current {
                        warn!(entry = %name, prefix = %prefix, "dropping overlong line");
                        self.reject("overlong", &prefix);
                        self.count(tally, name, LineOutcome::Malformed);
                    }
                }
                Ok(ArchiveItem::EntryEnd) => {
                    let Some((name, tally)) = current.take() else {
                        continue;
                    };
                    let counts = tally.snapshot();
                    self.reporter.report(ProgressEvent::EntryFinished {
                        entry: name.clone(),
                        counts,
                    });
                    if let Some(ledger) = &self.ledger {
                        if let Err(e) = ledger.mark_done(&name, counts).await {
                            warn!(entry = %name, error = %e, "failed to record completed entry");
                        }
                    }
                    summary.counts.absorb(counts);
                    summary.per_entry.push((name, counts));
                }
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "skipping rest of entry");
                    let Some((name, tally)) = current.take() else {
                        continue;
                    };
                    summary.skipped += 1;
                    summary.counts.absorb(tally.snapshot());
                    self.reporter.report(ProgressEvent::EntrySkipped {
                        entry: name,
                        reason: "not valid text".to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(rejects) = &self.rejects {
            rejects.flush();
        }
        Ok(summary)
    }

    fn count(&self, tally: &Tally, entry: &str, outcome: LineOutcome) {
        match outcome {
            LineOutcome::Added => {
                tally.added.fetch_add(1, Ordering::Relaxed);
                let total = self.added_total.fetch_add(1, Ordering::Relaxed) + 1;
                if total % self.options.progress_every == 0 {
                    self.reporter.report(ProgressEvent::Added {
                        entry: entry.to_string(),
                        added: total,
                    });
                }
            }
            LineOutcome::Duplicate => {
                tally.duplicate.fetch_add(1, Ordering::Relaxed);
            }
            LineOutcome::Malformed => {
                tally.malformed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn reject(&self, reason: &str, line: &str) {
        if let Some(rejects) = &self.rejects {
            rejects.record(reason, line);
        }
    }

    /// Runs one store operation under the configured timeout, retrying a
    /// transient failure at most `retries` times.
    ///
    /// A timeout is retried only for `idempotent` operations. A record insert
    /// that timed out may still have committed, and its retry would report
    /// the line as a duplicate, so it fails instead.
    async fn with_retry<T, F, Fut>(&self, idempotent: bool, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.options.store_timeout, op()).await {
                Ok(result) => result,
                Err(_) if !idempotent => {
                    return Err(StoreError::Transient(format!(
                        "timed out after {:?}; write outcome unknown",
                        self.options.store_timeout
                    )))
                }
                Err(_) => Err(StoreError::Transient(format!(
                    "timed out after {:?}",
                    self.options.store_timeout
                ))),
            };
            match result {
                Err(StoreError::Transient(msg)) if attempt < self.options.retries => {
                    attempt += 1;
                    warn!(error = %msg, attempt, "transient store failure, retrying");
                }
                other => return other,
            }
        }
    }
}

/// CLI overrides for `passdb ingest`.
#[derive(Debug, Clone)]
pub struct IngestArgs {
    pub workers: Option<usize>,
    pub resume: bool,
    pub dry_run: bool,
    pub progress: ProgressMode,
}

pub async fn run_ingest(config: &Config, archive_path: &Path, args: IngestArgs) -> Result<()> {
    let mut options = IngestOptions::from_config(&config.ingest);
    if let Some(workers) = args.workers {
        if workers == 0 {
            anyhow::bail!("--workers must be >= 1");
        }
        options.workers = workers;
    }
    options.resume = args.resume;

    let archive_key = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| archive_path.display().to_string());

    if args.dry_run {
        let store = Arc::new(MemoryStore::new());
        let ingestor = Ingestor::new(store.clone(), options).with_reporter(args.progress.reporter());
        let summary = ingestor
            .ingest_archive(archive_path)
            .await
            .with_context(|| format!("Failed to ingest {}", archive_path.display()))?;

        print_summary(&archive_key, &summary, true);
        println!("  distinct usernames: {}", store.entity_count(EntityKind::Username));
        println!("  distinct domains: {}", store.entity_count(EntityKind::Domain));
        println!("  distinct passwords: {}", store.entity_count(EntityKind::Password));
        return Ok(());
    }

    let pool = db::connect_initialized(config).await?;
    info!(archive = %archive_path.display(), workers = options.workers, "starting ingest");

    let store = Arc::new(SqliteStore::new(pool.clone()));
    let mut ingestor = Ingestor::new(store, options)
        .with_reporter(args.progress.reporter())
        .with_ledger(Ledger::new(pool.clone(), archive_key.clone()));
    if let Some(path) = &config.ingest.reject_log {
        ingestor = ingestor.with_reject_log(RejectLog::open(path)?);
    }

    let result = ingestor.ingest_archive(archive_path).await;
    if matches!(&result, Ok(summary) if summary.counts.added > 0) {
        // New records change lookup answers; breach answers are unaffected.
        match cache::clear_lookups(&pool).await {
            Ok(0) => {}
            Ok(cleared) => info!(cleared, "dropped cached lookup responses"),
            Err(e) => warn!(error = %e, "failed to drop cached lookup responses"),
        }
    }
    pool.close().await;
    let summary =
        result.with_context(|| format!("Failed to ingest {}", archive_path.display()))?;

    print_summary(&archive_key, &summary, false);
    Ok(())
}

fn print_summary(archive: &str, summary: &ArchiveSummary, dry_run: bool) {
    for (entry, counts) in &summary.per_entry {
        println!(
            "entry {}: added={} duplicate={} malformed={}",
            entry, counts.added, counts.duplicate, counts.malformed
        );
    }

    if dry_run {
        println!("ingest {} (dry-run)", archive);
    } else {
        println!("ingest {}", archive);
    }
    println!("  entries: {} (skipped {})", summary.entries, summary.skipped);
    println!("  lines: {}", summary.counts.lines());
    println!("  added: {}", summary.counts.added);
    println!("  duplicate: {}", summary.counts.duplicate);
    println!("  malformed: {}", summary.counts.malformed);
    println!("ok");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    async fn ingest_text(ing: &Ingestor, text: &str) -> IngestCounts {
        let tally = Tally::default();
        ing.ingest_lines(&tally, "dump.txt", crate::normalize::lines(text))
            .await;
        tally.snapshot()
    }

    fn ingestor(store: Arc<dyn CredentialStore>, workers: usize) -> Ingestor {
        Ingestor::new(
            store,
            IngestOptions {
                workers,
                progress_every: 2,
                store_timeout: Duration::from_millis(200),
                retries: 1,
                resume: false,
            },
        )
    }

    #[tokio::test]
    async fn entry_counts_every_line() {
        let store = Arc::new(MemoryStore::new());
        let ing = ingestor(store.clone(), 1);
        let text = "a@x.com:1\nb@x.com:2\na@x.com:1\nnot-a-credential\r\n\r\nB@X.com:2\n";
        let counts = ingest_text(&ing, text).await;
        assert_eq!(counts.added, 2);
        assert_eq!(counts.duplicate, 2);
        assert_eq!(counts.malformed, 1);
        assert_eq!(counts.lines(), 5);
        assert_eq!(store.record_count(), 2);
    }

    #[tokio::test]
    async fn lines_without_at_create_no_entities() {
        let store = Arc::new(MemoryStore::new());
        let ing = ingestor(store.clone(), 4);
        let text = "no-at-sign:pw\nplainword\n:only-password\nexample.com;secret\n";
        let counts = ingest_text(&ing, text).await;
        assert_eq!(counts.malformed, 4);
        assert_eq!(counts.added + counts.duplicate, 0);
        for kind in EntityKind::ALL {
            assert_eq!(store.entity_count(kind), 0, "{}", kind);
        }
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn password_case_creates_distinct_records() {
        let store = Arc::new(MemoryStore::new());
        let ing = ingestor(store.clone(), 1);
        assert_eq!(ing.ingest_line("User@Domain.com:pw").await, LineOutcome::Added);
        assert_eq!(ing.ingest_line("user@domain.com:PW").await, LineOutcome::Added);
        assert_eq!(store.entity_count(EntityKind::Username), 1);
        assert_eq!(store.entity_count(EntityKind::Domain), 1);
        assert_eq!(store.entity_count(EntityKind::Password), 2);
    }

    #[tokio::test]
    async fn concurrent_workers_match_sequential_counts() {
        let text: String = (0..200)
            .map(|i| format!("user{}@shared.example:pw{}\n", i % 50, i % 50))
            .collect();

        let store = Arc::new(MemoryStore::new());
        let counts = ingest_text(&ingestor(store.clone(), 8), &text).await;
        assert_eq!(counts.added, 50);
        assert_eq!(counts.duplicate, 150);
        assert_eq!(store.entity_count(EntityKind::Domain), 1);
    }

    #[tokio::test]
    async fn nul_in_password_is_counted_malformed() {
        let store = Arc::new(MemoryStore::new());
        let ing = ingestor(store.clone(), 1);
        assert_eq!(ing.ingest_line("a@b.com:p\0w").await, LineOutcome::Malformed);
        assert_eq!(store.record_count(), 0);
    }

    /// Fails the first `failures` calls with a transient error.
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicU32,
    }

    #[async_trait]
    impl CredentialStore for FlakyStore {
        async fn resolve(&self, kind: EntityKind, value: &str) -> Result<i64, StoreError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Transient("connection reset".into()));
            }
            self.inner.resolve(kind, value).await
        }

        async fn insert_record(&self, triple: Triple) -> Result<RecordOutcome, StoreError> {
            self.inner.insert_record(triple).await
        }
    }

    #[tokio::test]
    async fn one_transient_failure_is_retried() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(1),
        });
        let ing = ingestor(store, 1);
        assert_eq!(ing.ingest_line("a@b.com:pw").await, LineOutcome::Added);
    }

    #[tokio::test]
    async fn repeated_transient_failure_skips_line() {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(2),
        });
        let ing = ingestor(store, 1);
        assert_eq!(ing.ingest_line("a@b.com:pw").await, LineOutcome::Malformed);
        // The next line is unaffected.
        assert_eq!(ing.ingest_line("c@d.com:pw").await, LineOutcome::Added);
    }

    struct StalledStore;

    #[async_trait]
    impl CredentialStore for StalledStore {
        async fn resolve(&self, _kind: EntityKind, _value: &str) -> Result<i64, StoreError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(1)
        }

        async fn insert_record(&self, _triple: Triple) -> Result<RecordOutcome, StoreError> {
            Ok(RecordOutcome::Created)
        }
    }

    #[tokio::test]
    async fn store_timeout_skips_line() {
        let ing = ingestor(Arc::new(StalledStore), 1);
        assert_eq!(ing.ingest_line("a@b.com:pw").await, LineOutcome::Malformed);
    }

    /// Commits the first record, then stalls past the store timeout.
    struct SlowCommitStore {
        inner: MemoryStore,
        inserts: AtomicU32,
    }

    #[async_trait]
    impl CredentialStore for SlowCommitStore {
        async fn resolve(&self, kind: EntityKind, value: &str) -> Result<i64, StoreError> {
            self.inner.resolve(kind, value).await
        }

        async fn insert_record(&self, triple: Triple) -> Result<RecordOutcome, StoreError> {
            let outcome = self.inner.insert_record(triple).await;
            if self.inserts.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            outcome
        }
    }

    #[tokio::test]
    async fn timed_out_insert_is_not_retried() {
        let store = Arc::new(SlowCommitStore {
            inner: MemoryStore::new(),
            inserts: AtomicU32::new(0),
        });
        let ing = ingestor(store.clone(), 1);

        // A retry would find the committed row and call the line a duplicate.
        assert_eq!(ing.ingest_line("a@b.com:pw").await, LineOutcome::Malformed);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.record_count(), 1);

        assert_eq!(ing.ingest_line("a@b.com:pw").await, LineOutcome::Duplicate);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u64>>);

    impl ProgressReporter for Arc<Recorder> {
        fn report(&self, event: ProgressEvent) {
            if let ProgressEvent::Added { added, .. } = event {
                self.0.lock().unwrap().push(added);
            }
        }
    }

    #[tokio::test]
    async fn progress_fires_every_n_additions() {
        let recorder = Arc::new(Recorder::default());
        let ing = ingestor(Arc::new(MemoryStore::new()), 1)
            .with_reporter(Box::new(recorder.clone()));
        ingest_text(&ing, "a@x.com:1\nb@x.com:1\nc@x.com:1\nd@x.com:1\nd@x.com:1\n").await;
        assert_eq!(*recorder.0.lock().unwrap(), vec![2, 4]);
    }
}
