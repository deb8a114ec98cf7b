//! Snapshot ingestion: basics table first (assigns media ids), then the alias
//! table (indexes titles).
//!
//! Titles flow reader → worker pool (filter, canonicalize) → single writer.
//! The first failure stops new rows from being dispatched; work already
//! canonicalized is still written before the error is returned.

use crossbeam_channel::{bounded, Receiver, Sender};
use csv::StringRecord;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crate::error::{Error, Result};
use crate::record::{AkaRow, BasicsRow};
use crate::store::IndexStore;
use crate::tsv::{read_tsv, DEFAULT_CAPACITY};
use crate::{Index, MediaId, SeenTitles};

pub const MEDIA_TYPE_ALLOWLIST: &[&str] = &["movie", "tvMovie", "tvSeries", "tvMiniSeries", "tvSpecial", "video"];
pub const ENGLISH_REGIONS: &[&str] = &["GB", "US"];

/// External id → media id for every work admitted by the basics phase.
pub type MediaIds = HashMap<String, MediaId>;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub workers: usize,
    pub channel_capacity: usize,
    /// Regions whose titles are stemmed as English.
    pub english_regions: HashSet<String>,
    pub media_types: HashSet<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            channel_capacity: DEFAULT_CAPACITY,
            english_regions: ENGLISH_REGIONS.iter().map(|s| s.to_string()).collect(),
            media_types: MEDIA_TYPE_ALLOWLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl IngestConfig {
    pub fn admits(&self, row: &BasicsRow) -> bool {
        !row.adult && self.media_types.contains(&row.media_type)
    }

    pub fn use_stemming(&self, region: &str) -> bool {
        self.english_regions.contains(region)
    }
}

/// Receives the running count of rows processed in a phase. Counts only
/// grow within a phase.
pub trait Progress: Sync {
    fn report(&self, phase: &'static str, processed: u64);
}

pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&self, _phase: &'static str, _processed: u64) {}
}

/// Logs a line every `every` rows.
pub struct LogProgress {
    pub every: u64,
}

impl Progress for LogProgress {
    fn report(&self, phase: &'static str, processed: u64) {
        if self.every > 0 && processed % self.every == 0 {
            tracing::info!(phase, processed, "ingestion progress");
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BasicsStats {
    pub rows: u64,
    pub filtered: u64,
    pub duplicates: u64,
    pub inserted: u64,
    pub reused: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct TitleStats {
    pub rows: u64,
    pub filtered: u64,
    pub duplicates: u64,
    pub indexed: u64,
    pub postings_changed: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub basics: BasicsStats,
    pub titles: TitleStats,
}

/// Fail unless the snapshot file has already been fetched.
pub fn require_snapshot(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::MissingSnapshot(path.to_path_buf()))
    }
}

/// Run both phases against an opened index and flush it.
pub fn ingest<S: IndexStore>(
    index: &Index<S>,
    basics: &Path,
    akas: &Path,
    config: &IngestConfig,
    progress: &dyn Progress,
) -> Result<IngestStats> {
    require_snapshot(basics)?;
    require_snapshot(akas)?;

    let (media_ids, basics_stats) = load_basics(index, basics, config, progress)?;
    index.store().flush()?;
    let title_stats = load_titles(index, akas, &media_ids, config, progress)?;
    index.store().flush()?;

    Ok(IngestStats { basics: basics_stats, titles: title_stats })
}

/// Assign media ids to every admitted row of the basics table. Ids already in
/// the store are reused, so re-running over the same snapshot is a no-op.
pub fn load_basics<S: IndexStore>(
    index: &Index<S>,
    path: &Path,
    config: &IngestConfig,
    progress: &dyn Progress,
) -> Result<(MediaIds, BasicsStats)> {
    tracing::info!(path = %path.display(), "loading basics");
    let mut media_ids = MediaIds::new();
    let mut stats = BasicsStats::default();

    for record in read_tsv(path, config.channel_capacity)? {
        let record = record?;
        stats.rows += 1;
        progress.report("basics", stats.rows);

        let Some(row) = BasicsRow::from_record(&record) else {
            stats.filtered += 1;
            continue;
        };
        if !config.admits(&row) {
            stats.filtered += 1;
            continue;
        }
        if media_ids.contains_key(&row.external_id) {
            tracing::debug!(external_id = %row.external_id, "duplicate basics row");
            stats.duplicates += 1;
            continue;
        }

        let (media_id, created) = index.store().ensure_media(&row.external_id)?;
        if created {
            stats.inserted += 1;
        } else {
            stats.reused += 1;
        }
        media_ids.insert(row.external_id, media_id);
    }

    tracing::info!(?stats, "basics loaded");
    Ok((media_ids, stats))
}

/// Canonicalize and index every alias row belonging to an admitted work.
pub fn load_titles<S: IndexStore>(
    index: &Index<S>,
    path: &Path,
    media_ids: &MediaIds,
    config: &IngestConfig,
    progress: &dyn Progress,
) -> Result<TitleStats> {
    tracing::info!(path = %path.display(), workers = config.workers, "indexing titles");
    let records = read_tsv(path, config.channel_capacity)?;
    let capacity = config.channel_capacity.max(1);
    let (row_tx, row_rx) = bounded::<StringRecord>(capacity);
    let (title_tx, title_rx) = bounded::<Canonical>(capacity);

    let seen = SeenTitles::new();
    let abort = Abort::default();
    let counters = Counters::default();
    let worker = TitleWorker { index, media_ids, config, seen: &seen, abort: &abort, counters: &counters };
    let counters_ref = &counters;
    let abort_ref = &abort;

    let panicked = thread::scope(|scope| {
        let writer = scope.spawn(move || write_titles(index, title_rx, abort_ref, counters_ref));
        let workers: Vec<_> = (0..config.workers.max(1))
            .map(|_| {
                let rows = row_rx.clone();
                let out = title_tx.clone();
                scope.spawn(move || worker.run(rows, out))
            })
            .collect();
        drop(row_rx);
        drop(title_tx);

        for record in records {
            if abort.is_set() {
                break;
            }
            match record {
                Ok(record) => {
                    if row_tx.send(record).is_err() {
                        break;
                    }
                    let rows = counters.rows.fetch_add(1, Ordering::Relaxed) + 1;
                    progress.report("titles", rows);
                }
                Err(e) => {
                    abort.fail(e);
                    break;
                }
            }
        }
        drop(row_tx);

        let mut panicked = false;
        for handle in workers {
            panicked |= handle.join().is_err();
        }
        panicked |= writer.join().is_err();
        panicked
    });

    if let Some(e) = abort.into_error() {
        return Err(e);
    }
    if panicked {
        return Err(Error::WorkerPanicked);
    }

    let stats = counters.snapshot();
    tracing::info!(?stats, distinct_titles = seen.len(), "titles indexed");
    Ok(stats)
}

struct Canonical {
    media_id: MediaId,
    stems: Vec<String>,
}

#[derive(Default)]
struct Counters {
    rows: AtomicU64,
    filtered: AtomicU64,
    duplicates: AtomicU64,
    indexed: AtomicU64,
    postings_changed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TitleStats {
        TitleStats {
            rows: self.rows.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            postings_changed: self.postings_changed.load(Ordering::Relaxed),
        }
    }
}

/// First error of a run, plus a flag telling producers to stop.
#[derive(Default)]
struct Abort {
    cancelled: AtomicBool,
    first: Mutex<Option<Error>>,
}

impl Abort {
    fn fail(&self, err: Error) {
        let mut first = self.first.lock();
        if first.is_none() {
            tracing::error!(error = %err, "ingestion failed, draining in-flight titles");
            *first = Some(err);
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_set(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn into_error(self) -> Option<Error> {
        self.first.into_inner()
    }
}

struct TitleWorker<'a, S> {
    index: &'a Index<S>,
    media_ids: &'a MediaIds,
    config: &'a IngestConfig,
    seen: &'a SeenTitles,
    abort: &'a Abort,
    counters: &'a Counters,
}

impl<S> Clone for TitleWorker<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for TitleWorker<'_, S> {}

impl<S: IndexStore> TitleWorker<'_, S> {
    fn run(self, rows: Receiver<StringRecord>, out: Sender<Canonical>) {
        for record in rows {
            if self.abort.is_set() {
                break;
            }
            let Some(canonical) = self.prepare(&record) else {
                continue;
            };
            if out.send(canonical).is_err() {
                break;
            }
        }
    }

    fn prepare(&self, record: &StringRecord) -> Option<Canonical> {
        let row = AkaRow::from_record(record);
        let admitted = row.and_then(|row| {
            let media_id = *self.media_ids.get(&row.external_id)?;
            let region = row.region?;
            Some((media_id, row.title, region))
        });
        let Some((media_id, title, region)) = admitted else {
            Counters::bump(&self.counters.filtered, 1);
            return None;
        };

        let use_stemming = self.config.use_stemming(&region);
        if !self.seen.claim(media_id, &title, use_stemming) {
            Counters::bump(&self.counters.duplicates, 1);
            return None;
        }
        let stems = self.index.canonicalize(&title, use_stemming);
        Some(Canonical { media_id, stems })
    }
}

fn write_titles<S: IndexStore>(index: &Index<S>, titles: Receiver<Canonical>, abort: &Abort, counters: &Counters) {
    for title in titles {
        match index.store().insert_stems(title.media_id, &title.stems) {
            Ok(changed) => {
                Counters::bump(&counters.indexed, 1);
                Counters::bump(&counters.postings_changed, changed as u64);
            }
            Err(e) => {
                abort.fail(e);
                break;
            }
        }
    }
}

/// Default snapshot locations inside a work directory.
pub fn snapshot_paths(workdir: &Path) -> (PathBuf, PathBuf) {
    (workdir.join("title.basics.tsv"), workdir.join("title.akas.tsv"))
}
