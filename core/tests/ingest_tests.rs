use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::{tempdir, TempDir};
use titledex_core::ingest::{ingest, snapshot_paths, IngestConfig, NoProgress, Progress};
use titledex_core::store::{IndexStore, MemoryStore, SledStore};
use titledex_core::tokenizer::{canonicalize, Canonicalizer};
use titledex_core::{Error, Index};

const BASICS: &str = "\
tconst\ttitleType\tprimaryTitle\toriginalTitle\tisAdult\tstartYear\tendYear\truntimeMinutes\tgenres
A1\tmovie\tIron Man\tIron Man\t0\t2008\t\\N\t126\tAction
A2\ttvSeries\tIron Fist\tIron Fist\t0\t2017\t2018\t55\tAction
A3\tmovie\tIron Adult\tIron Adult\t1\t2001\t\\N\t90\tAdult
A4\tshort\tIron Short\tIron Short\t0\t1999\t\\N\t5\tShort
A5\tmovie\tbroken row
A1\tmovie\tIron Man\tIron Man\t0\t2008\t\\N\t126\tAction
";

const AKAS: &str = "\
titleId\tordering\ttitle\tregion\tlanguage\ttypes\tattributes\tisOriginalTitle
A1\t1\tIron Man\tUS\t\\N\t\\N\t\\N\t0
A1\t2\tIron Man\tGB\t\\N\t\\N\t\\N\t0
A1\t3\tHomem de Ferro\tBR\tpt\t\\N\t\\N\t0
A2\t1\tIron Fist\tUS\t\\N\t\\N\t\\N\t0
A2\t2\tPuño de Hierro\t\\N\tes\t\\N\t\\N\t0
A3\t1\tIron Adult\tUS\t\\N\t\\N\t\\N\t0
A4\t1\tIron Short\tUS\t\\N\t\\N\t\\N\t0
";

fn snapshot(basics: &str, akas: &str) -> (TempDir, PathBuf, PathBuf) {
    let dir = tempdir().unwrap();
    let (basics_path, akas_path) = snapshot_paths(dir.path());
    fs::write(&basics_path, basics).unwrap();
    fs::write(&akas_path, akas).unwrap();
    (dir, basics_path, akas_path)
}

fn config(workers: usize) -> IngestConfig {
    IngestConfig { workers, channel_capacity: 2, ..IngestConfig::default() }
}

fn postings<S: IndexStore>(index: &Index<S>, stem: &str) -> Vec<u32> {
    let mut ids = index.query_stem(stem).unwrap();
    ids.sort_unstable();
    ids
}

#[test]
fn indexes_and_answers_title_queries() {
    let (_dir, basics, akas) = snapshot(BASICS, AKAS);
    let index = Index::new(SledStore::temporary().unwrap());
    ingest(&index, &basics, &akas, &config(3), &NoProgress).unwrap();

    assert_eq!(index.query_title("iron", true).unwrap(), vec!["A1", "A2"]);
    assert_eq!(index.query_title("iron man", true).unwrap(), vec!["A1"]);
    assert!(index.query_title("batman", true).unwrap().is_empty());
    assert_eq!(index.query_title("Homem de Ferro", false).unwrap(), vec!["A1"]);
    // Unknown-region and filtered rows never reach the index.
    assert!(index.query_title("puno", false).unwrap().is_empty());
    assert!(index.query_title("adult", true).unwrap().is_empty());
    assert!(index.query_title("short", true).unwrap().is_empty());
}

#[test]
fn reports_what_was_filtered() {
    let (_dir, basics, akas) = snapshot(BASICS, AKAS);
    let index = Index::new(MemoryStore::new());
    let stats = ingest(&index, &basics, &akas, &config(2), &NoProgress).unwrap();

    assert_eq!(stats.basics.rows, 5);
    assert_eq!(stats.basics.filtered, 2);
    assert_eq!(stats.basics.duplicates, 1);
    assert_eq!(stats.basics.inserted, 2);
    assert_eq!(stats.basics.reused, 0);

    assert_eq!(stats.titles.rows, 7);
    assert_eq!(stats.titles.filtered, 3);
    assert_eq!(stats.titles.duplicates, 1);
    assert_eq!(stats.titles.indexed, 3);
}

#[test]
fn rerunning_leaves_store_unchanged() {
    let (_dir, basics, akas) = snapshot(BASICS, AKAS);
    let index = Index::new(SledStore::temporary().unwrap());
    ingest(&index, &basics, &akas, &config(4), &NoProgress).unwrap();
    let first = index.store().entries().unwrap();

    let again = ingest(&index, &basics, &akas, &config(4), &NoProgress).unwrap();
    assert_eq!(again.basics.inserted, 0);
    assert_eq!(again.basics.reused, 2);
    assert_eq!(again.titles.postings_changed, 0);
    assert_eq!(index.store().entries().unwrap(), first);
}

#[test]
fn worker_count_does_not_change_the_result() {
    let (_dir, basics, akas) = snapshot(BASICS, AKAS);
    let serial = Index::new(MemoryStore::new());
    let parallel = Index::new(MemoryStore::new());
    ingest(&serial, &basics, &akas, &config(1), &NoProgress).unwrap();
    ingest(&parallel, &basics, &akas, &config(8), &NoProgress).unwrap();

    for stem in ["iron", "man", "fist", "homem", "de", "ferro"] {
        assert_eq!(postings(&serial, stem), postings(&parallel, stem), "{stem}");
    }
}

#[test]
fn same_title_of_different_works_is_indexed_for_each() {
    let basics = "\
tconst\ttitleType\tprimaryTitle\toriginalTitle\tisAdult
B1\tmovie\tHamlet\tHamlet\t0
B2\tmovie\tHamlet\tHamlet\t0
";
    let akas = "\
titleId\tordering\ttitle\tregion
B1\t1\tHamlet\tGB
B2\t1\tHamlet\tGB
";
    let (_dir, basics, akas) = snapshot(basics, akas);
    let index = Index::new(MemoryStore::new());
    ingest(&index, &basics, &akas, &config(2), &NoProgress).unwrap();
    assert_eq!(index.query_title("hamlet", true).unwrap(), vec!["B1", "B2"]);
}

#[test]
fn unreadable_row_fails_the_run() {
    let dir = tempdir().unwrap();
    let (basics, akas) = snapshot_paths(dir.path());
    fs::write(&basics, BASICS).unwrap();
    let mut bytes = AKAS.as_bytes().to_vec();
    bytes.extend_from_slice(b"A2\t9\t\xff\xfe\tUS\t\\N\t\\N\t\\N\t0\n");
    bytes.extend_from_slice(b"A2\t10\tIron Fist Again\tUS\t\\N\t\\N\t\\N\t0\n");
    fs::write(&akas, bytes).unwrap();

    let index = Index::new(MemoryStore::new());
    let err = ingest(&index, &basics, &akas, &config(2), &NoProgress).unwrap_err();
    assert!(matches!(err, Error::Parse { .. }));
    assert!(index.query_title("again", true).unwrap().is_empty());
}

/// Maps one title onto a stem the store refuses.
struct PoisonedTitle;

impl Canonicalizer for PoisonedTitle {
    fn canonicalize(&self, text: &str, use_stemming: bool) -> Vec<String> {
        if text == "Title 5" {
            vec!["\u{1}x".to_string()]
        } else {
            canonicalize(text, use_stemming)
        }
    }
}

#[test]
fn store_failure_while_writing_fails_the_run() {
    let mut basics = String::from("tconst\ttitleType\tprimaryTitle\toriginalTitle\tisAdult\n");
    let mut akas = String::from("titleId\tordering\ttitle\tregion\n");
    for i in 0..2000 {
        basics.push_str(&format!("C{i}\tmovie\tTitle {i}\tTitle {i}\t0\n"));
        akas.push_str(&format!("C{i}\t1\tTitle {i}\tUS\n"));
    }
    let (_dir, basics, akas) = snapshot(&basics, &akas);

    let index = Index::with_canonicalizer(MemoryStore::new(), PoisonedTitle);
    let config = IngestConfig { workers: 4, channel_capacity: 1, ..IngestConfig::default() };
    let err = ingest(&index, &basics, &akas, &config, &NoProgress).unwrap_err();
    assert!(matches!(err, Error::ReservedStem(ref stem) if stem == "\u{1}x"), "{err:?}");
}

#[test]
fn missing_snapshot_is_rejected_before_reading() {
    let dir = tempdir().unwrap();
    let (basics, akas) = snapshot_paths(dir.path());
    fs::write(&basics, BASICS).unwrap();
    let index = Index::new(MemoryStore::new());
    let err = ingest(&index, &basics, &akas, &config(1), &NoProgress).unwrap_err();
    assert!(matches!(err, Error::MissingSnapshot(p) if p == akas));
    assert_eq!(index.store().find_media("A1").unwrap(), None);
}

#[derive(Default)]
struct Recorder {
    basics: AtomicU64,
    titles: AtomicU64,
}

impl Progress for Recorder {
    fn report(&self, phase: &'static str, processed: u64) {
        let slot = if phase == "basics" { &self.basics } else { &self.titles };
        let previous = slot.swap(processed, Ordering::SeqCst);
        assert!(processed > previous, "{phase} went from {previous} to {processed}");
    }
}

#[test]
fn progress_counts_increase() {
    let (_dir, basics, akas) = snapshot(BASICS, AKAS);
    let index = Index::new(MemoryStore::new());
    let progress = Recorder::default();
    ingest(&index, &basics, &akas, &config(2), &progress).unwrap();
    assert_eq!(progress.basics.load(Ordering::SeqCst), 5);
    assert_eq!(progress.titles.load(Ordering::SeqCst), 7);
}

#[test]
fn reopened_store_keeps_media_ids() {
    let (dir, basics, akas) = snapshot(BASICS, AKAS);
    let db_path: PathBuf = dir.path().join("index.sled");
    {
        let index = Index::new(SledStore::open(&db_path).unwrap());
        ingest(&index, &basics, &akas, &config(2), &NoProgress).unwrap();
    }
    let index = Index::new(SledStore::open(&db_path).unwrap());
    let stats = ingest(&index, &basics, &akas, &config(2), &NoProgress).unwrap();
    assert_eq!(stats.basics.inserted, 0);
    assert_eq!(index.query_title("iron fist", true).unwrap(), vec!["A2"]);
}
