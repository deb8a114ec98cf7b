//! Streaming reader for header-prefixed, tab-separated snapshot tables.

use crossbeam_channel::{bounded, Receiver, Sender};
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::thread;

use crate::error::{Error, Result};

/// Rows buffered between the reader thread and its consumer.
pub const DEFAULT_CAPACITY: usize = 1024;

/// A single-pass sequence of rows produced on a background thread.
///
/// The header row is consumed and never yielded. Rows whose field count
/// differs from the header are skipped. An unreadable row is yielded once as
/// an `Err`, after which the sequence ends.
pub struct TsvRecords {
    rx: Receiver<Result<StringRecord>>,
}

impl Iterator for TsvRecords {
    type Item = Result<StringRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

/// Open `path` and start streaming its rows. `capacity` bounds how far the
/// reader may run ahead of the consumer.
pub fn read_tsv<P: AsRef<Path>>(path: P, capacity: usize) -> Result<TsvRecords> {
    let path = path.as_ref().to_path_buf();
    let file = File::open(&path).map_err(|source| Error::Io { path: path.clone(), source })?;
    let (tx, rx) = bounded(capacity.max(1));
    let name = path.clone();
    thread::Builder::new()
        .name("tsv-reader".into())
        .spawn(move || produce(file, name, tx))
        .map_err(|source| Error::Io { path, source })?;
    Ok(TsvRecords { rx })
}

fn produce(file: File, path: PathBuf, tx: Sender<Result<StringRecord>>) {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(file);
    let mut rows = reader.records();

    let width = match rows.next() {
        None => return,
        Some(Ok(header)) => header.len(),
        Some(Err(source)) => {
            let _ = tx.send(Err(Error::Parse { path, source }));
            return;
        }
    };

    let mut sent = 0u64;
    let mut skipped = 0u64;
    for row in rows {
        match row {
            Ok(record) if record.len() != width => skipped += 1,
            Ok(record) => {
                if tx.send(Ok(record)).is_err() {
                    tracing::debug!(path = %path.display(), "consumer hung up");
                    return;
                }
                sent += 1;
            }
            Err(source) => {
                let _ = tx.send(Err(Error::Parse { path, source }));
                return;
            }
        }
    }
    tracing::debug!(path = %path.display(), sent, skipped, "finished reading table");
}
