//! Inverted index storage.
//!
//! The sled backend keeps every namespace in the default tree, separated by a
//! leading byte that can never start a canonical token:
//!
//! | key                              | value                       |
//! |----------------------------------|-----------------------------|
//! | `0x00` + media id (u32 LE)       | external id (UTF-8)         |
//! | `0x01` + `meta`                  | [`StoreMeta`] as JSON       |
//! | `0x01` + `next_media_id`         | next media id (u32 LE)      |
//! | `0x02` + external id             | media id (u32 LE)           |
//! | stem (UTF-8)                     | posting list ([`codec`])    |

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Db;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::codec;
use crate::error::{Error, Result};
use crate::MediaId;

pub const MEDIA_PREFIX: u8 = 0x00;
pub const META_PREFIX: u8 = 0x01;
pub const EXTERNAL_PREFIX: u8 = 0x02;

pub const FORMAT_VERSION: u32 = 1;
pub const FIRST_MEDIA_ID: MediaId = 1;

const META_KEY: &[u8] = b"\x01meta";
const NEXT_MEDIA_ID_KEY: &[u8] = b"\x01next_media_id";

/// Capabilities the ingestion pipeline and query engine need from a backend.
pub trait IndexStore: Send + Sync {
    /// Assign the next media id to `external_id` and persist the mapping.
    ///
    /// This always allocates: calling it twice for one external id splits
    /// that work across two media ids. Use [`IndexStore::ensure_media`] when
    /// the id may already exist.
    fn insert_media(&self, external_id: &str) -> Result<MediaId>;

    fn find_media(&self, external_id: &str) -> Result<Option<MediaId>>;

    /// Look up `external_id`, inserting it if absent. The flag is `true` when
    /// a new media id was assigned.
    ///
    /// The default is not atomic: two callers racing on one external id can
    /// both allocate. Backends shared across threads override it.
    fn ensure_media(&self, external_id: &str) -> Result<(MediaId, bool)> {
        match self.find_media(external_id)? {
            Some(id) => Ok((id, false)),
            None => Ok((self.insert_media(external_id)?, true)),
        }
    }

    /// Add `media_id` to the posting list of every stem, all or nothing.
    /// Returns how many posting lists changed.
    fn insert_stems(&self, media_id: MediaId, stems: &[String]) -> Result<usize>;

    fn query_media(&self, media_id: MediaId) -> Result<Option<String>>;

    /// The posting list for `stem`; empty when the stem was never indexed.
    fn query_stem(&self, stem: &str) -> Result<Vec<MediaId>>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

fn check_stem(stem: &str) -> Result<()> {
    match stem.as_bytes().first() {
        Some(&b) if b > EXTERNAL_PREFIX => Ok(()),
        _ => Err(Error::ReservedStem(stem.to_string())),
    }
}

fn media_key(media_id: MediaId) -> [u8; 5] {
    let mut key = [MEDIA_PREFIX; 5];
    key[1..].copy_from_slice(&media_id.to_le_bytes());
    key
}

fn external_key(external_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(external_id.len() + 1);
    key.push(EXTERNAL_PREFIX);
    key.extend_from_slice(external_id.as_bytes());
    key
}

fn decode_id(bytes: &[u8]) -> Option<MediaId> {
    let raw: [u8; 4] = bytes.try_into().ok()?;
    Some(MediaId::from_le_bytes(raw))
}

fn next_id(media_id: MediaId) -> Result<MediaId> {
    media_id.checked_add(1).ok_or(Error::MediaIdsExhausted(media_id))
}

fn unwrap_tx(err: TransactionError<Error>) -> Error {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => Error::Storage(e),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub format_version: u32,
    pub created_at: String,
}

impl StoreMeta {
    fn new() -> Self {
        let created_at = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "".into());
        Self { format_version: FORMAT_VERSION, created_at }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub media: u64,
    pub stems: u64,
    pub next_media_id: MediaId,
    pub created_at: String,
}

/// Index store on an embedded sled database. Only one process may hold it.
pub struct SledStore {
    db: Db,
    next_media_id: Mutex<MediaId>,
    meta: StoreMeta,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// A store that is deleted when dropped.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        let meta = match db.get(META_KEY)? {
            Some(raw) => {
                let meta: StoreMeta = serde_json::from_slice(&raw)?;
                if meta.format_version != FORMAT_VERSION {
                    return Err(Error::FormatVersion { found: meta.format_version, expected: FORMAT_VERSION });
                }
                meta
            }
            None => {
                let meta = StoreMeta::new();
                db.insert(META_KEY, serde_json::to_vec(&meta)?)?;
                meta
            }
        };
        let next = match db.get(NEXT_MEDIA_ID_KEY)? {
            Some(raw) => decode_id(&raw).ok_or_else(|| Error::Corrupt("unreadable media id counter".into()))?,
            None => reconstruct_next_media_id(&db)?,
        };
        tracing::info!(next_media_id = next, created_at = %meta.created_at, "opened index store");
        Ok(Self { db, next_media_id: Mutex::new(next), meta })
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let (mut media, mut stems) = (0u64, 0u64);
        for key in self.db.iter().keys() {
            match key?.first() {
                Some(&MEDIA_PREFIX) => media += 1,
                Some(&b) if b > EXTERNAL_PREFIX => stems += 1,
                _ => {}
            }
        }
        Ok(StoreStats { media, stems, next_media_id: *self.next_media_id.lock(), created_at: self.meta.created_at.clone() })
    }

    /// Every key/value pair in key order.
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.db
            .iter()
            .map(|kv| kv.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(Error::from))
            .collect()
    }
}

fn reconstruct_next_media_id(db: &Db) -> Result<MediaId> {
    let mut highest: Option<MediaId> = None;
    for key in db.scan_prefix([MEDIA_PREFIX]).keys() {
        let key = key?;
        let id = decode_id(&key[1..]).ok_or_else(|| Error::Corrupt(format!("bad media key {key:?}")))?;
        highest = highest.max(Some(id));
    }
    match highest {
        None => Ok(FIRST_MEDIA_ID),
        Some(id) => {
            tracing::warn!(highest = id, "media id counter missing, rebuilt from media records");
            next_id(id)
        }
    }
}

impl SledStore {
    // Caller holds the counter lock for the whole allocation.
    fn allocate_media(&self, next: &mut MediaId, external_id: &str) -> Result<MediaId> {
        let media_id = *next;
        let following = next_id(media_id)?;
        let record_key = media_key(media_id);
        let reverse_key = external_key(external_id);
        self.db
            .transaction(|tx| {
                tx.insert(&record_key[..], external_id.as_bytes())?;
                tx.insert(reverse_key.as_slice(), &media_id.to_le_bytes()[..])?;
                tx.insert(NEXT_MEDIA_ID_KEY, &following.to_le_bytes()[..])?;
                Ok::<_, ConflictableTransactionError<Error>>(())
            })
            .map_err(unwrap_tx)?;
        *next = following;
        tracing::debug!(media_id, external_id, "inserted media");
        Ok(media_id)
    }
}

impl IndexStore for SledStore {
    fn insert_media(&self, external_id: &str) -> Result<MediaId> {
        let mut next = self.next_media_id.lock();
        self.allocate_media(&mut next, external_id)
    }

    /// The lookup runs under the counter lock, so concurrent callers with the
    /// same external id share one media id.
    fn ensure_media(&self, external_id: &str) -> Result<(MediaId, bool)> {
        let mut next = self.next_media_id.lock();
        match self.find_media(external_id)? {
            Some(id) => Ok((id, false)),
            None => Ok((self.allocate_media(&mut next, external_id)?, true)),
        }
    }

    fn find_media(&self, external_id: &str) -> Result<Option<MediaId>> {
        match self.db.get(external_key(external_id))? {
            None => Ok(None),
            Some(raw) => decode_id(&raw)
                .map(Some)
                .ok_or_else(|| Error::Corrupt(format!("bad media id for {external_id:?}"))),
        }
    }

    fn insert_stems(&self, media_id: MediaId, stems: &[String]) -> Result<usize> {
        for stem in stems {
            check_stem(stem)?;
        }
        self.db
            .transaction(|tx| {
                let mut changed = 0;
                for stem in stems {
                    let mut list = tx.get(stem.as_bytes())?.map(|v| v.to_vec()).unwrap_or_default();
                    if !codec::is_well_formed(&list) {
                        return Err(ConflictableTransactionError::Abort(Error::Corrupt(format!(
                            "posting list for {stem:?} has {} bytes",
                            list.len()
                        ))));
                    }
                    if codec::append_if_absent(&mut list, media_id) {
                        tx.insert(stem.as_bytes(), list)?;
                        changed += 1;
                    }
                }
                Ok(changed)
            })
            .map_err(unwrap_tx)
    }

    fn query_media(&self, media_id: MediaId) -> Result<Option<String>> {
        match self.db.get(media_key(media_id))? {
            None => Ok(None),
            Some(raw) => String::from_utf8(raw.to_vec())
                .map(Some)
                .map_err(|_| Error::Corrupt(format!("external id of media {media_id} is not UTF-8"))),
        }
    }

    fn query_stem(&self, stem: &str) -> Result<Vec<MediaId>> {
        check_stem(stem)?;
        match self.db.get(stem.as_bytes())? {
            None => Ok(Vec::new()),
            Some(raw) if codec::is_well_formed(&raw) => Ok(codec::decode(&raw)),
            Some(raw) => Err(Error::Corrupt(format!("posting list for {stem:?} has {} bytes", raw.len()))),
        }
    }

    fn flush(&self) -> Result<()> {
        let bytes = self.db.flush()?;
        tracing::debug!(bytes, "flushed index store");
        Ok(())
    }
}

/// Index store held entirely in memory. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    // media id N lives at index N - 1
    media: Vec<String>,
    by_external: HashMap<String, MediaId>,
    stems: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryState {
    fn allocate_media(&mut self, external_id: &str) -> Result<MediaId> {
        let last = MediaId::try_from(self.media.len()).map_err(|_| Error::MediaIdsExhausted(MediaId::MAX))?;
        let media_id = next_id(last)?;
        self.media.push(external_id.to_string());
        self.by_external.insert(external_id.to_string(), media_id);
        Ok(media_id)
    }
}

impl IndexStore for MemoryStore {
    fn insert_media(&self, external_id: &str) -> Result<MediaId> {
        self.state.write().allocate_media(external_id)
    }

    fn ensure_media(&self, external_id: &str) -> Result<(MediaId, bool)> {
        let mut state = self.state.write();
        match state.by_external.get(external_id) {
            Some(&id) => Ok((id, false)),
            None => Ok((state.allocate_media(external_id)?, true)),
        }
    }

    fn find_media(&self, external_id: &str) -> Result<Option<MediaId>> {
        Ok(self.state.read().by_external.get(external_id).copied())
    }

    fn insert_stems(&self, media_id: MediaId, stems: &[String]) -> Result<usize> {
        for stem in stems {
            check_stem(stem)?;
        }
        let mut state = self.state.write();
        let mut changed = 0;
        for stem in stems {
            let list = state.stems.entry(stem.clone()).or_default();
            if codec::append_if_absent(list, media_id) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn query_media(&self, media_id: MediaId) -> Result<Option<String>> {
        let index = (media_id as usize).checked_sub(1);
        Ok(index.and_then(|i| self.state.read().media.get(i).cloned()))
    }

    fn query_stem(&self, stem: &str) -> Result<Vec<MediaId>> {
        check_stem(stem)?;
        Ok(self.state.read().stems.get(stem).map(|l| codec::decode(l)).unwrap_or_default())
    }
}
