use parking_lot::Mutex;
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::query::{self, Query};
use crate::store::IndexStore;
use crate::tokenizer::{Canonicalizer, TitleCanonicalizer};

pub type MediaId = u32;

/// Titles already indexed during one ingestion run.
///
/// Keyed by media, literal title and stemming mode, so identical titles of
/// different works are each indexed. Not persisted: re-indexing after a
/// restart is harmless because posting-list inserts are idempotent.
#[derive(Default)]
pub struct SeenTitles {
    inner: Mutex<HashSet<(MediaId, String, bool)>>,
}

impl SeenTitles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a title as taken. Returns `false` if it was already marked.
    pub fn claim(&self, media_id: MediaId, title: &str, use_stemming: bool) -> bool {
        self.inner.lock().insert((media_id, title.to_string(), use_stemming))
    }

    pub fn release(&self, media_id: MediaId, title: &str, use_stemming: bool) {
        self.inner.lock().remove(&(media_id, title.to_string(), use_stemming));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A store paired with the canonicalizer used to fill and query it.
pub struct Index<S> {
    store: S,
    canonicalizer: Box<dyn Canonicalizer>,
}

impl<S: IndexStore> Index<S> {
    pub fn new(store: S) -> Self {
        Self::with_canonicalizer(store, TitleCanonicalizer)
    }

    pub fn with_canonicalizer<C: Canonicalizer + 'static>(store: S, canonicalizer: C) -> Self {
        Self { store, canonicalizer: Box::new(canonicalizer) }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn canonicalize(&self, text: &str, use_stemming: bool) -> Vec<String> {
        self.canonicalizer.canonicalize(text, use_stemming)
    }

    pub fn insert_media(&self, external_id: &str) -> Result<MediaId> {
        self.store.insert_media(external_id)
    }

    /// Index `title` under `media_id` unless `seen` already has it.
    /// Returns whether the title was indexed by this call.
    pub fn insert_stems(&self, seen: &SeenTitles, media_id: MediaId, title: &str, use_stemming: bool) -> Result<bool> {
        if !seen.claim(media_id, title, use_stemming) {
            return Ok(false);
        }
        let stems = self.canonicalize(title, use_stemming);
        if let Err(e) = self.store.insert_stems(media_id, &stems) {
            seen.release(media_id, title, use_stemming);
            return Err(e);
        }
        Ok(true)
    }

    pub fn query_media(&self, media_id: MediaId) -> Result<Option<String>> {
        self.store.query_media(media_id)
    }

    pub fn query_stem(&self, stem: &str) -> Result<Vec<MediaId>> {
        self.store.query_stem(stem)
    }

    pub fn parse_query(&self, text: &str, use_stemming: bool) -> Result<Query> {
        Query::parse(self.canonicalizer.as_ref(), text, use_stemming)
    }

    /// External ids of every media whose titles contain all query stems.
    pub fn search(&self, query: &Query) -> Result<Vec<String>> {
        let mut lists = Vec::with_capacity(query.stems.len());
        for stem in &query.stems {
            let ids = self.store.query_stem(stem)?;
            if ids.is_empty() {
                tracing::debug!(stem = %stem, "stem not indexed, no matches");
                return Ok(Vec::new());
            }
            lists.push(ids);
        }

        let mut external_ids = Vec::new();
        for media_id in query::intersect(&lists) {
            match self.store.query_media(media_id)? {
                Some(external_id) => external_ids.push(external_id),
                None => {
                    return Err(Error::Corrupt(format!("posting list references missing media {media_id}")));
                }
            }
        }
        Ok(external_ids)
    }

    pub fn query_title(&self, text: &str, use_stemming: bool) -> Result<Vec<String>> {
        let query = self.parse_query(text, use_stemming)?;
        self.search(&query)
    }
}
