use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::tokenizer::Canonicalizer;
use crate::MediaId;

/// A parsed query: the canonical tokens every match must contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub stems: Vec<String>,
}

impl Query {
    /// Canonicalize `text` exactly as titles are canonicalized at index time.
    /// Text without any searchable token is rejected rather than matching
    /// everything.
    pub fn parse(canonicalizer: &dyn Canonicalizer, text: &str, use_stemming: bool) -> Result<Self> {
        let stems = canonicalizer.canonicalize(text, use_stemming);
        if stems.is_empty() {
            return Err(Error::EmptyQuery(text.to_string()));
        }
        Ok(Self { text: text.to_string(), stems })
    }
}

/// AND of posting lists, folded left to right. Returned in ascending id order.
pub fn intersect(lists: &[Vec<MediaId>]) -> Vec<MediaId> {
    let mut sets = lists.iter().map(|l| l.iter().copied().collect::<HashSet<_>>());
    let Some(first) = sets.next() else {
        return Vec::new();
    };
    let common = sets.fold(first, |acc, set| {
        if acc.is_empty() {
            acc
        } else {
            acc.intersection(&set).copied().collect()
        }
    });
    let mut ids: Vec<MediaId> = common.into_iter().collect();
    ids.sort_unstable();
    ids
}
