use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::UnicodeNormalization;
use std::collections::BTreeSet;

lazy_static! {
    static ref HYPHENS: Regex = Regex::new(r"[-\u{2013}\u{2014}]").expect("valid regex");
    static ref PUNCTUATION: Regex = Regex::new(r"\p{P}+").expect("valid regex");
    static ref NONSPACING_MARKS: Regex = Regex::new(r"\p{Mn}+").expect("valid regex");
    static ref WORDS: Regex = Regex::new(r"[\p{L}\p{Nd}]+").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
}

/// Turns title text into the tokens stored in and looked up from the index.
///
/// Indexing and querying must go through the same implementation, otherwise
/// query tokens will not line up with stored stems.
pub trait Canonicalizer: Send + Sync {
    fn canonicalize(&self, text: &str, use_stemming: bool) -> Vec<String>;
}

/// The default pipeline: see [`canonicalize`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TitleCanonicalizer;

impl Canonicalizer for TitleCanonicalizer {
    fn canonicalize(&self, text: &str, use_stemming: bool) -> Vec<String> {
        canonicalize(text, use_stemming)
    }
}

/// Normalize a title into a sorted, duplicate-free list of tokens.
///
/// Lowercases, splits on hyphens/dashes and slashes, drops punctuation and
/// diacritics, then extracts runs of letters and digits. With `use_stemming`
/// each word is reduced with the English (Porter2) stemmer; leave it off for
/// non-English titles.
pub fn canonicalize(text: &str, use_stemming: bool) -> Vec<String> {
    let lowered = text.to_lowercase();
    let spaced = HYPHENS.replace_all(&lowered, " ").replace('/', " ");
    let stripped = PUNCTUATION.replace_all(&spaced, "");
    let plain = strip_accents(&stripped);

    let tokens: BTreeSet<String> = WORDS
        .find_iter(&plain)
        .map(|m| {
            if use_stemming {
                STEMMER.stem(m.as_str()).into_owned()
            } else {
                m.as_str().to_string()
            }
        })
        .collect();
    tokens.into_iter().collect()
}

fn strip_accents(text: &str) -> String {
    let decomposed: String = text.nfd().collect();
    NONSPACING_MARKS.replace_all(&decomposed, "").nfc().collect()
}
