//! Deterministic text normalization.
//!
//! Seeds and variations are compared by their normalized form, never by
//! their raw text. The pipeline below is applied in a fixed order so the
//! output is reproducible across runs and implementations:
//!
//! 1. trim leading/trailing whitespace
//! 2. lowercase
//! 3. canonical decomposition (NFD), then drop combining marks
//! 4. collapse whitespace runs to a single ASCII space
//! 5. optionally collapse runs of 3+ identical characters (opt-in, lossy)
//!
//! [`content_hash`] fingerprints a normalized value for indexing. It is
//! not a security primitive; identity is enforced by the store's unique
//! constraint on the normalized text.

use md5::{Digest, Md5};
use unicode_normalization::char::canonical_combining_class;
use unicode_normalization::UnicodeNormalization;

/// Normalization rules shared by the ingest engine and the query surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Normalizer {
    pub collapse_repeats: bool,
}

impl Normalizer {
    pub fn new(collapse_repeats: bool) -> Self {
        Self { collapse_repeats }
    }

    pub fn seed(&self, text: &str) -> String {
        normalize_seed(text, self.collapse_repeats)
    }

    pub fn variation(&self, text: &str) -> String {
        normalize_variation(text, self.collapse_repeats)
    }
}

/// Whitespace for trimming and collapsing: Unicode `White_Space` plus the
/// file/group/record/unit separators U+001C..U+001F.
pub fn is_space(c: char) -> bool {
    c.is_whitespace() || ('\u{1c}'..='\u{1f}').contains(&c)
}

/// Normalize an arbitrary string. See the module docs for the exact steps.
pub fn normalize_text(text: &str, collapse_repeats: bool) -> String {
    let lowered = text.trim_matches(is_space).to_lowercase();

    let stripped: String = lowered
        .nfd()
        .filter(|c| canonical_combining_class(*c) == 0)
        .collect();

    // empty pieces also drop whitespace exposed by mark removal at the edges
    let collapsed = stripped
        .split(is_space)
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if collapse_repeats {
        collapse_runs(&collapsed)
    } else {
        collapsed
    }
}

/// Normalize a seed name. Delegates to [`normalize_text`].
pub fn normalize_seed(text: &str, collapse_repeats: bool) -> String {
    normalize_text(text, collapse_repeats)
}

/// Normalize a variation. Same rules as seeds for now.
pub fn normalize_variation(text: &str, collapse_repeats: bool) -> String {
    normalize_text(text, collapse_repeats)
}

/// 128-bit MD5 of the UTF-8 bytes of `normalized`, as 32 lowercase hex chars.
pub fn content_hash(normalized: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Replace every run of three or more identical characters with one.
fn collapse_runs(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let mut j = i + 1;
        while j < chars.len() && chars[j] == c {
            j += 1;
        }
        let run = j - i;
        if run >= 3 {
            out.push(c);
        } else {
            out.extend(std::iter::repeat(c).take(run));
        }
        i = j;
    }
    out
}
