//! Deterministic sparse keyword encoding.
//!
//! The sparse signal needs no external service: identifiers are split into
//! lowercase sub-tokens and weighted by log-scaled term frequency, so the
//! same text always produces the same vector and tests can recompute it
//! offline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Token -> weight mapping; `BTreeMap` keeps iteration order stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    weights: BTreeMap<String, f32>,
}

impl SparseVector {
    /// Encode text into a weighted token map.
    ///
    /// Weights follow `1 + ln(tf)` so a token repeated many times does not
    /// drown out the rest of the chunk.
    #[must_use]
    pub fn encode(text: &str) -> Self {
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_default() += 1;
        }

        let weights = counts
            .into_iter()
            .map(|(token, tf)| {
                #[allow(clippy::cast_precision_loss)]
                let w = 1.0 + (tf as f32).ln();
                (token, w)
            })
            .collect();

        Self { weights }
    }

    /// Dot product over shared tokens.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f32 {
        // Iterate the smaller map.
        let (small, large) = if self.weights.len() <= other.weights.len() {
            (&self.weights, &other.weights)
        } else {
            (&other.weights, &self.weights)
        };
        small
            .iter()
            .filter_map(|(token, w)| large.get(token).map(|v| w * v))
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.weights.iter().map(|(t, w)| (t.as_str(), *w))
    }

    /// Project tokens onto stable `u32` dimension ids for backends that
    /// address sparse dimensions numerically (Qdrant).
    #[must_use]
    pub fn to_indexed(&self) -> (Vec<u32>, Vec<f32>) {
        let mut pairs: Vec<(u32, f32)> = self
            .weights
            .iter()
            .map(|(token, w)| (dimension_id(token), *w))
            .collect();
        pairs.sort_unstable_by_key(|(id, _)| *id);
        pairs.dedup_by_key(|(id, _)| *id);
        pairs.into_iter().unzip()
    }
}

/// Stable numeric id for a token: first four little-endian bytes of its
/// blake3 digest.
#[must_use]
pub fn dimension_id(token: &str) -> u32 {
    let hash = blake3::hash(token.as_bytes());
    let b = hash.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

/// Split text into lowercase sub-tokens: non-alphanumeric boundaries first,
/// then camelCase humps. Tokens shorter than two chars and pure numbers are
/// dropped.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .flat_map(split_camel)
        .filter_map(|part| {
            if part.len() < 2 || part.chars().all(|c| c.is_ascii_digit()) {
                None
            } else {
                Some(part.to_lowercase())
            }
        })
        .collect::<Vec<_>>()
        .into_iter()
}

/// Split a word at camelCase boundaries: `parseHTTPRequest` becomes
/// `["parse", "HTTP", "Request"]`.
fn split_camel(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        let prev_lower = i > 0 && chars[i - 1].is_lowercase();
        let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
        let boundary = c.is_uppercase() && (prev_lower || (i > 0 && next_lower));

        if boundary && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
