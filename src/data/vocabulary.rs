// ============================================================
// Layer 4 — Character Vocabulary
// ============================================================
// A closed, character-level vocabulary:
//
//   chars    — sorted unique characters of the corpus
//   index    — char → dense id, assigned in sorted order
//
// Building on identical text always yields identical ids, so a
// checkpoint's vocabulary can be re-applied to new text. Encoding
// silently drops characters the vocabulary has never seen.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<char>", into = "Vec<char>")]
pub struct Vocabulary {
    chars: Vec<char>,
    index: HashMap<char, u32>,
}

impl Vocabulary {
    pub fn build(text: &str) -> Self {
        let mut chars: Vec<char> = text.chars().collect();
        chars.sort_unstable();
        chars.dedup();
        Self::from(chars)
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        text.chars().filter_map(|c| self.index.get(&c).copied()).collect()
    }

    /// Ids outside the vocabulary decode to nothing.
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .filter_map(|&i| self.chars.get(i as usize))
            .collect()
    }

    /// Per-token labels, `?` for ids outside the vocabulary.
    pub fn labels(&self, ids: &[u32]) -> Vec<String> {
        ids.iter()
            .map(|&i| self.chars.get(i as usize).map_or_else(|| "?".to_string(), |c| c.to_string()))
            .collect()
    }
}

impl From<Vec<char>> for Vocabulary {
    fn from(chars: Vec<char>) -> Self {
        let index = chars
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i as u32))
            .collect();
        Self { chars, index }
    }
}

impl From<Vocabulary> for Vec<char> {
    fn from(v: Vocabulary) -> Self {
        v.chars
    }
}
