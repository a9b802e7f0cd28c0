// ============================================================
// Layer 4 — Prepared Token Corpus
// ============================================================
// text → vocabulary → encoded ids → (train, val) split
//
// A session resumed from a checkpoint brings its own vocabulary;
// the new text is encoded with it and unseen characters vanish.

use crate::data::{splitter::split_train_val, vocabulary::Vocabulary};
use crate::domain::records::CorpusStats;

#[derive(Debug, Clone)]
pub struct TokenCorpus {
    pub vocabulary: Vocabulary,
    pub train:      Vec<u32>,
    pub val:        Vec<u32>,
    pub stats:      CorpusStats,
}

impl TokenCorpus {
    pub fn prepare(text: &str, vocabulary: Option<Vocabulary>, val_fraction: f64) -> Self {
        let vocabulary   = vocabulary.unwrap_or_else(|| Vocabulary::build(text));
        let encoded      = vocabulary.encode(text);
        let (train, val) = split_train_val(&encoded, val_fraction);

        let stats = CorpusStats {
            char_count: text.chars().count(),
            word_count: text.split_whitespace().count(),
            vocab_size: vocabulary.len(),
        };

        Self { vocabulary, train, val, stats }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_builds_vocab_and_split() {
        let text   = "abcdefghij".repeat(10);
        let corpus = TokenCorpus::prepare(&text, None, 0.1);
        assert_eq!(corpus.vocabulary.len(), 10);
        assert_eq!(corpus.train.len(), 90);
        assert_eq!(corpus.val.len(), 10);
        assert_eq!(corpus.stats.word_count, 1);
        assert_eq!(corpus.stats.char_count, 100);
    }

    #[test]
    fn test_prepare_with_existing_vocabulary_drops_unknowns() {
        let vocab  = Vocabulary::build("ab");
        let corpus = TokenCorpus::prepare("aXbX aXbX", Some(vocab), 0.0);
        assert_eq!(corpus.train, vec![0, 1, 0, 1]);
        assert_eq!(corpus.stats.vocab_size, 2);
    }
}
