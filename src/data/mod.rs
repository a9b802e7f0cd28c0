// ============================================================
// Layer 4 — Corpus Pipeline
// ============================================================
// Everything from a dataset reference to tensor batches:
//
//   DatasetRef (text / file / bundled name)
//       │
//       ▼
//   CorpusLoader     → resolves the source, loads .txt / .docx
//       │
//       ▼
//   Vocabulary       → sorted unique characters, encode / decode
//       │
//       ▼
//   splitter         → deterministic 90/10 prefix split
//       │
//       ▼
//   TokenCorpus      → the prepared train / val id streams
//       │
//       ▼
//   batcher          → random (input, target) windows as tensors
//
// Each module is responsible for exactly one step.

/// Dataset resolution and .txt / .docx loading
pub mod loader;

/// Character vocabulary
pub mod vocabulary;

/// Prefix train / validation split
pub mod splitter;

/// Prepared corpus for one session
pub mod dataset;

/// Random next-token windows
pub mod batcher;
