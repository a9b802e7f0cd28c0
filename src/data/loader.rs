// ============================================================
// Layer 4 — Corpus Loader
// ============================================================
// Turns a caller's dataset reference into the one authoritative
// corpus source for a session, then loads its text when the
// Training Loop asks for it.
//
//   DatasetRef::Text(..)    pasted text  → trimmed, length-checked
//   DatasetRef::File(..)    .txt / .docx → must exist
//   DatasetRef::Bundled(..) name         → <datasets_dir>/<name>.txt
//
// Resolution happens at session creation so that malformed
// references are rejected before a session exists. Loading a
// file happens later, inside the loop, where a failure becomes a
// `dataset_load_error` event instead of a rejected request.
//
// How .docx files work:
//   A .docx file is a ZIP archive of XML parts. docx-rs gives a
//   typed tree over it:
//     Document → Paragraph → Run → Text
//   Runs inside a paragraph are concatenated with no separator;
//   paragraphs are joined with newlines.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::config::ConfigError;

/// Bundled corpus names and their file names under `datasets_dir`.
pub const BUNDLED_DATASETS: [(&str, &str); 7] = [
    ("shakespeare", "shakespeare.txt"),
    ("poems",       "poems.txt"),
    ("childrens",   "childrens.txt"),
    ("bible",       "bible.txt"),
    ("scifi",       "scifi.txt"),
    ("philosophy",  "philosophy.txt"),
    ("code",        "code.txt"),
];

// ─── DatasetRef ───────────────────────────────────────────────────────────────
/// What a caller may hand to `create_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DatasetRef {
    Text(String),
    File(PathBuf),
    Bundled(String),
}

// ─── CorpusSource ─────────────────────────────────────────────────────────────
/// The resolved, authoritative corpus of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum CorpusSource {
    Text(String),
    File(PathBuf),
}

impl CorpusSource {
    /// Short human label for logs and snapshots.
    pub fn describe(&self) -> String {
        match self {
            Self::Text(t) => format!("text ({} chars)", t.chars().count()),
            Self::File(p) => p.display().to_string(),
        }
    }
}

// ─── CorpusLoader ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct CorpusLoader {
    datasets_dir: PathBuf,
    min_chars:    usize,
    max_chars:    usize,
}

impl CorpusLoader {
    pub fn new(datasets_dir: impl Into<PathBuf>, min_chars: usize, max_chars: usize) -> Self {
        Self { datasets_dir: datasets_dir.into(), min_chars, max_chars }
    }

    /// Validate a dataset reference and pin down its source.
    pub fn resolve(&self, dataset: &DatasetRef) -> Result<CorpusSource, ConfigError> {
        match dataset {
            DatasetRef::Text(raw) => {
                let text = raw.trim();
                self.check_length(text)?;
                Ok(CorpusSource::Text(text.to_string()))
            }
            DatasetRef::File(path) => {
                match extension(path).as_deref() {
                    Some("txt") | Some("docx") => {}
                    _ => return Err(ConfigError::UnsupportedFileType(path.display().to_string())),
                }
                if !path.is_file() {
                    return Err(ConfigError::InvalidDataset(format!(
                        "file not found: {}",
                        path.display()
                    )));
                }
                Ok(CorpusSource::File(path.clone()))
            }
            DatasetRef::Bundled(name) => {
                let filename = BUNDLED_DATASETS
                    .iter()
                    .find(|(n, _)| *n == name.as_str())
                    .map(|(_, f)| *f)
                    .ok_or_else(|| ConfigError::UnknownDataset(name.clone()))?;
                let path = self.datasets_dir.join(filename);
                if !path.is_file() {
                    return Err(ConfigError::InvalidDataset(format!(
                        "bundled dataset '{}' missing at {}",
                        name,
                        path.display()
                    )));
                }
                Ok(CorpusSource::File(path))
            }
        }
    }

    /// Read the corpus text. File corpora are length-checked here.
    pub fn load(&self, source: &CorpusSource) -> Result<String> {
        match source {
            CorpusSource::Text(text) => Ok(text.clone()),
            CorpusSource::File(path) => {
                let text = load_file(path)?;
                self.check_length(&text)?;
                tracing::debug!("Loaded corpus '{}' ({} bytes)", path.display(), text.len());
                Ok(text)
            }
        }
    }

    fn check_length(&self, text: &str) -> Result<(), ConfigError> {
        let len = text.chars().count();
        if len < self.min_chars {
            return Err(ConfigError::CorpusTooShort { len, min: self.min_chars });
        }
        if len > self.max_chars {
            return Err(ConfigError::CorpusTooLong { len, max: self.max_chars });
        }
        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Load a .txt (lossy UTF-8) or .docx file.
pub fn load_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;

    if extension(path).as_deref() == Some("docx") {
        docx_text(&bytes)
            .with_context(|| format!("Cannot extract text from '{}'", path.display()))
    } else {
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn docx_text(bytes: &[u8]) -> Result<String> {
    use docx_rs::{DocumentChild, ParagraphChild, RunChild};

    let docx = docx_rs::read_docx(bytes)
        .map_err(|e| anyhow::anyhow!("docx-rs parse error: {e:?}"))?;

    let mut paragraphs = Vec::new();
    for child in &docx.document.children {
        if let DocumentChild::Paragraph(para) = child {
            let mut line = String::new();
            for pc in &para.children {
                if let ParagraphChild::Run(run) = pc {
                    for rc in &run.children {
                        if let RunChild::Text(t) = rc {
                            line.push_str(&t.text);
                        }
                    }
                }
            }
            paragraphs.push(line);
        }
    }
    Ok(paragraphs.join("\n"))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn loader(dir: &Path) -> CorpusLoader {
        CorpusLoader::new(dir, 100, 5_000_000)
    }

    #[test]
    fn test_text_is_trimmed_and_checked() {
        let dir = tempfile::tempdir().unwrap();
        let short = DatasetRef::Text("   too short   ".to_string());
        assert!(matches!(
            loader(dir.path()).resolve(&short),
            Err(ConfigError::CorpusTooShort { len: 9, min: 100 })
        ));

        let long_enough = format!("  {}  ", "a".repeat(150));
        let src = loader(dir.path()).resolve(&DatasetRef::Text(long_enough)).unwrap();
        assert_eq!(src, CorpusSource::Text("a".repeat(150)));
    }

    #[test]
    fn test_unknown_bundled_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let r = loader(dir.path()).resolve(&DatasetRef::Bundled("klingon".to_string()));
        assert!(matches!(r, Err(ConfigError::UnknownDataset(_))));
    }

    #[test]
    fn test_bundled_name_maps_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poems.txt");
        let mut f = fs::File::create(&path).unwrap();
        write!(f, "{}", "roses are red ".repeat(20)).unwrap();

        let l   = loader(dir.path());
        let src = l.resolve(&DatasetRef::Bundled("poems".to_string())).unwrap();
        assert_eq!(src, CorpusSource::File(path));
        assert!(l.load(&src).unwrap().starts_with("roses"));
    }

    #[test]
    fn test_unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        fs::write(&path, b"x").unwrap();
        let r = loader(dir.path()).resolve(&DatasetRef::File(path));
        assert!(matches!(r, Err(ConfigError::UnsupportedFileType(_))));
    }

    #[test]
    fn test_short_file_fails_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.txt");
        fs::write(&path, "hi").unwrap();
        let l   = loader(dir.path());
        let src = l.resolve(&DatasetRef::File(path)).unwrap();
        assert!(l.load(&src).is_err());
    }
}
