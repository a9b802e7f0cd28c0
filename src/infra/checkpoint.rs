// ============================================================
// Layer 6 — Checkpoint Registry
// ============================================================
// Durable snapshots of a session's model and optimiser.
//
// Files in the checkpoints directory:
//   models_registry.json   ← JSON list of CheckpointRecord
//   <id>.ckpt              ← one JSON payload per checkpoint
//
// A payload holds both configs, the vocabulary, the step, the
// last train loss, and the Burn records of the model and the
// optimiser (BinBytesRecorder bytes, base64 in the JSON).
//
// Write discipline:
//   - the payload is written first, under a name derived from
//     the new id
//   - the registry is then rewritten whole into a temp file in
//     the same directory and renamed over the target, so readers
//     never see a half-written registry
//   - registry read-modify-write cycles are serialised by an
//     in-process lock; share one registry per directory
//
// Reads never fail hard: a missing or corrupt registry lists as
// empty, and a missing or corrupt payload is reported as
// NotFound / Unreadable while its entry stays listed.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::data::vocabulary::Vocabulary;
use crate::domain::config::{ModelConfig, TrainingConfig};
use crate::domain::records::CheckpointRecord;
use crate::domain::session::FeatureType;
use crate::ml::trainer::ModelState;

const REGISTRY_FILE: &str = "models_registry.json";
const PAYLOAD_EXT:   &str = "ckpt";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckpointError {
    #[error("checkpoint not found: {0}")]
    NotFound(String),

    #[error("checkpoint {id} is unreadable: {reason}")]
    Unreadable { id: String, reason: String },

    #[error("checkpoint persistence failed: {0}")]
    Persistence(String),
}

// ─── CheckpointPayload ────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub model_config:    ModelConfig,
    pub training_config: TrainingConfig,
    pub vocabulary:      Vocabulary,
    pub step:            usize,
    pub train_loss:      Option<f64>,
    #[serde(with = "base64_bytes")]
    pub model_state:     Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub optimizer_state: Vec<u8>,
}

impl CheckpointPayload {
    pub fn state(&self) -> ModelState {
        ModelState {
            model:     self.model_state.clone(),
            optimizer: self.optimizer_state.clone(),
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

// ─── CheckpointRegistry ───────────────────────────────────────────────────────
pub struct CheckpointRegistry {
    dir:  PathBuf,
    lock: Mutex<()>,
}

impl CheckpointRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), lock: Mutex::new(()) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn registry_path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE)
    }

    /// All entries, oldest first.
    pub fn list(&self) -> Vec<CheckpointRecord> {
        let path = self.registry_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_)   => return Vec::new(),
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable registry '{}': {}", path.display(), e);
            Vec::new()
        })
    }

    pub fn get(&self, id: &str) -> Option<CheckpointRecord> {
        self.list().into_iter().find(|r| r.id == id)
    }

    pub fn save(
        &self,
        payload:      &CheckpointPayload,
        feature_type: FeatureType,
        name:         &str,
    ) -> Result<CheckpointRecord, CheckpointError> {
        let id       = uuid::Uuid::new_v4().to_string();
        let filename = format!("{id}.{PAYLOAD_EXT}");

        let record = CheckpointRecord {
            id:           id.clone(),
            name:         name.to_string(),
            feature_type,
            filename:     filename.clone(),
            step:         payload.step,
            train_loss:   payload.train_loss,
            created_at:   Utc::now(),
        };

        self.write_payload(&filename, payload).map_err(persistence)?;

        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut records = self.list();
        records.push(record.clone());
        if let Err(e) = self.write_registry(&records) {
            fs::remove_file(self.dir.join(&filename)).ok();
            return Err(persistence(e));
        }

        tracing::info!("Saved checkpoint '{}' ({}) at step {}", record.name, id, record.step);
        Ok(record)
    }

    pub fn load(&self, id: &str) -> Result<(CheckpointRecord, CheckpointPayload), CheckpointError> {
        let record = self.get(id).ok_or_else(|| CheckpointError::NotFound(id.to_string()))?;
        let path   = self.dir.join(&record.filename);

        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Checkpoint {} is listed but '{}' is missing", id, path.display());
                return Err(CheckpointError::NotFound(id.to_string()));
            }
            Err(e) => return Err(unreadable(id, e)),
        };
        let payload = serde_json::from_str(&text).map_err(|e| unreadable(id, e))?;

        tracing::debug!("Loaded checkpoint {}", id);
        Ok((record, payload))
    }

    pub fn rename(&self, id: &str, new_name: &str) -> Result<CheckpointRecord, CheckpointError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut records = self.list();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))?;
        record.name = new_name.to_string();
        let renamed = record.clone();

        self.write_registry(&records).map_err(persistence)?;
        Ok(renamed)
    }

    pub fn delete(&self, id: &str) -> Result<(), CheckpointError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut records = self.list();
        let pos = records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))?;
        let removed = records.remove(pos);

        self.write_registry(&records).map_err(persistence)?;

        let path = self.dir.join(&removed.filename);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Could not remove '{}': {}", path.display(), e);
            }
        }
        tracing::info!("Deleted checkpoint {}", id);
        Ok(())
    }

    // ─── File helpers ────────────────────────────────────────────────────────
    fn write_payload(&self, filename: &str, payload: &CheckpointPayload) -> Result<()> {
        let json = serde_json::to_vec(payload).context("Cannot serialise checkpoint payload")?;
        self.replace_file(&self.dir.join(filename), &json)
    }

    fn write_registry(&self, records: &[CheckpointRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records).context("Cannot serialise registry")?;
        self.replace_file(&self.registry_path(), &json)
    }

    /// Write into a temp file beside `target`, then rename over it.
    fn replace_file(&self, target: &Path, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Cannot create temp file in '{}'", self.dir.display()))?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(target)
            .map_err(|e| e.error)
            .with_context(|| format!("Cannot replace '{}'", target.display()))?;
        Ok(())
    }
}

fn persistence(e: anyhow::Error) -> CheckpointError {
    tracing::error!("Checkpoint persistence failure: {:#}", e);
    CheckpointError::Persistence(format!("{e:#}"))
}

fn unreadable(id: &str, e: impl std::fmt::Display) -> CheckpointError {
    tracing::warn!("Checkpoint {} is unreadable: {}", id, e);
    CheckpointError::Unreadable { id: id.to_string(), reason: e.to_string() }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn payload(step: usize) -> CheckpointPayload {
        CheckpointPayload {
            model_config:    ModelConfig { vocab_size: 3, ..Default::default() },
            training_config: TrainingConfig { max_steps: 42, ..Default::default() },
            vocabulary:      Vocabulary::build("abc"),
            step,
            train_loss:      Some(1.25),
            model_state:     vec![1, 2, 3, 255],
            optimizer_state: vec![9, 8],
        }
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let reg = CheckpointRegistry::new(dir.path());

        let saved = reg.save(&payload(7), FeatureType::AttentionCinema, "first").unwrap();
        let (record, loaded) = reg.load(&saved.id).unwrap();

        assert_eq!(record, saved);
        assert_eq!(loaded.model_config, payload(7).model_config);
        assert_eq!(loaded.training_config, payload(7).training_config);
        assert_eq!(loaded.step, 7);
        assert_eq!(loaded.model_state, vec![1, 2, 3, 255]);
        assert_eq!(loaded.vocabulary.encode("cab"), vec![2, 0, 1]);
        assert!(dir.path().join(&saved.filename).is_file());
    }

    #[test]
    fn test_missing_registry_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = CheckpointRegistry::new(dir.path().join("nothing-here"));
        assert!(reg.list().is_empty());
        assert_eq!(reg.load("x"), Err(CheckpointError::NotFound("x".to_string())));
    }

    #[test]
    fn test_corrupt_registry_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(REGISTRY_FILE), "{ not json").unwrap();
        let reg = CheckpointRegistry::new(dir.path());
        assert!(reg.list().is_empty());
    }

    #[test]
    fn test_missing_payload_stays_listed() {
        let dir = tempfile::tempdir().unwrap();
        let reg = CheckpointRegistry::new(dir.path());
        let saved = reg.save(&payload(1), FeatureType::WatchLearn, "gone").unwrap();
        fs::remove_file(dir.path().join(&saved.filename)).unwrap();

        assert!(matches!(reg.load(&saved.id), Err(CheckpointError::NotFound(_))));
        assert_eq!(reg.list().len(), 1);
    }

    #[test]
    fn test_corrupt_payload_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let reg = CheckpointRegistry::new(dir.path());
        let saved = reg.save(&payload(1), FeatureType::WatchLearn, "bad").unwrap();
        fs::write(dir.path().join(&saved.filename), "garbage").unwrap();

        assert!(matches!(reg.load(&saved.id), Err(CheckpointError::Unreadable { .. })));
    }

    #[test]
    fn test_rename_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let reg = CheckpointRegistry::new(dir.path());
        let a = reg.save(&payload(1), FeatureType::WatchLearn, "a").unwrap();
        let b = reg.save(&payload(2), FeatureType::WatchLearn, "b").unwrap();

        assert_eq!(reg.rename(&a.id, "alpha").unwrap().name, "alpha");
        assert_eq!(reg.get(&a.id).unwrap().name, "alpha");

        reg.delete(&b.id).unwrap();
        assert!(!dir.path().join(&b.filename).exists());
        assert_eq!(reg.list().len(), 1);

        assert!(matches!(reg.delete(&b.id), Err(CheckpointError::NotFound(_))));
        assert!(matches!(reg.delete(&b.id), Err(CheckpointError::NotFound(_))));
        assert!(matches!(reg.rename("nope", "x"), Err(CheckpointError::NotFound(_))));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let reg = CheckpointRegistry::new(dir.path());
        let saved = reg.save(&payload(3), FeatureType::StyleTransfer, "x").unwrap();
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        let mut expected = vec![saved.filename, REGISTRY_FILE.to_string()];
        expected.sort();
        assert_eq!(names, expected);
    }
}
