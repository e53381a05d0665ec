//! Chat-format fine-tuning dataset writer.
//!
//! Each sample is `{"messages": [system, user(document_representation),
//! ...stored turns]}`. Samples are shuffled and split into
//! `<base>_train.jsonl` and `<base>_val.jsonl`.

use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{self, DatabaseError};
use crate::models::MessageRole;

pub const DEFAULT_VALIDATION_RATIO: f64 = 0.2;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation ratio must be within [0, 1], got {0}")]
    InvalidRatio(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMessage {
    pub role: String,
    pub content: String,
}

impl SampleMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FineTuneSample {
    pub messages: Vec<SampleMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoTranscription,
    NoMessages,
    NoAssistantMessage,
}

#[derive(Debug, Default)]
pub struct DatasetBuild {
    pub samples: Vec<FineTuneSample>,
    pub skipped: Vec<(String, SkipReason)>,
}

#[derive(Debug)]
pub struct DatasetFiles {
    pub train_path: PathBuf,
    pub validation_path: PathBuf,
    pub train_count: usize,
    pub validation_count: usize,
    pub skipped: usize,
}

/// Distinct `custom_id`s from every `*.jsonl` file in `dir`, first-seen order.
pub fn gather_document_ids(dir: &Path) -> Result<Vec<String>, DatasetError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    paths.sort();

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for path in &paths {
        let text = fs::read_to_string(path)?;
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<serde_json::Value>(line) {
                Ok(value) => {
                    if let Some(id) = value.get("custom_id").and_then(|v| v.as_str()) {
                        if seen.insert(id.to_string()) {
                            ids.push(id.to_string());
                        }
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Unparsable output line"),
            }
        }
    }
    Ok(ids)
}

/// One sample per usable document.
///
/// A trailing user turn is dropped; documents left without an assistant
/// turn, or lacking a transcription or messages, are skipped.
pub fn build_samples(
    conn: &Connection,
    document_ids: &[String],
    system_prompt: &str,
) -> Result<DatasetBuild, DatasetError> {
    let mut build = DatasetBuild::default();

    for id in document_ids {
        let Some(transcription) = db::get_latest_transcription(conn, id)? else {
            warn!(document_id = %id, "No transcription; skipping");
            build.skipped.push((id.clone(), SkipReason::NoTranscription));
            continue;
        };

        let mut turns = db::get_messages_by_document(conn, id)?;
        if turns.is_empty() {
            warn!(document_id = %id, "No messages; skipping");
            build.skipped.push((id.clone(), SkipReason::NoMessages));
            continue;
        }
        if turns.last().is_some_and(|m| m.role == MessageRole::User) {
            turns.pop();
        }
        if !turns.iter().any(|m| m.role == MessageRole::Assistant) {
            warn!(document_id = %id, "No assistant message; skipping");
            build.skipped.push((id.clone(), SkipReason::NoAssistantMessage));
            continue;
        }

        let mut messages = Vec::with_capacity(turns.len() + 2);
        messages.push(SampleMessage::new("system", system_prompt));
        messages.push(SampleMessage::new("user", &transcription.document_representation));
        messages.extend(
            turns
                .iter()
                .map(|m| SampleMessage::new(m.role.as_str(), &m.content)),
        );
        build.samples.push(FineTuneSample { messages });
    }

    Ok(build)
}

/// Shuffle, then move the first `floor(n * ratio)` samples into validation.
pub fn split_samples<R: Rng + ?Sized>(
    mut samples: Vec<FineTuneSample>,
    validation_ratio: f64,
    rng: &mut R,
) -> Result<(Vec<FineTuneSample>, Vec<FineTuneSample>), DatasetError> {
    if !(0.0..=1.0).contains(&validation_ratio) {
        return Err(DatasetError::InvalidRatio(validation_ratio));
    }
    samples.shuffle(rng);
    let validation_count = (samples.len() as f64 * validation_ratio).floor() as usize;
    let train = samples.split_off(validation_count);
    Ok((train, samples))
}

/// `<base>_train<ext>` and `<base>_val<ext>` next to `out`.
pub fn split_paths(out: &Path) -> (PathBuf, PathBuf) {
    let stem = out
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = out
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (
        out.with_file_name(format!("{stem}_train{ext}")),
        out.with_file_name(format!("{stem}_val{ext}")),
    )
}

pub fn write_jsonl(path: &Path, samples: &[FineTuneSample]) -> Result<(), DatasetError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(fs::File::create(path)?);
    for sample in samples {
        serde_json::to_writer(&mut writer, sample)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Gather ids from `results_dir`, build samples, split and write both files.
pub fn write_dataset<R: Rng + ?Sized>(
    conn: &Connection,
    results_dir: &Path,
    out: &Path,
    validation_ratio: f64,
    system_prompt: &str,
    rng: &mut R,
) -> Result<DatasetFiles, DatasetError> {
    let ids = gather_document_ids(results_dir)?;
    info!(documents = ids.len(), dir = %results_dir.display(), "Collected document ids");

    let build = build_samples(conn, &ids, system_prompt)?;
    let skipped = build.skipped.len();
    let (train, validation) = split_samples(build.samples, validation_ratio, rng)?;

    let (train_path, validation_path) = split_paths(out);
    write_jsonl(&train_path, &train)?;
    write_jsonl(&validation_path, &validation)?;

    info!(
        train = train.len(),
        validation = validation.len(),
        skipped,
        "Wrote fine-tuning dataset"
    );
    Ok(DatasetFiles {
        train_path,
        validation_path,
        train_count: train.len(),
        validation_count: validation.len(),
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample(n: usize) -> FineTuneSample {
        FineTuneSample {
            messages: vec![SampleMessage::new("user", &n.to_string())],
        }
    }

    fn seed(conn: &Connection, id: &str, turns: &[(MessageRole, &str)], rep: Option<&str>) {
        for (i, (role, content)) in turns.iter().enumerate() {
            db::upsert_message(conn, id, content, *role, i as u32).unwrap();
        }
        if let Some(rep) = rep {
            db::upsert_transcription(conn, id, 1, rep).unwrap();
        }
    }

    #[test]
    fn sample_layout_and_trailing_user_drop() {
        let conn = open_memory_database().unwrap();
        seed(
            &conn,
            "doc1",
            &[
                (MessageRole::User, "review?"),
                (MessageRole::Assistant, "too long"),
                (MessageRole::User, "thanks"),
            ],
            Some("yaml"),
        );

        let build = build_samples(&conn, &["doc1".to_string()], "persona").unwrap();
        assert!(build.skipped.is_empty());
        let roles: Vec<&str> = build.samples[0]
            .messages
            .iter()
            .map(|m| m.role.as_str())
            .collect();
        assert_eq!(roles, vec!["system", "user", "user", "assistant"]);
        assert_eq!(build.samples[0].messages[0].content, "persona");
        assert_eq!(build.samples[0].messages[1].content, "yaml");
        assert_eq!(build.samples[0].messages[3].content, "too long");
    }

    #[test]
    fn unusable_documents_are_skipped_with_reason() {
        let conn = open_memory_database().unwrap();
        seed(&conn, "no-rep", &[(MessageRole::Assistant, "a")], None);
        seed(&conn, "no-msgs", &[], Some("yaml"));
        seed(&conn, "user-only", &[(MessageRole::User, "q")], Some("yaml"));

        let ids: Vec<String> = ["no-rep", "no-msgs", "user-only"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let build = build_samples(&conn, &ids, "p").unwrap();

        assert!(build.samples.is_empty());
        assert_eq!(
            build.skipped,
            vec![
                ("no-rep".to_string(), SkipReason::NoTranscription),
                ("no-msgs".to_string(), SkipReason::NoMessages),
                ("user-only".to_string(), SkipReason::NoAssistantMessage),
            ]
        );
    }

    #[test]
    fn split_uses_floor_of_ratio() {
        let mut rng = StdRng::seed_from_u64(7);
        let samples: Vec<_> = (0..9).map(sample).collect();
        let (train, val) = split_samples(samples, 0.2, &mut rng).unwrap();
        assert_eq!(val.len(), 1);
        assert_eq!(train.len(), 8);
    }

    #[test]
    fn split_keeps_every_sample() {
        let mut rng = StdRng::seed_from_u64(1);
        let samples: Vec<_> = (0..20).map(sample).collect();
        let (train, val) = split_samples(samples.clone(), 0.25, &mut rng).unwrap();
        let mut all: Vec<_> = train.into_iter().chain(val).collect();
        all.sort_by_key(|s| s.messages[0].content.parse::<usize>().unwrap());
        assert_eq!(all, samples);
    }

    #[test]
    fn invalid_ratio_is_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            split_samples(vec![], 1.5, &mut rng),
            Err(DatasetError::InvalidRatio(_))
        ));
    }

    #[test]
    fn split_paths_keep_extension() {
        let (train, val) = split_paths(Path::new("/data/ft/latest.jsonl"));
        assert_eq!(train, PathBuf::from("/data/ft/latest_train.jsonl"));
        assert_eq!(val, PathBuf::from("/data/ft/latest_val.jsonl"));
    }

    #[test]
    fn gather_ids_dedups_across_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("out-a.jsonl"),
            "{\"custom_id\":\"doc1\"}\nnot json\n{\"custom_id\":\"doc2\"}\n",
        )
        .unwrap();
        fs::write(dir.path().join("out-b.jsonl"), "{\"custom_id\":\"doc1\"}\n").unwrap();
        fs::write(dir.path().join("readme.md"), "{\"custom_id\":\"doc9\"}").unwrap();

        let ids = gather_document_ids(dir.path()).unwrap();
        assert_eq!(ids, vec!["doc1".to_string(), "doc2".to_string()]);
    }

    #[test]
    fn write_dataset_produces_both_files() {
        let conn = open_memory_database().unwrap();
        for i in 0..5 {
            let id = format!("doc{i}");
            seed(&conn, &id, &[(MessageRole::Assistant, "fix bullets")], Some("yaml"));
        }
        let results = tempfile::tempdir().unwrap();
        let lines: String = (0..5)
            .map(|i| format!("{{\"custom_id\":\"doc{i}\"}}\n"))
            .collect();
        fs::write(results.path().join("out-b1.jsonl"), lines).unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let out = out_dir.path().join("ft.jsonl");
        let mut rng = StdRng::seed_from_u64(3);
        let files = write_dataset(&conn, results.path(), &out, 0.2, "p", &mut rng).unwrap();

        assert_eq!(files.train_count, 4);
        assert_eq!(files.validation_count, 1);
        let train = fs::read_to_string(&files.train_path).unwrap();
        assert_eq!(train.lines().count(), 4);
        let parsed: FineTuneSample = serde_json::from_str(train.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.messages.len(), 3);
    }
}
