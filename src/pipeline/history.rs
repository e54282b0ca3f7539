//! Transcription history and usage accounting

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{PostProcessMetadata, TranscriptionMetadata};

/// Stored in place of the transcript when transcription failed
pub const TRANSCRIPTION_FAILED: &str = "[Transcription Failed]";

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("history encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything known about a finished dictation
#[derive(Debug, Clone)]
pub struct StoreInput {
    pub sample_rate: u32,
    pub sample_count: usize,
    pub raw_transcript: Option<String>,
    pub transcript: Option<String>,
    pub transcription: TranscriptionMetadata,
    pub post_process: PostProcessMetadata,
    pub warnings: Vec<String>,
}

/// One persisted history entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionRecord {
    pub id: String,
    pub created_at_ms: u64,
    pub transcript: String,
    pub raw_transcript: String,
    pub sample_rate: u32,
    pub sample_count: usize,
    #[serde(flatten)]
    pub transcription: TranscriptionMetadata,
    #[serde(flatten)]
    pub post_process: PostProcessMetadata,
    pub warnings: Option<Vec<String>>,
}

impl TranscriptionRecord {
    /// Build a record, or `None` when there is no usable audio
    pub fn build(input: StoreInput) -> Option<Self> {
        if input.sample_rate == 0 || input.sample_count == 0 {
            return None;
        }

        let failed = input.raw_transcript.is_none() && !input.warnings.is_empty();
        let transcript = if failed {
            TRANSCRIPTION_FAILED.to_string()
        } else {
            input.transcript.clone().unwrap_or_default()
        };
        let raw_transcript = input
            .raw_transcript
            .or(input.transcript)
            .unwrap_or_default();

        let created_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Some(Self {
            id: next_record_id(created_at_ms),
            created_at_ms,
            transcript,
            raw_transcript,
            sample_rate: input.sample_rate,
            sample_count: input.sample_count,
            transcription: input.transcription,
            post_process: input.post_process,
            warnings: (!input.warnings.is_empty()).then_some(input.warnings),
        })
    }
}

fn next_record_id(created_at_ms: u64) -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    format!("{:x}-{:04x}", created_at_ms, SEQ.fetch_add(1, Ordering::Relaxed) & 0xffff)
}

pub fn count_words(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Where finished transcriptions go
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, record: &TranscriptionRecord) -> Result<(), HistoryError>;
}

/// Append-only JSON-lines history file
pub struct JsonlHistory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl HistoryStore for JsonlHistory {
    async fn append(&self, record: &TranscriptionRecord) -> Result<(), HistoryError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;

        debug!(id = %record.id, path = ?self.path, "transcription stored");
        Ok(())
    }
}

/// Words dictated since the daemon started, checked against the word limit
#[derive(Debug, Clone, Default)]
pub struct UsageMeter {
    words: Arc<AtomicU64>,
}

impl UsageMeter {
    pub fn add(&self, words: u64) {
        self.words.fetch_add(words, Ordering::Relaxed);
    }

    pub fn words(&self) -> u64 {
        self.words.load(Ordering::Relaxed)
    }

    pub fn exceeds(&self, limit: Option<u64>) -> bool {
        limit.is_some_and(|limit| self.words() >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(raw: Option<&str>, transcript: Option<&str>, warnings: &[&str]) -> StoreInput {
        StoreInput {
            sample_rate: 16_000,
            sample_count: 48_000,
            raw_transcript: raw.map(str::to_string),
            transcript: transcript.map(str::to_string),
            transcription: TranscriptionMetadata::default(),
            post_process: PostProcessMetadata::default(),
            warnings: warnings.iter().map(|w| w.to_string()).collect(),
        }
    }

    #[test]
    fn test_failed_transcription_uses_sentinel() {
        let record = TranscriptionRecord::build(input(None, None, &["Transcription failed: boom"]))
            .unwrap();
        assert_eq!(record.transcript, TRANSCRIPTION_FAILED);
        assert_eq!(record.raw_transcript, "");
        assert_eq!(record.warnings.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_successful_record_keeps_both_transcripts() {
        let record =
            TranscriptionRecord::build(input(Some("hello world"), Some("Hello, world."), &[]))
                .unwrap();
        assert_eq!(record.transcript, "Hello, world.");
        assert_eq!(record.raw_transcript, "hello world");
        assert!(record.warnings.is_none());
    }

    #[test]
    fn test_no_audio_is_not_recorded() {
        let mut empty = input(Some("x"), Some("x"), &[]);
        empty.sample_count = 0;
        assert!(TranscriptionRecord::build(empty).is_none());

        let mut no_rate = input(Some("x"), Some("x"), &[]);
        no_rate.sample_rate = 0;
        assert!(TranscriptionRecord::build(no_rate).is_none());
    }

    #[test]
    fn test_usage_meter_limit() {
        let meter = UsageMeter::default();
        assert!(!meter.exceeds(None));
        meter.add(count_words("one two  three"));
        assert_eq!(meter.words(), 3);
        assert!(!meter.exceeds(Some(4)));
        assert!(meter.clone().exceeds(Some(3)));
    }

    #[tokio::test]
    async fn test_jsonl_history_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let store = JsonlHistory::new(&path);

        for text in ["first", "second"] {
            let record = TranscriptionRecord::build(input(Some(text), Some(text), &[])).unwrap();
            tokio_test::assert_ok!(store.append(&record).await);
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<TranscriptionRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].transcript, "second");
        assert_ne!(records[0].id, records[1].id);
    }
}
