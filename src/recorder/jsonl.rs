use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};

use crate::models::{EmotionVerdict, ProgressRecord, StudentContext};

use super::ProgressSink;

#[derive(Serialize)]
#[serde(tag = "table", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum JournalEntry<'a> {
    StudentProgress {
        user_id: &'a str,
        #[serde(flatten)]
        record: &'a ProgressRecord,
        recorded_at: String,
    },
    EmotionLogs {
        user_id: &'a str,
        username: &'a str,
        email: &'a str,
        level_number: u32,
        #[serde(flatten)]
        verdict: &'a EmotionVerdict,
        recorded_at: String,
    },
}

/// Appends one JSON object per line to a journal file.
pub struct JsonlSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &JournalEntry<'_>) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("failed to encode journal entry")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open journal {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("failed to append journal entry")?;
        file.flush().await.context("failed to flush journal")?;
        Ok(())
    }
}

#[async_trait]
impl ProgressSink for JsonlSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn record_progress(&self, student: &StudentContext, record: &ProgressRecord) -> Result<()> {
        self.append(&JournalEntry::StudentProgress {
            user_id: &student.user_id,
            record,
            recorded_at: Utc::now().to_rfc3339(),
        })
        .await
    }

    async fn record_emotion(
        &self,
        student: &StudentContext,
        level_number: u32,
        verdict: &EmotionVerdict,
    ) -> Result<()> {
        self.append(&JournalEntry::EmotionLogs {
            user_id: &student.user_id,
            username: &student.username,
            email: &student.email,
            level_number,
            verdict,
            recorded_at: Utc::now().to_rfc3339(),
        })
        .await
    }
}
