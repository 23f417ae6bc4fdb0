use anyhow::Result;
use async_trait::async_trait;

use crate::db::Database;
use crate::models::{EmotionVerdict, ProgressRecord, StudentContext};

use super::ProgressSink;

/// Writes attempts into the local SQLite database.
#[derive(Clone)]
pub struct SqliteSink {
    db: Database,
}

impl SqliteSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProgressSink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn record_progress(&self, student: &StudentContext, record: &ProgressRecord) -> Result<()> {
        self.db.insert_progress(student, record).await.map(|_| ())
    }

    async fn record_emotion(
        &self,
        student: &StudentContext,
        level_number: u32,
        verdict: &EmotionVerdict,
    ) -> Result<()> {
        self.db
            .insert_emotion_log(student, level_number, verdict)
            .await
            .map(|_| ())
    }
}
