use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_emotion, to_u32, to_u64},
    models::{EmotionCount, EmotionLog},
};
use crate::models::{EmotionVerdict, StudentContext};

fn row_to_log(row: &Row) -> Result<EmotionLog> {
    let level_number: i64 = row.get("level_number")?;
    let emotion: String = row.get("emotion")?;
    let captured_at: String = row.get("captured_at")?;

    Ok(EmotionLog {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        level_number: to_u32(level_number, "level_number")?,
        emotion: parse_emotion(&emotion)?,
        confidence: row.get("confidence")?,
        captured_at: parse_datetime(&captured_at, "captured_at")?,
    })
}

impl Database {
    pub async fn insert_emotion_log(
        &self,
        student: &StudentContext,
        level_number: u32,
        verdict: &EmotionVerdict,
    ) -> Result<EmotionLog> {
        let log = EmotionLog {
            id: Uuid::new_v4().to_string(),
            user_id: student.user_id.clone(),
            username: student.username.clone(),
            email: student.email.clone(),
            level_number,
            emotion: verdict.emotion,
            confidence: verdict.confidence,
            captured_at: Utc::now(),
        };

        let row = log.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO emotion_logs (id, user_id, username, email, level_number, emotion, confidence, captured_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.id,
                    row.user_id,
                    row.username,
                    row.email,
                    row.level_number,
                    row.emotion.as_str(),
                    row.confidence,
                    row.captured_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?;

        Ok(log)
    }

    /// Verdicts for `user_id`, newest first, optionally limited to one stage.
    pub async fn list_emotion_logs(
        &self,
        user_id: &str,
        level_number: Option<u32>,
    ) -> Result<Vec<EmotionLog>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, username, email, level_number, emotion, confidence, captured_at
                 FROM emotion_logs
                 WHERE user_id = ?1 AND (?2 IS NULL OR level_number = ?2)
                 ORDER BY captured_at DESC, rowid DESC",
            )?;

            let mut rows = stmt.query(params![user_id, level_number])?;
            let mut logs = Vec::new();
            while let Some(row) = rows.next()? {
                logs.push(row_to_log(row)?);
            }

            Ok(logs)
        })
        .await
    }

    /// Per-emotion verdict counts for `user_id`, most frequent first.
    pub async fn emotion_distribution(&self, user_id: &str) -> Result<Vec<EmotionCount>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT emotion, COUNT(*) AS total
                 FROM emotion_logs
                 WHERE user_id = ?1
                 GROUP BY emotion
                 ORDER BY total DESC, emotion ASC",
            )?;

            let mut rows = stmt.query(params![user_id])?;
            let mut counts = Vec::new();
            while let Some(row) = rows.next()? {
                let emotion: String = row.get(0)?;
                let total: i64 = row.get(1)?;
                counts.push(EmotionCount {
                    emotion: parse_emotion(&emotion)?,
                    count: to_u64(total, "count")?,
                });
            }

            Ok(counts)
        })
        .await
    }
}
