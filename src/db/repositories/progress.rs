use anyhow::Result;
use chrono::{Duration, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_game_type, parse_optional_datetime, to_i64, to_u32, to_u64},
    models::StoredProgress,
};
use crate::models::{ProgressRecord, StudentContext};

fn row_to_progress(row: &Row) -> Result<StoredProgress> {
    let game_type: String = row.get("game_type")?;
    let level_number: i64 = row.get("level_number")?;
    let score: i64 = row.get("score")?;
    let is_completed: i64 = row.get("is_completed")?;
    let time_spent: i64 = row.get("time_spent_seconds")?;
    let attempts: i64 = row.get("attempts")?;
    let started_at: String = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;

    Ok(StoredProgress {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        level_number: to_u32(level_number, "level_number")?,
        game_type: parse_game_type(&game_type)?,
        score: to_u32(score, "score")?,
        is_completed: is_completed != 0,
        time_spent_seconds: to_u64(time_spent, "time_spent_seconds")?,
        attempts: to_u32(attempts, "attempts")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        completed_at: parse_optional_datetime(completed_at, "completed_at")?,
    })
}

impl Database {
    /// Store one stage attempt. `started_at` is back-dated by the time spent.
    pub async fn insert_progress(
        &self,
        student: &StudentContext,
        record: &ProgressRecord,
    ) -> Result<StoredProgress> {
        let now = Utc::now();
        let spent = i64::try_from(record.time_spent_seconds).unwrap_or(i64::MAX);
        let stored = StoredProgress {
            id: Uuid::new_v4().to_string(),
            user_id: student.user_id.clone(),
            level_number: record.level_number,
            game_type: record.game_type,
            score: record.score,
            is_completed: record.is_completed,
            time_spent_seconds: record.time_spent_seconds,
            attempts: record.attempts,
            started_at: now - Duration::seconds(spent.min(i64::from(i32::MAX))),
            completed_at: record.is_completed.then_some(now),
        };

        let row = stored.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO student_progress (id, user_id, level_number, game_type, score, is_completed, time_spent_seconds, attempts, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    row.id,
                    row.user_id,
                    row.level_number,
                    row.game_type.as_str(),
                    row.score,
                    row.is_completed,
                    to_i64(row.time_spent_seconds)?,
                    row.attempts,
                    row.started_at.to_rfc3339(),
                    row.completed_at.as_ref().map(|dt| dt.to_rfc3339()),
                ],
            )?;
            Ok(())
        })
        .await?;

        Ok(stored)
    }

    /// All attempts for `user_id`, newest first.
    pub async fn list_progress_for_user(&self, user_id: &str) -> Result<Vec<StoredProgress>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, level_number, game_type, score, is_completed, time_spent_seconds, attempts, started_at, completed_at
                 FROM student_progress
                 WHERE user_id = ?1
                 ORDER BY started_at DESC, rowid DESC",
            )?;

            let mut rows = stmt.query(params![user_id])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_progress(row)?);
            }

            Ok(records)
        })
        .await
    }
}
