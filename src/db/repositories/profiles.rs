use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, to_u32},
    models::Profile,
};
use crate::models::StudentContext;

fn row_to_profile(row: &Row) -> Result<Profile> {
    let current_level: i64 = row.get("current_level")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Profile {
        user_id: row.get("user_id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        current_level: to_u32(current_level, "current_level")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn select_profile(conn: &Connection, user_id: &str) -> Result<Option<Profile>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, username, email, current_level, created_at, updated_at
         FROM profiles
         WHERE user_id = ?1",
    )?;
    let mut rows = stmt.query(params![user_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_profile(row)?)),
        None => Ok(None),
    }
}

impl Database {
    /// Load the student's profile, creating it at level 1 on first sight.
    pub async fn get_or_create_profile(&self, student: &StudentContext) -> Result<Profile> {
        let student = student.clone();
        self.execute(move |conn| {
            if let Some(profile) = select_profile(conn, &student.user_id)? {
                return Ok(profile);
            }

            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO profiles (user_id, username, email, current_level, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4, ?5)",
                params![student.user_id, student.username, student.email, now, now],
            )?;

            select_profile(conn, &student.user_id)?
                .ok_or_else(|| anyhow!("Profile not found after insert"))
        })
        .await
    }

    pub async fn current_level(&self, user_id: &str) -> Result<Option<u32>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let level: Option<i64> = conn
                .query_row(
                    "SELECT current_level FROM profiles WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;
            level.map(|value| to_u32(value, "current_level")).transpose()
        })
        .await
    }

    /// Raise `current_level`. Never lowers it.
    pub async fn update_current_level(&self, user_id: &str, level: u32) -> Result<()> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE profiles
                 SET current_level = MAX(current_level, ?1),
                     updated_at = ?2
                 WHERE user_id = ?3",
                params![level, Utc::now().to_rfc3339(), user_id],
            )?;
            Ok(())
        })
        .await
    }
}
