use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::GameType;

/// A persisted `student_progress` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProgress {
    pub id: String,
    pub user_id: String,
    pub level_number: u32,
    pub game_type: GameType,
    pub score: u32,
    pub is_completed: bool,
    pub time_spent_seconds: u64,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
