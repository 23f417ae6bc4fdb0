use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Emotion;

/// One session verdict as stored in `emotion_logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionLog {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub level_number: u32,
    pub emotion: Emotion,
    pub confidence: f64,
    pub captured_at: DateTime<Utc>,
}

/// How often a student ended a stage with a given dominant emotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionCount {
    pub emotion: Emotion,
    pub count: u64,
}
