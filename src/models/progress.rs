use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Mini-game mechanic attached to a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    Matching,
    Mcq,
    FillBlank,
    DragDrop,
}

impl GameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::Matching => "matching",
            GameType::Mcq => "mcq",
            GameType::FillBlank => "fillblank",
            GameType::DragDrop => "dragdrop",
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "matching" => Ok(GameType::Matching),
            "mcq" => Ok(GameType::Mcq),
            "fillblank" => Ok(GameType::FillBlank),
            "dragdrop" => Ok(GameType::DragDrop),
            other => Err(anyhow!("unknown game type '{other}'")),
        }
    }
}

/// Structural data of one stage. Lesson text and questions live elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInfo {
    pub level_number: u32,
    pub game_type: GameType,
    pub required_score: u32,
}

/// Outcome of one stage attempt, handed to every recorder sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub level_number: u32,
    pub game_type: GameType,
    pub score: u32,
    pub is_completed: bool,
    pub time_spent_seconds: u64,
    pub attempts: u32,
}

/// Identity of the signed-in student, threaded explicitly to whoever persists rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentContext {
    pub user_id: String,
    pub username: String,
    pub email: String,
}

impl StudentContext {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            email: email.into(),
        }
    }
}
