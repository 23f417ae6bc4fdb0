use anyhow::{bail, Result};
use serde::Serialize;
use tokio::time::Instant;

use crate::aggregator::SessionId;
use crate::models::StageInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GamePhase {
    #[default]
    Lesson,
    Game,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CameraPermission {
    #[default]
    Pending,
    Granted,
    Denied,
}

/// One open stage, from the lesson screen to the result screen.
#[derive(Debug, Clone)]
pub struct AttemptState {
    /// Distinguishes this attempt from a later one on the same stage.
    pub id: u64,
    pub stage: StageInfo,
    pub phase: GamePhase,
    pub camera: CameraPermission,
    pub session: Option<SessionId>,
    pub game_started_at: Option<Instant>,
}

impl AttemptState {
    pub fn new(id: u64, stage: StageInfo) -> Self {
        Self {
            id,
            stage,
            phase: GamePhase::Lesson,
            camera: CameraPermission::Pending,
            session: None,
            game_started_at: None,
        }
    }

    pub fn begin_game(&mut self, now: Instant) -> Result<()> {
        if self.phase != GamePhase::Lesson {
            bail!("stage {} game already started", self.stage.level_number);
        }
        self.phase = GamePhase::Game;
        self.game_started_at = Some(now);
        Ok(())
    }

    /// Move to `Complete` and return the whole seconds spent in the game.
    pub fn complete(&mut self, now: Instant) -> Result<u64> {
        if self.phase != GamePhase::Game {
            bail!("stage {} is not in its game phase", self.stage.level_number);
        }
        self.phase = GamePhase::Complete;
        Ok(self.time_spent_seconds(now))
    }

    pub fn time_spent_seconds(&self, now: Instant) -> u64 {
        match self.game_started_at {
            Some(started) => {
                let elapsed = now.saturating_duration_since(started);
                elapsed.as_secs_f64().round() as u64
            }
            None => 0,
        }
    }

    pub fn is_passing(&self, score: u32) -> bool {
        score >= self.stage.required_score
    }
}

/// Level unlocked by finishing `stage`, if any.
///
/// Only a completed attempt on the frontier stage moves the frontier.
pub fn next_unlocked_level(current_level: u32, stage: u32, completed: bool, stage_count: u32) -> Option<u32> {
    if completed && stage >= current_level && stage < stage_count {
        Some(stage + 1)
    } else {
        None
    }
}
