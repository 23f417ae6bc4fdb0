use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::EmotionVerdict;

const NOTICE_CAPACITY: usize = 64;

/// Non-blocking notifications for the player-facing shell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notice {
    /// Camera is on and expressions are being analysed during play.
    CameraActive,
    /// Camera could not be used; the game continues without sampling.
    CameraUnavailable { reason: String },
    /// A stage attempt closed with a verdict.
    VerdictReady { level_number: u32, verdict: EmotionVerdict },
    /// One sink failed to store a record; shown as a dismissible toast.
    PersistenceFailed { sink: String, message: String },
}

/// Fan-out of [`Notice`]s. Sending never blocks and never fails the caller.
#[derive(Debug, Clone)]
pub struct NoticeBus {
    tx: broadcast::Sender<Notice>,
}

impl NoticeBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(NOTICE_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, notice: Notice) {
        // No subscribers is fine: notices are best effort.
        let _ = self.tx.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new()
    }
}
