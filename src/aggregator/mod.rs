//! Per-session reading buffer and dominant-emotion reduction.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};
use serde::Serialize;

use crate::models::{Emotion, EmotionReading, EmotionVerdict};

/// Identity of one sampling session. Readings carry it so that a late result
/// from an earlier session can be told apart from a current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
struct SessionBuffer {
    readings: Vec<EmotionReading>,
    active: bool,
    current: Option<SessionId>,
    issued: u64,
}

/// Owns the reading buffer of the active session.
///
/// Cloning yields another handle to the same buffer; the sampler holds one to
/// append, the stage controller holds one to open and close sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionAggregator {
    inner: Arc<Mutex<SessionBuffer>>,
}

impl SessionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionBuffer> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start a fresh session: the buffer is emptied and a new identity issued.
    pub fn begin_session(&self) -> SessionId {
        let mut buffer = self.lock();
        buffer.issued += 1;
        let id = SessionId(buffer.issued);
        buffer.readings.clear();
        buffer.active = true;
        buffer.current = Some(id);
        debug!("emotion session {} started", id.0);
        id
    }

    /// Append to the active session. Dropped when no session is active.
    pub fn on_reading(&self, reading: EmotionReading) -> bool {
        let mut buffer = self.lock();
        if !buffer.active {
            debug!("dropping {} reading: no active session", reading.emotion);
            return false;
        }
        buffer.readings.push(reading);
        true
    }

    /// Append only if `session` is still the active session.
    pub fn on_tagged_reading(&self, session: SessionId, reading: EmotionReading) -> bool {
        let mut buffer = self.lock();
        if !buffer.active || buffer.current != Some(session) {
            debug!(
                "dropping stale {} reading from session {}",
                reading.emotion, session.0
            );
            return false;
        }
        buffer.readings.push(reading);
        true
    }

    /// Close the session and reduce its readings to a verdict.
    ///
    /// Returns `None` when no reading was collected. The buffer is empty
    /// afterwards in every case.
    pub fn end_session(&self) -> Option<EmotionVerdict> {
        let mut buffer = self.lock();
        buffer.active = false;
        let verdict = dominant_emotion(&buffer.readings);
        if let (Some(session), Some(verdict)) = (buffer.current, verdict.as_ref()) {
            info!(
                "emotion session {} closed: {} ({:.2}) over {} readings",
                session.0,
                verdict.emotion,
                verdict.confidence,
                buffer.readings.len()
            );
        }
        buffer.readings.clear();
        verdict
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn current_session(&self) -> Option<SessionId> {
        let buffer = self.lock();
        buffer.current.filter(|_| buffer.active)
    }

    pub fn len(&self) -> usize {
        self.lock().readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mode of the readings with its frequency share.
///
/// Ties go to whichever tied label appears first in `readings`.
pub fn dominant_emotion(readings: &[EmotionReading]) -> Option<EmotionVerdict> {
    if readings.is_empty() {
        return None;
    }

    let mut counts = [0usize; Emotion::ALL.len()];
    for reading in readings {
        counts[reading.emotion.index()] += 1;
    }
    let max = counts.iter().copied().max().unwrap_or(0);

    readings
        .iter()
        .find(|reading| counts[reading.emotion.index()] == max)
        .map(|reading| EmotionVerdict {
            emotion: reading.emotion,
            confidence: max as f64 / readings.len() as f64,
        })
}
