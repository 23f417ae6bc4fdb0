use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::models::EmotionReading;

pub const DEFAULT_HISTORY_LEN: usize = 50;

/// What the camera badge shows: the latest reading and a short history.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub current: Option<EmotionReading>,
    pub history: VecDeque<EmotionReading>,
    pub total: u64,
}

/// Latest accepted readings, published over a `watch` channel for display.
///
/// Independent of the aggregator buffer: clearing one never touches the other.
#[derive(Debug, Clone)]
pub struct EmotionFeed {
    tx: Arc<watch::Sender<FeedSnapshot>>,
    capacity: usize,
}

impl EmotionFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = watch::channel(FeedSnapshot::default());
        Self {
            tx: Arc::new(tx),
            capacity: capacity.max(1),
        }
    }

    pub fn publish(&self, reading: EmotionReading) {
        let capacity = self.capacity;
        self.tx.send_modify(|snapshot| {
            snapshot.current = Some(reading);
            snapshot.history.push_back(reading);
            while snapshot.history.len() > capacity {
                snapshot.history.pop_front();
            }
            snapshot.total += 1;
        });
    }

    pub fn clear(&self) {
        self.tx.send_replace(FeedSnapshot::default());
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for EmotionFeed {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Emotion;

    #[test]
    fn history_is_capped() {
        let feed = EmotionFeed::new(3);
        for emotion in [Emotion::Happy, Emotion::Sad, Emotion::Angry, Emotion::Neutral] {
            feed.publish(EmotionReading::new(emotion, 0.5));
        }
        let snapshot = feed.snapshot();
        assert_eq!(snapshot.history.len(), 3);
        assert_eq!(snapshot.history[0].emotion, Emotion::Sad);
        assert_eq!(snapshot.current.unwrap().emotion, Emotion::Neutral);
        assert_eq!(snapshot.total, 4);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let feed = EmotionFeed::default();
        let mut rx = feed.subscribe();
        feed.publish(EmotionReading::new(Emotion::Surprised, 0.7));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().current.unwrap().emotion, Emotion::Surprised);

        feed.clear();
        assert!(feed.snapshot().current.is_none());
    }
}
