pub mod emotion;
pub mod progress;

pub use emotion::{Emotion, EmotionReading, EmotionVerdict};
pub use progress::{GameType, ProgressRecord, StageInfo, StudentContext};
