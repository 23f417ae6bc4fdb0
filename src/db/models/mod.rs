pub mod emotion_log;
pub mod profile;
pub mod progress;

pub use emotion_log::{EmotionCount, EmotionLog};
pub use profile::Profile;
pub use progress::StoredProgress;
