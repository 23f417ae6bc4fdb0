pub mod emotion_logs;
pub mod profiles;
pub mod progress;
