pub mod config;
pub mod controller;
pub mod feed;
pub mod loop_worker;
pub mod state;

pub use config::SamplerConfig;
pub use controller::EmotionSampler;
pub use feed::{EmotionFeed, FeedSnapshot};
pub use loop_worker::{sample_once, SampleOutcome};
pub use state::{SamplerState, SamplerStatus};
