pub mod catalog;
pub mod controller;
pub mod state;

pub use catalog::{stage_info, stages, STAGE_COUNT};
pub use controller::{AttemptOutcome, AttemptSnapshot, StageController, StageControllerConfig};
pub use state::{next_unlocked_level, AttemptState, CameraPermission, GamePhase};
