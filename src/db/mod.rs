//! SQLite storage for progress rows, emotion verdicts, and student profiles.

mod connection;
mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{EmotionCount, EmotionLog, Profile, StoredProgress};
