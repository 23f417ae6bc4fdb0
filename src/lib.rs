pub mod aggregator;
pub mod capture;
pub mod db;
pub mod error;
pub mod events;
pub mod game;
pub mod models;
pub mod recorder;
pub mod sensing;
pub mod settings;
mod utils;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;

use capture::{CaptureSource, InferenceAdapter, ReplayScript};
use db::Database;
use events::NoticeBus;
use game::StageController;
use models::{EmotionVerdict, ProgressRecord, StudentContext};
use recorder::{JsonlSink, Recorder, SqliteSink};
use settings::{debug_mode_from_env, SettingsStore};

/// Shared services for one running app, built once and handed to controllers.
pub struct AppContext {
    pub data_dir: PathBuf,
    pub db: Option<Database>,
    pub settings: SettingsStore,
    pub recorder: Recorder,
    pub notices: NoticeBus,
    pub debug_mode: bool,
}

impl AppContext {
    /// Open settings and the enabled stores under `data_dir`.
    ///
    /// Relative storage paths in the settings file resolve against `data_dir`.
    pub fn build(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join("settings.json"))?;
        let storage = settings.storage();
        let notices = NoticeBus::new();
        let mut recorder = Recorder::new(Some(notices.clone()));

        let db = if storage.sqlite_enabled {
            let database = Database::new(data_dir.join(&storage.sqlite_path))?;
            recorder = recorder.with_sink(Arc::new(SqliteSink::new(database.clone())));
            Some(database)
        } else {
            None
        };

        if storage.jsonl_enabled {
            recorder = recorder.with_sink(Arc::new(JsonlSink::new(data_dir.join(&storage.jsonl_path))));
        }

        let debug_mode = debug_mode_from_env();
        if debug_mode {
            info!("debug mode: sampling every second");
        }
        info!("recorder sinks: {:?}", recorder.sink_names());

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            db,
            settings,
            recorder,
            notices,
            debug_mode,
        })
    }

    pub fn database(&self) -> Result<&Database> {
        self.db
            .as_ref()
            .context("the SQLite store is disabled in settings")
    }

    /// Controller for `student`, starting from their stored frontier.
    pub async fn stage_controller(
        &self,
        student: StudentContext,
        camera: Arc<dyn CaptureSource>,
        model: Arc<dyn InferenceAdapter>,
    ) -> Result<StageController> {
        let current_level = match &self.db {
            Some(db) => db.get_or_create_profile(&student).await?.current_level,
            None => 1,
        };

        let config = self.settings.get().controller_config(self.debug_mode);
        Ok(StageController::new(
            camera,
            model,
            self.recorder.clone(),
            self.notices.clone(),
            student,
            current_level,
            config,
        ))
    }

    pub async fn persist_unlock(&self, student: &StudentContext, level: u32) -> Result<()> {
        if let Some(db) = &self.db {
            db.update_current_level(&student.user_id, level).await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    pub record: ProgressRecord,
    pub verdict: Option<EmotionVerdict>,
    pub unlocked_level: Option<u32>,
    pub failed_sinks: Vec<String>,
}

/// Play one scripted stage attempt end to end and wait for persistence.
pub async fn replay(
    ctx: &AppContext,
    student: StudentContext,
    script: &ReplayScript,
) -> Result<ReplaySummary> {
    let controller = ctx
        .stage_controller(student.clone(), Arc::new(script.camera()), Arc::new(script.model()))
        .await?;

    if let Err(err) = controller.load_model().await {
        warn!("replaying without expression model: {err}");
    }

    controller.open_stage(script.level).await?;
    controller.start_game().await?;
    tokio::time::sleep(Duration::from_millis(script.play_ms)).await;
    let outcome = controller.complete_game(script.score).await?;

    if let Some(level) = outcome.unlocked_level {
        if let Err(err) = ctx.persist_unlock(&student, level).await {
            warn!("failed to store unlocked level {level}: {err:#}");
        }
    }

    let report = outcome
        .persistence
        .await
        .context("recorder dispatch task failed")?;
    controller.leave_stage().await?;

    Ok(ReplaySummary {
        record: outcome.record,
        verdict: outcome.verdict,
        unlocked_level: outcome.unlocked_level,
        failed_sinks: report.failures().map(|sink| sink.sink.to_string()).collect(),
    })
}

pub fn init_logging() {
    // Reads RUST_LOG; defaults to info.
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use capture::ScriptStep;
    use models::Emotion;

    fn script(level: u32, score: u32) -> ReplayScript {
        ReplayScript {
            level,
            score,
            play_ms: 12_000,
            camera_available: true,
            camera_ready_ms: 0,
            frame_width: 320,
            frame_height: 240,
            model_loads: true,
            latency_ms: 0,
            steps: vec![
                ScriptStep::face(Emotion::Surprised, 0.7),
                ScriptStep::NoFace,
                ScriptStep::face(Emotion::Surprised, 0.9),
            ],
        }
    }

    fn fast_sampling(ctx: &AppContext) {
        let mut sampler = ctx.settings.sampler();
        sampler.interval_ms = 5_000;
        ctx.settings.update_sampler(sampler).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn replay_persists_to_both_sinks_and_unlocks() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::build(dir.path()).unwrap();
        fast_sampling(&ctx);
        let student = StudentContext::new("u-9", "huda", "huda@example.com");

        let summary = replay(&ctx, student.clone(), &script(1, 3)).await.unwrap();
        assert!(summary.failed_sinks.is_empty());
        assert_eq!(summary.record.time_spent_seconds, 12);
        assert_eq!(summary.unlocked_level, Some(2));
        let verdict = summary.verdict.unwrap();
        assert_eq!(verdict.emotion, Emotion::Surprised);
        assert!((verdict.confidence - 1.0).abs() < 1e-9);

        let db = ctx.database().unwrap();
        assert_eq!(db.current_level("u-9").await.unwrap(), Some(2));
        assert_eq!(db.list_progress_for_user("u-9").await.unwrap().len(), 1);
        assert_eq!(db.list_emotion_logs("u-9", Some(1)).await.unwrap().len(), 1);

        let journal = std::fs::read_to_string(dir.path().join("stagemood-journal.jsonl")).unwrap();
        assert_eq!(journal.lines().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn locked_stage_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::build(dir.path()).unwrap();
        let student = StudentContext::new("u-9", "huda", "huda@example.com");
        assert!(replay(&ctx, student, &script(4, 2)).await.is_err());
    }
}
