use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use log::{info, warn};
use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};

use crate::{
    aggregator::SessionAggregator,
    capture::{CaptureSource, InferenceAdapter},
    error::SenseError,
    events::{Notice, NoticeBus},
    models::{EmotionVerdict, ProgressRecord, StageInfo, StudentContext},
    recorder::{DispatchReport, Recorder},
    sensing::{EmotionFeed, EmotionSampler, SamplerConfig},
};

use super::{
    catalog::{stage_info, STAGE_COUNT},
    state::{next_unlocked_level, AttemptState, CameraPermission, GamePhase},
};

const CAMERA_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct StageControllerConfig {
    pub sampler: SamplerConfig,
    /// Bound on camera acquisition plus first usable frame.
    pub camera_timeout: Duration,
}

impl Default for StageControllerConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            camera_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSnapshot {
    pub stage: StageInfo,
    pub phase: GamePhase,
    pub camera: CameraPermission,
}

/// Result of finishing a stage's game.
pub struct AttemptOutcome {
    pub record: ProgressRecord,
    pub verdict: Option<EmotionVerdict>,
    /// Set when this attempt moved the student's frontier forward.
    pub unlocked_level: Option<u32>,
    /// Resolves once every recorder sink has finished. Safe to drop.
    pub persistence: JoinHandle<DispatchReport>,
}

/// Runs one stage attempt at a time: lesson, game with sampling, result.
#[derive(Clone)]
pub struct StageController {
    camera: Arc<dyn CaptureSource>,
    model: Arc<dyn InferenceAdapter>,
    aggregator: SessionAggregator,
    sampler: Arc<Mutex<EmotionSampler>>,
    feed: EmotionFeed,
    recorder: Recorder,
    notices: NoticeBus,
    student: StudentContext,
    config: StageControllerConfig,
    attempt: Arc<Mutex<Option<AttemptState>>>,
    next_attempt_id: Arc<AtomicU64>,
    /// Serializes `start_game` calls; the attempt itself stays unlocked while
    /// the camera comes up.
    starting: Arc<Mutex<()>>,
    current_level: Arc<Mutex<u32>>,
}

impl StageController {
    pub fn new(
        camera: Arc<dyn CaptureSource>,
        model: Arc<dyn InferenceAdapter>,
        recorder: Recorder,
        notices: NoticeBus,
        student: StudentContext,
        current_level: u32,
        config: StageControllerConfig,
    ) -> Self {
        let aggregator = SessionAggregator::new();
        let sampler = EmotionSampler::new(
            Arc::clone(&camera),
            Arc::clone(&model),
            aggregator.clone(),
            config.sampler.clone(),
        );
        let feed = sampler.feed().clone();

        Self {
            camera,
            model,
            aggregator,
            sampler: Arc::new(Mutex::new(sampler)),
            feed,
            recorder,
            notices,
            student,
            config,
            attempt: Arc::new(Mutex::new(None)),
            next_attempt_id: Arc::new(AtomicU64::new(1)),
            starting: Arc::new(Mutex::new(())),
            current_level: Arc::new(Mutex::new(current_level.max(1))),
        }
    }

    /// Load the expression model. A failure leaves sampling silent but the
    /// game playable.
    pub async fn load_model(&self) -> Result<(), SenseError> {
        if self.model.is_loaded() {
            return Ok(());
        }
        match self.model.load().await {
            Ok(()) => {
                info!("expression model loaded");
                Ok(())
            }
            Err(err) => {
                let err = SenseError::ModelLoad(format!("{err:#}"));
                warn!("{err}");
                Err(err)
            }
        }
    }

    pub fn feed(&self) -> &EmotionFeed {
        &self.feed
    }

    pub fn student(&self) -> &StudentContext {
        &self.student
    }

    pub async fn current_level(&self) -> u32 {
        *self.current_level.lock().await
    }

    pub async fn snapshot(&self) -> Option<AttemptSnapshot> {
        self.attempt.lock().await.as_ref().map(|attempt| AttemptSnapshot {
            stage: attempt.stage,
            phase: attempt.phase,
            camera: attempt.camera,
        })
    }

    /// Show a stage's lesson. Any attempt already open is torn down first.
    pub async fn open_stage(&self, level_number: u32) -> Result<StageInfo> {
        let stage = stage_info(level_number).ok_or_else(|| anyhow!("unknown stage {level_number}"))?;
        let current_level = self.current_level().await;
        if level_number > current_level {
            bail!("stage {level_number} is locked (current level {current_level})");
        }

        self.leave_stage().await?;
        let id = self.next_attempt_id.fetch_add(1, Ordering::SeqCst);
        *self.attempt.lock().await = Some(AttemptState::new(id, stage));
        info!("opened stage {level_number} ({})", stage.game_type);
        Ok(stage)
    }

    /// Leave the lesson for the game: ask for the camera once, then sample
    /// while the student plays. Camera problems never block the game.
    ///
    /// The attempt is not locked while the camera starts, so leaving or
    /// switching stages in the meantime is not held up. If the attempt is gone
    /// by the time the camera answers, the camera is released and this fails.
    pub async fn start_game(&self) -> Result<CameraPermission> {
        let _starting = self.starting.lock().await;

        let (attempt_id, needs_camera) = {
            let guard = self.attempt.lock().await;
            let attempt = guard.as_ref().ok_or_else(|| anyhow!("no stage is open"))?;
            if attempt.phase != GamePhase::Lesson {
                bail!("stage {} game already started", attempt.stage.level_number);
            }
            (attempt.id, attempt.camera == CameraPermission::Pending)
        };

        let permission = if needs_camera {
            Some(self.acquire_camera().await)
        } else {
            None
        };

        let mut attempt_guard = self.attempt.lock().await;
        let still_open = matches!(
            attempt_guard.as_ref(),
            Some(attempt) if attempt.id == attempt_id && attempt.phase == GamePhase::Lesson
        );
        if !still_open {
            drop(attempt_guard);
            if permission == Some(CameraPermission::Granted) {
                self.camera.stop().await;
            }
            bail!("stage closed while the camera was starting");
        }
        let attempt = attempt_guard
            .as_mut()
            .ok_or_else(|| anyhow!("no stage is open"))?;

        if let Some(permission) = permission {
            attempt.camera = permission;
        }

        attempt.begin_game(Instant::now())?;

        if attempt.camera == CameraPermission::Granted {
            let session = self.aggregator.begin_session();
            attempt.session = Some(session);
            self.feed.clear();

            let mut sampler = self.sampler.lock().await;
            if let Err(err) = sampler.start(session, self.config.sampler.interval) {
                warn!("emotion sampling not started: {err:#}");
            }
        }

        Ok(attempt.camera)
    }

    async fn acquire_camera(&self) -> CameraPermission {
        let timeout = self.config.camera_timeout;
        let camera = Arc::clone(&self.camera);
        let acquire = async move {
            camera.start().await?;
            while !camera.is_ready().await {
                tokio::time::sleep(CAMERA_POLL).await;
            }
            anyhow::Ok(())
        };

        let failure = match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(())) => {
                self.notices.emit(Notice::CameraActive);
                return CameraPermission::Granted;
            }
            Ok(Err(err)) => SenseError::CameraUnavailable(format!("{err:#}")),
            Err(_) => SenseError::CameraTimeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
        };

        warn!("{failure}; continuing without emotion sampling");
        self.camera.stop().await;
        self.notices.emit(Notice::CameraUnavailable {
            reason: failure.to_string(),
        });
        CameraPermission::Denied
    }

    /// Finish the game with `score`: stop sampling, fold the readings into a
    /// verdict, and hand the attempt to the recorder.
    pub async fn complete_game(&self, score: u32) -> Result<AttemptOutcome> {
        let mut attempt_guard = self.attempt.lock().await;
        let attempt = attempt_guard
            .as_mut()
            .ok_or_else(|| anyhow!("no stage is open"))?;
        let time_spent_seconds = attempt.complete(Instant::now())?;

        self.stop_sampler().await;
        let verdict = match attempt.session.take() {
            Some(_) => self.aggregator.end_session(),
            None => None,
        };

        let stage = attempt.stage;
        let record = ProgressRecord {
            level_number: stage.level_number,
            game_type: stage.game_type,
            score,
            is_completed: attempt.is_passing(score),
            time_spent_seconds,
            attempts: 1,
        };

        let unlocked_level = {
            let mut current = self.current_level.lock().await;
            let unlocked =
                next_unlocked_level(*current, stage.level_number, record.is_completed, STAGE_COUNT);
            if let Some(level) = unlocked {
                *current = level;
            }
            unlocked
        };

        match verdict {
            Some(verdict) => {
                info!(
                    "stage {} verdict: {} ({:.2})",
                    stage.level_number, verdict.emotion, verdict.confidence
                );
                self.notices.emit(Notice::VerdictReady {
                    level_number: stage.level_number,
                    verdict,
                });
            }
            None => info!("stage {} finished without emotion readings", stage.level_number),
        }

        let persistence = self.recorder.dispatch(&self.student, &record, verdict);

        Ok(AttemptOutcome {
            record,
            verdict,
            unlocked_level,
            persistence,
        })
    }

    /// Close the open stage, if any, discarding readings of an unfinished game.
    pub async fn leave_stage(&self) -> Result<()> {
        let previous = self.attempt.lock().await.take();
        let Some(previous) = previous else {
            return Ok(());
        };

        if previous.phase == GamePhase::Game {
            self.stop_sampler().await;
            if previous.session.is_some() {
                let _ = self.aggregator.end_session();
            }
            info!("left stage {} mid-game", previous.stage.level_number);
        }
        Ok(())
    }

    async fn stop_sampler(&self) {
        let mut sampler = self.sampler.lock().await;
        if let Err(err) = sampler.stop().await {
            warn!("failed to stop emotion sampler cleanly: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ScriptStep, ScriptedCamera, ScriptedModel};
    use crate::models::{Emotion, GameType};
    use crate::recorder::ProgressSink;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MemorySink {
        progress: StdMutex<Vec<ProgressRecord>>,
        emotions: StdMutex<Vec<(u32, EmotionVerdict)>>,
    }

    #[async_trait]
    impl ProgressSink for MemorySink {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn record_progress(&self, _: &StudentContext, record: &ProgressRecord) -> Result<()> {
            self.progress.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn record_emotion(
            &self,
            _: &StudentContext,
            level_number: u32,
            verdict: &EmotionVerdict,
        ) -> Result<()> {
            self.emotions.lock().unwrap().push((level_number, *verdict));
            Ok(())
        }
    }

    struct Harness {
        controller: StageController,
        camera: Arc<ScriptedCamera>,
        model: Arc<ScriptedModel>,
        sink: Arc<MemorySink>,
        notices: NoticeBus,
    }

    fn harness(camera: ScriptedCamera, model: ScriptedModel, current_level: u32) -> Harness {
        let camera = Arc::new(camera);
        let model = Arc::new(model);
        let sink = Arc::new(MemorySink::default());
        let notices = NoticeBus::new();
        let recorder = Recorder::new(Some(notices.clone())).with_sink(sink.clone());
        let config = StageControllerConfig {
            sampler: SamplerConfig {
                interval: Duration::from_secs(5),
                ..SamplerConfig::default()
            },
            camera_timeout: Duration::from_secs(5),
        };
        let controller = StageController::new(
            camera.clone(),
            model.clone(),
            recorder,
            notices.clone(),
            StudentContext::new("u-1", "layla", "layla@example.com"),
            current_level,
            config,
        );
        Harness {
            controller,
            camera,
            model,
            sink,
            notices,
        }
    }

    fn happy_script() -> Vec<ScriptStep> {
        vec![
            ScriptStep::face(Emotion::Happy, 0.9),
            ScriptStep::face(Emotion::Happy, 0.8),
            ScriptStep::face(Emotion::Neutral, 0.7),
            ScriptStep::face(Emotion::Happy, 0.6),
            ScriptStep::face(Emotion::Sad, 0.9),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn full_attempt_records_progress_and_verdict() {
        let h = harness(ScriptedCamera::default(), ScriptedModel::preloaded(happy_script()), 1);
        let mut notices = h.notices.subscribe();

        let stage = h.controller.open_stage(1).await.unwrap();
        assert_eq!(stage.game_type, GameType::Matching);
        assert_eq!(h.controller.snapshot().await.unwrap().phase, GamePhase::Lesson);

        let permission = h.controller.start_game().await.unwrap();
        assert_eq!(permission, CameraPermission::Granted);
        assert_eq!(notices.recv().await.unwrap(), Notice::CameraActive);

        // Samples at 1s, 6s, 11s, 16s, 21s.
        tokio::time::sleep(Duration::from_millis(21_500)).await;
        assert_eq!(h.model.calls(), 5);
        assert_eq!(h.controller.feed().snapshot().total, 5);

        let outcome = h.controller.complete_game(3).await.unwrap();
        assert!(!h.camera.is_running());
        assert_eq!(outcome.record.time_spent_seconds, 22);
        assert!(outcome.record.is_completed);
        assert_eq!(outcome.record.attempts, 1);
        assert_eq!(outcome.unlocked_level, Some(2));
        assert_eq!(h.controller.current_level().await, 2);

        let verdict = outcome.verdict.unwrap();
        assert_eq!(verdict.emotion, Emotion::Happy);
        assert!((verdict.confidence - 0.6).abs() < 1e-9);
        assert!(matches!(notices.recv().await.unwrap(), Notice::VerdictReady { level_number: 1, .. }));

        let report = outcome.persistence.await.unwrap();
        assert!(report.all_succeeded());
        assert_eq!(h.sink.progress.lock().unwrap().len(), 1);
        assert_eq!(h.sink.emotions.lock().unwrap().as_slice(), &[(1, verdict)]);
        assert_eq!(h.controller.snapshot().await.unwrap().phase, GamePhase::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn denied_camera_still_records_progress() {
        let h = harness(ScriptedCamera::unavailable(), ScriptedModel::preloaded(happy_script()), 1);
        let mut notices = h.notices.subscribe();

        h.controller.open_stage(1).await.unwrap();
        let permission = h.controller.start_game().await.unwrap();
        assert_eq!(permission, CameraPermission::Denied);
        assert!(matches!(notices.recv().await.unwrap(), Notice::CameraUnavailable { .. }));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(h.model.calls(), 0);

        let outcome = h.controller.complete_game(1).await.unwrap();
        assert!(outcome.verdict.is_none());
        assert!(!outcome.record.is_completed);
        assert_eq!(outcome.unlocked_level, None);

        outcome.persistence.await.unwrap();
        assert_eq!(h.sink.progress.lock().unwrap().len(), 1);
        assert!(h.sink.emotions.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_camera_times_out_and_game_proceeds() {
        let camera = ScriptedCamera::with_ready_delay(Duration::from_secs(30));
        let h = harness(camera, ScriptedModel::preloaded(happy_script()), 1);

        h.controller.open_stage(1).await.unwrap();
        let started = Instant::now();
        let permission = h.controller.start_game().await.unwrap();
        let waited = started.elapsed();

        assert_eq!(permission, CameraPermission::Denied);
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
        assert!(!h.camera.is_running());
        assert_eq!(h.controller.snapshot().await.unwrap().phase, GamePhase::Game);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_mid_game_discards_readings() {
        let h = harness(ScriptedCamera::default(), ScriptedModel::preloaded(happy_script()), 3);

        h.controller.open_stage(2).await.unwrap();
        h.controller.start_game().await.unwrap();
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(h.model.calls(), 2);

        // Switching stages tears the running game down first.
        h.controller.open_stage(3).await.unwrap();
        assert!(!h.camera.is_running());
        assert_eq!(h.controller.snapshot().await.unwrap().stage.level_number, 3);

        h.controller.start_game().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let outcome = h.controller.complete_game(4).await.unwrap();

        // Only the reading taken during stage 3 counts.
        let verdict = outcome.verdict.unwrap();
        assert_eq!(verdict.emotion, Emotion::Neutral);
        assert!((verdict.confidence - 1.0).abs() < 1e-9);
        assert_eq!(outcome.unlocked_level, Some(4));
        outcome.persistence.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_while_camera_starts_is_not_blocked() {
        let camera = ScriptedCamera::with_ready_delay(Duration::from_secs(3));
        let h = harness(camera, ScriptedModel::preloaded(happy_script()), 1);
        h.controller.open_stage(1).await.unwrap();

        let starter = h.controller.clone();
        let pending = tokio::spawn(async move { starter.start_game().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.camera.is_running());

        let before = Instant::now();
        let snapshot = h.controller.snapshot().await.unwrap();
        assert_eq!(snapshot.phase, GamePhase::Lesson);
        h.controller.leave_stage().await.unwrap();
        assert!(before.elapsed() < Duration::from_secs(1));
        assert!(h.controller.snapshot().await.is_none());

        // The camera comes up for an attempt that no longer exists.
        assert!(pending.await.unwrap().is_err());
        assert!(!h.camera.is_running());
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reopened_stage_ignores_camera_of_previous_attempt() {
        let camera = ScriptedCamera::with_ready_delay(Duration::from_secs(2));
        let h = harness(camera, ScriptedModel::preloaded(happy_script()), 1);
        h.controller.open_stage(1).await.unwrap();

        let starter = h.controller.clone();
        let pending = tokio::spawn(async move { starter.start_game().await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Same stage, new attempt, opened before the camera answered.
        h.controller.open_stage(1).await.unwrap();
        assert!(pending.await.unwrap().is_err());
        assert_eq!(h.controller.snapshot().await.unwrap().camera, CameraPermission::Pending);

        assert_eq!(h.controller.start_game().await.unwrap(), CameraPermission::Granted);
        assert!(h.camera.is_running());
        h.controller.leave_stage().await.unwrap();
    }

    #[tokio::test]
    async fn locked_and_unknown_stages_are_rejected() {
        let h = harness(ScriptedCamera::default(), ScriptedModel::preloaded(Vec::new()), 2);
        assert!(h.controller.open_stage(3).await.is_err());
        assert!(h.controller.open_stage(11).await.is_err());
        assert!(h.controller.open_stage(2).await.is_ok());
        assert!(h.controller.complete_game(1).await.is_err());
    }

    #[tokio::test]
    async fn replaying_an_earlier_stage_keeps_the_frontier() {
        let h = harness(ScriptedCamera::unavailable(), ScriptedModel::preloaded(Vec::new()), 5);
        h.controller.open_stage(2).await.unwrap();
        h.controller.start_game().await.unwrap();
        let outcome = h.controller.complete_game(2).await.unwrap();
        assert!(outcome.record.is_completed);
        assert_eq!(outcome.unlocked_level, None);
        assert_eq!(h.controller.current_level().await, 5);
    }

    #[tokio::test]
    async fn model_load_failure_is_reported() {
        let model = ScriptedModel::new(Vec::new()).with_load_failure(true);
        let h = harness(ScriptedCamera::default(), model, 1);
        let err = h.controller.load_model().await.unwrap_err();
        assert!(matches!(err, SenseError::ModelLoad(_)));

        let h = harness(ScriptedCamera::default(), ScriptedModel::new(Vec::new()), 1);
        h.controller.load_model().await.unwrap();
        assert!(h.model.is_loaded());
    }
}
