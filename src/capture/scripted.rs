//! Deterministic camera and model doubles driven by a JSON script.
//!
//! The `replay` CLI command runs a full stage attempt against these, and the
//! sampler and controller tests use them to script faces, misses and latency.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::{CaptureSource, DetectorConfig, ExpressionScores, Frame, InferenceAdapter};
use crate::models::Emotion;

/// What the scripted model answers on one `detect` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptStep {
    NoFace,
    Scores { scores: Vec<(Emotion, f32)> },
    Error { message: String },
}

impl ScriptStep {
    pub fn face(emotion: Emotion, score: f32) -> Self {
        ScriptStep::Scores {
            scores: vec![(emotion, score)],
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_width() -> u32 {
    320
}

fn default_height() -> u32 {
    240
}

/// A recorded or hand-written stage attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayScript {
    pub level: u32,
    pub score: u32,
    /// How long the student plays before the game reports completion.
    pub play_ms: u64,
    #[serde(default = "default_true")]
    pub camera_available: bool,
    #[serde(default)]
    pub camera_ready_ms: u64,
    #[serde(default = "default_width")]
    pub frame_width: u32,
    #[serde(default = "default_height")]
    pub frame_height: u32,
    #[serde(default = "default_true")]
    pub model_loads: bool,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
}

impl ReplayScript {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read replay script {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse replay script {}", path.display()))
    }

    pub fn camera(&self) -> ScriptedCamera {
        ScriptedCamera {
            available: self.camera_available,
            ready_after: Duration::from_millis(self.camera_ready_ms),
            width: self.frame_width,
            height: self.frame_height,
            ..ScriptedCamera::default()
        }
    }

    pub fn model(&self) -> ScriptedModel {
        ScriptedModel::new(self.steps.clone())
            .with_latency(Duration::from_millis(self.latency_ms))
            .with_load_failure(!self.model_loads)
    }
}

#[derive(Debug)]
pub struct ScriptedCamera {
    pub available: bool,
    pub ready_after: Duration,
    pub width: u32,
    pub height: u32,
    started_at: Mutex<Option<Instant>>,
    running: AtomicBool,
    stop_calls: AtomicUsize,
}

impl Default for ScriptedCamera {
    fn default() -> Self {
        Self {
            available: true,
            ready_after: Duration::ZERO,
            width: default_width(),
            height: default_height(),
            started_at: Mutex::new(None),
            running: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedCamera {
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    pub fn with_frame_size(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn with_ready_delay(ready_after: Duration) -> Self {
        Self {
            ready_after,
            ..Self::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    fn started_at(&self) -> Option<Instant> {
        match self.started_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl CaptureSource for ScriptedCamera {
    async fn start(&self) -> Result<()> {
        if !self.available {
            bail!("camera permission denied");
        }
        let mut guard = self
            .started_at
            .lock()
            .map_err(|_| anyhow!("camera state lock poisoned"))?;
        *guard = Some(Instant::now());
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn is_ready(&self) -> bool {
        self.is_running()
            && self
                .started_at()
                .map(|at| at.elapsed() >= self.ready_after)
                .unwrap_or(false)
    }

    async fn frame(&self) -> Result<Option<Frame>> {
        if !self.is_running() {
            return Ok(None);
        }
        Ok(Some(Frame::blank(self.width, self.height)))
    }
}

/// Answers `detect` calls from a queue of [`ScriptStep`]s; an empty queue means no face.
#[derive(Debug)]
pub struct ScriptedModel {
    steps: Mutex<VecDeque<ScriptStep>>,
    latency: Duration,
    fail_load: bool,
    loaded: AtomicBool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedModel {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            latency: Duration::ZERO,
            fail_load: false,
            loaded: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// A model that reports itself loaded without a `load` call.
    pub fn preloaded(steps: Vec<ScriptStep>) -> Self {
        let model = Self::new(steps);
        model.loaded.store(true, Ordering::SeqCst);
        model
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_load_failure(mut self, fail: bool) -> Self {
        self.fail_load = fail;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of `detect` calls that were ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Result<ScriptStep> {
        let mut steps = self
            .steps
            .lock()
            .map_err(|_| anyhow!("script queue lock poisoned"))?;
        Ok(steps.pop_front().unwrap_or(ScriptStep::NoFace))
    }
}

#[async_trait]
impl InferenceAdapter for ScriptedModel {
    async fn load(&self) -> Result<()> {
        if self.fail_load {
            bail!("model weights unreachable");
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// A step whose best score falls below `config.score_threshold` reads as
    /// no face, the way a weak detection is dropped by a real detector.
    async fn detect(
        &self,
        _frame: &Frame,
        config: &DetectorConfig,
    ) -> Result<Option<ExpressionScores>> {
        if config.input_size == 0 {
            bail!("detector input size must be positive");
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.next_step()? {
            ScriptStep::NoFace => Ok(None),
            ScriptStep::Scores { scores } => {
                let scores = ExpressionScores::new(scores);
                let detected = scores
                    .dominant()
                    .is_some_and(|reading| reading.confidence >= config.score_threshold);
                Ok(detected.then_some(scores))
            }
            ScriptStep::Error { message } => Err(anyhow!(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_script() {
        let script: ReplayScript = serde_json::from_str(
            r#"{
                "level": 2,
                "score": 2,
                "playMs": 65000,
                "steps": [
                    {"kind": "scores", "scores": [["happy", 0.8], ["neutral", 0.1]]},
                    {"kind": "no_face"},
                    {"kind": "error", "message": "gpu lost"}
                ]
            }"#,
        )
        .unwrap();

        assert!(script.camera_available);
        assert!(script.model_loads);
        assert_eq!(script.frame_width, 320);
        assert_eq!(script.steps.len(), 3);
        assert_eq!(script.steps[1], ScriptStep::NoFace);
    }

    #[tokio::test]
    async fn unavailable_camera_refuses_to_start() {
        let camera = ScriptedCamera::unavailable();
        assert!(camera.start().await.is_err());
        assert!(!camera.is_ready().await);
        assert!(camera.frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn weak_detection_below_threshold_is_no_face() {
        let steps = vec![
            ScriptStep::face(Emotion::Happy, 0.3),
            ScriptStep::face(Emotion::Happy, 0.3),
            ScriptStep::face(Emotion::Angry, 0.5),
        ];
        let model = ScriptedModel::preloaded(steps);
        let frame = Frame::blank(4, 4);
        let strict = DetectorConfig::default();
        let lenient = DetectorConfig {
            score_threshold: 0.2,
            ..DetectorConfig::default()
        };

        assert!(model.detect(&frame, &strict).await.unwrap().is_none());
        let scores = model.detect(&frame, &lenient).await.unwrap().unwrap();
        assert_eq!(scores.dominant().unwrap().emotion, Emotion::Happy);
        // The threshold itself still counts as a face.
        assert!(model.detect(&frame, &strict).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn zero_input_size_is_rejected() {
        let model = ScriptedModel::preloaded(vec![ScriptStep::face(Emotion::Sad, 0.9)]);
        let config = DetectorConfig {
            input_size: 0,
            ..DetectorConfig::default()
        };
        assert!(model.detect(&Frame::blank(4, 4), &config).await.is_err());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn exhausted_script_reports_no_face() {
        let model = ScriptedModel::preloaded(vec![ScriptStep::face(Emotion::Sad, 0.9)]);
        let frame = Frame::blank(4, 4);
        let config = DetectorConfig::default();

        let first = model.detect(&frame, &config).await.unwrap().unwrap();
        assert_eq!(first.dominant().unwrap().emotion, Emotion::Sad);
        assert!(model.detect(&frame, &config).await.unwrap().is_none());
        assert_eq!(model.calls(), 2);
    }
}
