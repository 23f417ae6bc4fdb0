use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    aggregator::{SessionAggregator, SessionId},
    capture::{CaptureSource, DetectorConfig, InferenceAdapter},
    error::SenseError,
    models::EmotionReading,
};

use super::{config::SamplerConfig, feed::EmotionFeed, state::SamplerState};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

// Import the logging macros (exported at crate root)
use crate::{log_info, log_warn};

/// Everything one sampling run needs; built fresh by every `start`.
pub(crate) struct SamplingContext {
    pub session: SessionId,
    pub run: u64,
    pub camera: Arc<dyn CaptureSource>,
    pub model: Arc<dyn InferenceAdapter>,
    pub aggregator: SessionAggregator,
    pub feed: EmotionFeed,
    pub state: Arc<Mutex<SamplerState>>,
    pub config: SamplerConfig,
}

impl SamplingContext {
    fn with_state<T>(&self, f: impl FnOnce(&mut SamplerState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

/// Result of one sample attempt that did not fail outright.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Reading(EmotionReading),
    NoFace,
    NoFrame,
    InvalidFrame { width: u32, height: u32 },
    ModelNotLoaded,
}

impl SampleOutcome {
    pub fn reading(&self) -> Option<EmotionReading> {
        match self {
            SampleOutcome::Reading(reading) => Some(*reading),
            _ => None,
        }
    }
}

/// Grab the current frame and classify it.
pub async fn sample_once(
    camera: &dyn CaptureSource,
    model: &dyn InferenceAdapter,
    detector: &DetectorConfig,
) -> Result<SampleOutcome, SenseError> {
    if !model.is_loaded() {
        return Ok(SampleOutcome::ModelNotLoaded);
    }

    let frame = match camera
        .frame()
        .await
        .map_err(|err| SenseError::CameraUnavailable(err.to_string()))?
    {
        Some(frame) => frame,
        None => return Ok(SampleOutcome::NoFrame),
    };

    if !frame.is_valid() {
        return Ok(SampleOutcome::InvalidFrame {
            width: frame.width(),
            height: frame.height(),
        });
    }

    let scores = model
        .detect(&frame, detector)
        .await
        .map_err(|err| SenseError::Inference(err.to_string()))?;

    Ok(match scores.and_then(|scores| scores.dominant()) {
        Some(reading) => SampleOutcome::Reading(reading),
        None => SampleOutcome::NoFace,
    })
}

pub(crate) async fn sampling_loop(ctx: Arc<SamplingContext>, cancel_token: CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(ctx.config.warmup) => {}
        _ = cancel_token.cancelled() => {
            log_info!("sampling for session {} cancelled during warm-up", ctx.session.value());
            return;
        }
    }

    if !ctx.with_state(|state| state.begin_sampling()) {
        return;
    }

    // First tick completes immediately: the first sample lands right after warm-up.
    let mut ticker = tokio::time::interval(ctx.config.tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Ticks stay owned by the loop so that no inference outlives it.
    let mut ticks = JoinSet::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !ctx.with_state(|state| state.try_begin_inference()) {
                    log_info!("inference still running for session {}; tick skipped", ctx.session.value());
                    continue;
                }
                ticks.spawn(run_tick(Arc::clone(&ctx), cancel_token.clone()));
            }
            Some(joined) = ticks.join_next(), if !ticks.is_empty() => {
                if let Err(err) = joined {
                    log_warn!("sampling tick for session {} panicked: {err}", ctx.session.value());
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("sampling loop for session {} shutting down", ctx.session.value());
                break;
            }
        }
    }

    if !ticks.is_empty() {
        log_info!("aborting in-flight inference for session {}", ctx.session.value());
    }
    ticks.shutdown().await;
}

async fn run_tick(ctx: Arc<SamplingContext>, cancel_token: CancellationToken) {
    let timeout = ctx.config.inference_timeout;
    let fut = sample_once(ctx.camera.as_ref(), ctx.model.as_ref(), &ctx.config.detector);

    let outcome = match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(err)) => {
            log_warn!("emotion sample failed for session {}: {err}", ctx.session.value());
            None
        }
        Err(_) => {
            let err = SenseError::InferenceTimeout(duration_ms(timeout));
            log_warn!("emotion sample for session {}: {err}", ctx.session.value());
            None
        }
    };

    let accepted = match outcome {
        Some(SampleOutcome::Reading(reading)) => {
            if cancel_token.is_cancelled() {
                log_info!(
                    "discarding {} reading that resolved after session {} stopped",
                    reading.emotion,
                    ctx.session.value()
                );
                false
            } else if ctx.aggregator.on_tagged_reading(ctx.session, reading) {
                ctx.feed.publish(reading);
                true
            } else {
                false
            }
        }
        Some(SampleOutcome::ModelNotLoaded) => {
            log_info!("{}; no reading this tick", SenseError::ModelNotLoaded);
            false
        }
        Some(SampleOutcome::InvalidFrame { width, height }) => {
            log_info!("skipping tick: {}", SenseError::InvalidFrame { width, height });
            false
        }
        Some(SampleOutcome::NoFace) | Some(SampleOutcome::NoFrame) | None => false,
    };

    ctx.with_state(|state| state.finish_inference(ctx.run, accepted));
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ScriptStep, ScriptedCamera, ScriptedModel};
    use crate::models::Emotion;

    #[tokio::test]
    async fn no_reading_when_model_not_loaded() {
        let camera = ScriptedCamera::default();
        camera.start().await.unwrap();
        let model = ScriptedModel::new(vec![ScriptStep::face(Emotion::Happy, 0.9)]);

        let outcome = sample_once(&camera, &model, &DetectorConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome, SampleOutcome::ModelNotLoaded);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn zero_sized_frame_is_skipped_without_inference() {
        let camera = ScriptedCamera::with_frame_size(0, 240);
        camera.start().await.unwrap();
        let model = ScriptedModel::preloaded(vec![ScriptStep::face(Emotion::Happy, 0.9)]);

        let outcome = sample_once(&camera, &model, &DetectorConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome, SampleOutcome::InvalidFrame { width: 0, height: 240 });
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn no_face_is_not_an_error() {
        let camera = ScriptedCamera::default();
        camera.start().await.unwrap();
        let model = ScriptedModel::preloaded(vec![ScriptStep::NoFace]);

        let outcome = sample_once(&camera, &model, &DetectorConfig::default())
            .await
            .unwrap();
        assert_eq!(outcome, SampleOutcome::NoFace);
        assert!(outcome.reading().is_none());
    }

    #[tokio::test]
    async fn classifier_error_surfaces_as_inference_error() {
        let camera = ScriptedCamera::default();
        camera.start().await.unwrap();
        let model = ScriptedModel::preloaded(vec![ScriptStep::Error {
            message: "backend lost".into(),
        }]);

        let err = sample_once(&camera, &model, &DetectorConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SenseError::Inference(_)));
    }

    #[tokio::test]
    async fn highest_score_becomes_the_reading() {
        let camera = ScriptedCamera::default();
        camera.start().await.unwrap();
        let model = ScriptedModel::preloaded(vec![ScriptStep::Scores {
            scores: vec![(Emotion::Neutral, 0.3), (Emotion::Surprised, 0.6), (Emotion::Happy, 0.1)],
        }]);

        let reading = sample_once(&camera, &model, &DetectorConfig::default())
            .await
            .unwrap()
            .reading()
            .unwrap();
        assert_eq!(reading.emotion, Emotion::Surprised);
        assert!((reading.confidence - 0.6).abs() < f32::EPSILON);
    }
}
