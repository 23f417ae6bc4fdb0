use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{SessionAggregator, SessionId};
use crate::capture::{CaptureSource, InferenceAdapter};

use super::config::SamplerConfig;
use super::feed::EmotionFeed;
use super::loop_worker::{sampling_loop, SamplingContext};
use super::state::{SamplerState, SamplerStatus};

/// Drives periodic inference for one session at a time.
pub struct EmotionSampler {
    camera: Arc<dyn CaptureSource>,
    model: Arc<dyn InferenceAdapter>,
    aggregator: SessionAggregator,
    feed: EmotionFeed,
    config: SamplerConfig,
    state: Arc<Mutex<SamplerState>>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl EmotionSampler {
    pub fn new(
        camera: Arc<dyn CaptureSource>,
        model: Arc<dyn InferenceAdapter>,
        aggregator: SessionAggregator,
        config: SamplerConfig,
    ) -> Self {
        let feed = EmotionFeed::new(config.history_len);
        Self {
            camera,
            model,
            aggregator,
            feed,
            config,
            state: Arc::new(Mutex::new(SamplerState::new())),
            handle: None,
            cancel_token: None,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SamplerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Begin sampling into `session` every `interval`, after the warm-up delay.
    ///
    /// An unloaded model is not an error here: ticks simply yield nothing
    /// until it loads.
    pub fn start(&mut self, session: SessionId, interval: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("sampler already active");
        }

        let run = {
            let mut state = self.lock_state();
            if !state.can_start() {
                bail!("sampler is {:?}", state.status);
            }
            state.begin_warmup()
        };

        if !self.model.is_loaded() {
            info!("starting sampler before the expression model is loaded");
        }

        let mut config = self.config.clone();
        config.interval = interval;

        let ctx = Arc::new(SamplingContext {
            session,
            run,
            camera: Arc::clone(&self.camera),
            model: Arc::clone(&self.model),
            aggregator: self.aggregator.clone(),
            feed: self.feed.clone(),
            state: Arc::clone(&self.state),
            config,
        });

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(sampling_loop(ctx, cancel_token.clone()));

        info!(
            "emotion sampling started for session {} every {}ms",
            session.value(),
            interval.as_millis()
        );

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Cancel the timer, abort any inference still running, and release the
    /// camera. Once this returns no detect call from this run is alive.
    ///
    /// Safe to call repeatedly and on a sampler that never started.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        {
            let mut state = self.lock_state();
            if state.status != SamplerStatus::Idle {
                state.stop();
            }
        }

        self.camera.stop().await;

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sampling loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }

    pub fn status(&self) -> SamplerStatus {
        self.lock_state().status
    }

    pub fn snapshot(&self) -> SamplerState {
        self.lock_state().clone()
    }

    pub fn feed(&self) -> &EmotionFeed {
        &self.feed
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }
}
