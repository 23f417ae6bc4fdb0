//! Best-effort fan-out of finished attempts to every configured store.
//!
//! Each sink runs on its own task. One sink failing is logged and surfaced
//! as a [`Notice::PersistenceFailed`]; it never blocks gameplay or the
//! other sinks.

mod jsonl;
mod sqlite;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::SenseError;
use crate::events::{Notice, NoticeBus};
use crate::models::{EmotionVerdict, ProgressRecord, StudentContext};

pub use jsonl::JsonlSink;
pub use sqlite::SqliteSink;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[async_trait]
pub trait ProgressSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn record_progress(&self, student: &StudentContext, record: &ProgressRecord) -> Result<()>;

    async fn record_emotion(
        &self,
        student: &StudentContext,
        level_number: u32,
        verdict: &EmotionVerdict,
    ) -> Result<()>;
}

/// Per-sink result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub sink: &'static str,
    pub progress_saved: bool,
    /// `None` when there was no verdict to save.
    pub emotion_saved: Option<bool>,
}

impl SinkReport {
    pub fn succeeded(&self) -> bool {
        self.progress_saved && self.emotion_saved.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sinks: Vec<SinkReport>,
}

impl DispatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &SinkReport> {
        self.sinks.iter().filter(|report| !report.succeeded())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

#[derive(Clone, Default)]
pub struct Recorder {
    sinks: Vec<Arc<dyn ProgressSink>>,
    notices: Option<NoticeBus>,
}

impl Recorder {
    pub fn new(notices: Option<NoticeBus>) -> Self {
        Self {
            sinks: Vec::new(),
            notices,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|sink| sink.name()).collect()
    }

    /// Hand one attempt to every sink in the background.
    ///
    /// The returned handle resolves once all sinks are done; callers are free
    /// to drop it.
    pub fn dispatch(
        &self,
        student: &StudentContext,
        record: &ProgressRecord,
        verdict: Option<EmotionVerdict>,
    ) -> JoinHandle<DispatchReport> {
        let handles: Vec<_> = self
            .sinks
            .iter()
            .map(|sink| {
                tokio::spawn(write_to_sink(
                    Arc::clone(sink),
                    student.clone(),
                    record.clone(),
                    verdict,
                    self.notices.clone(),
                ))
            })
            .collect();

        tokio::spawn(async move {
            let mut report = DispatchReport::default();
            for handle in handles {
                match handle.await {
                    Ok(sink_report) => report.sinks.push(sink_report),
                    Err(err) => {
                        log_error!("recorder sink task panicked: {err}");
                    }
                }
            }
            report
        })
    }
}

async fn write_to_sink(
    sink: Arc<dyn ProgressSink>,
    student: StudentContext,
    record: ProgressRecord,
    verdict: Option<EmotionVerdict>,
    notices: Option<NoticeBus>,
) -> SinkReport {
    let name = sink.name();
    let report_failure = |what: &str, err: &anyhow::Error| {
        let failure = SenseError::Persistence {
            sink: name.to_string(),
            message: format!("{what} for level {}: {err:#}", record.level_number),
        };
        log_warn!("{failure}");
        if let Some(bus) = &notices {
            bus.emit(Notice::PersistenceFailed {
                sink: name.to_string(),
                message: format!("{what}: {err}"),
            });
        }
    };

    let progress_saved = match sink.record_progress(&student, &record).await {
        Ok(()) => true,
        Err(err) => {
            report_failure("progress", &err);
            false
        }
    };

    let emotion_saved = match verdict {
        Some(verdict) => Some(
            match sink.record_emotion(&student, record.level_number, &verdict).await {
                Ok(()) => true,
                Err(err) => {
                    report_failure("emotion verdict", &err);
                    false
                }
            },
        ),
        None => None,
    };

    if progress_saved && emotion_saved != Some(false) {
        log_info!("{name}: stored level {} attempt for {}", record.level_number, student.user_id);
    }

    SinkReport {
        sink: name,
        progress_saved,
        emotion_saved,
    }
}
