use thiserror::Error;

/// Failures the sensing core can run into. None of them stop gameplay; the
/// controller turns each into a log line or a [`crate::events::Notice`].
#[derive(Debug, Error)]
pub enum SenseError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("camera did not become ready within {0} ms")]
    CameraTimeout(u64),

    #[error("expression model is not loaded yet")]
    ModelNotLoaded,

    #[error("failed to load expression model: {0}")]
    ModelLoad(String),

    #[error("frame has invalid dimensions {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },

    #[error("inference did not finish within {0} ms")]
    InferenceTimeout(u64),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("{sink} sink failed: {message}")]
    Persistence { sink: String, message: String },
}
