//! Contracts for the camera and the expression classifier.
//!
//! Both are external collaborators: a browser media stream and a face-api style
//! model in production, [`scripted`] doubles for replays and tests.

pub mod scripted;

use anyhow::Result;
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

use crate::models::{Emotion, EmotionReading};

pub use scripted::{ReplayScript, ScriptStep, ScriptedCamera, ScriptedModel};

/// One decoded video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    image: DynamicImage,
}

impl Frame {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    /// Black RGB frame of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(DynamicImage::new_rgb8(width, height))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// A frame is only worth classifying when both dimensions are non-zero.
    pub fn is_valid(&self) -> bool {
        let (width, height) = self.image.dimensions();
        width > 0 && height > 0
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}

/// Face detector options passed with every inference call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfig {
    /// Square input resolution the detector resizes frames to.
    pub input_size: u32,
    /// Minimum face detection score; weaker detections count as "no face".
    pub score_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: 416,
            score_threshold: 0.5,
        }
    }
}

/// Per-label scores for one detected face, in the classifier's own order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionScores(pub Vec<(Emotion, f32)>);

impl ExpressionScores {
    pub fn new(scores: Vec<(Emotion, f32)>) -> Self {
        Self(scores)
    }

    /// Highest-scoring label as a reading. On equal scores the label listed
    /// first wins. Non-finite scores are ignored.
    pub fn dominant(&self) -> Option<EmotionReading> {
        let mut best: Option<(Emotion, f32)> = None;
        for &(emotion, score) in &self.0 {
            if !score.is_finite() {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((emotion, score)),
            }
        }
        best.map(|(emotion, score)| EmotionReading::new(emotion, score))
    }
}

/// Live camera stream.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Acquire the device. Fails when permission is denied or no camera exists.
    async fn start(&self) -> Result<()>;

    /// Release the device. Safe to call repeatedly and before `start`.
    async fn stop(&self);

    /// True once the stream delivers frames with usable dimensions.
    async fn is_ready(&self) -> bool;

    /// Current frame, or `None` while the stream is not running.
    async fn frame(&self) -> Result<Option<Frame>>;
}

/// Face detection plus expression classification.
#[async_trait]
pub trait InferenceAdapter: Send + Sync {
    /// Load model weights. May be called again after a failure.
    async fn load(&self) -> Result<()>;

    fn is_loaded(&self) -> bool;

    /// `Ok(None)` means no face was found in the frame.
    async fn detect(
        &self,
        frame: &Frame,
        config: &DetectorConfig,
    ) -> Result<Option<ExpressionScores>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dominant_picks_highest_score() {
        let scores = ExpressionScores::new(vec![
            (Emotion::Neutral, 0.2),
            (Emotion::Happy, 0.7),
            (Emotion::Sad, 0.1),
        ]);
        let reading = scores.dominant().unwrap();
        assert_eq!(reading.emotion, Emotion::Happy);
        assert!((reading.confidence - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn dominant_tie_goes_to_first_listed() {
        let scores = ExpressionScores::new(vec![(Emotion::Angry, 0.4), (Emotion::Sad, 0.4)]);
        assert_eq!(scores.dominant().unwrap().emotion, Emotion::Angry);
    }

    #[test]
    fn dominant_skips_nan_and_handles_empty() {
        assert!(ExpressionScores::default().dominant().is_none());
        let scores = ExpressionScores::new(vec![(Emotion::Fearful, f32::NAN), (Emotion::Neutral, 0.3)]);
        assert_eq!(scores.dominant().unwrap().emotion, Emotion::Neutral);
    }

    #[test]
    fn zero_sized_frame_is_invalid() {
        assert!(!Frame::blank(0, 240).is_valid());
        assert!(!Frame::blank(320, 0).is_valid());
        assert!(Frame::blank(320, 240).is_valid());
    }
}
