use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Facial expression labels produced by the expression classifier.
///
/// The declaration order is the canonical iteration order used anywhere the
/// crate walks the whole label domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Neutral,
    Sad,
    Angry,
    Surprised,
    Fearful,
    Disgusted,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Happy,
        Emotion::Neutral,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Surprised,
        Emotion::Fearful,
        Emotion::Disgusted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Neutral => "neutral",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Surprised => "surprised",
            Emotion::Fearful => "fearful",
            Emotion::Disgusted => "disgusted",
        }
    }

    /// Label shown to students in the Arabic interface.
    pub fn arabic_label(&self) -> &'static str {
        match self {
            Emotion::Happy => "سعيد",
            Emotion::Neutral => "محايد",
            Emotion::Sad => "حزين",
            Emotion::Angry => "غضب",
            Emotion::Surprised => "مندهش",
            Emotion::Fearful => "خائف",
            // Shown as "bored" in the game.
            Emotion::Disgusted => "ملل",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Emotion::Happy => "😊",
            Emotion::Neutral => "😐",
            Emotion::Sad => "😢",
            Emotion::Angry => "😠",
            Emotion::Surprised => "😲",
            Emotion::Fearful => "😨",
            Emotion::Disgusted => "😴",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .into_iter()
            .find(|emotion| emotion.as_str() == value)
            .ok_or_else(|| anyhow!("unknown emotion '{value}'"))
    }
}

/// One classification result from a single sampler tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionReading {
    pub emotion: Emotion,
    /// Classifier score for `emotion`, in [0, 1].
    pub confidence: f32,
}

impl EmotionReading {
    pub fn new(emotion: Emotion, confidence: f32) -> Self {
        Self {
            emotion,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// The dominant emotion of one game session.
///
/// `confidence` is the share of buffered readings that voted for `emotion`,
/// not an average of classifier scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmotionVerdict {
    pub emotion: Emotion,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_label() {
        for emotion in Emotion::ALL {
            assert_eq!(emotion.as_str().parse::<Emotion>().unwrap(), emotion);
        }
        assert!("bored".parse::<Emotion>().is_err());
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&Emotion::Surprised).unwrap();
        assert_eq!(json, "\"surprised\"");
    }

    #[test]
    fn reading_confidence_is_clamped() {
        assert_eq!(EmotionReading::new(Emotion::Sad, 1.4).confidence, 1.0);
        assert_eq!(EmotionReading::new(Emotion::Sad, -0.2).confidence, 0.0);
    }
}
