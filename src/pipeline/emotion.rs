use crate::error::{PipelineError, Result};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

pub const NUM_EMOTIONS: usize = 7;

/// The fixed FER-2013 label set. Order matches the classifier's output
/// layout and must never change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; NUM_EMOTIONS] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }

    /// Capitalised class name, as reported by the health endpoint.
    pub fn class_name(&self) -> &'static str {
        match self {
            Emotion::Angry => "Angry",
            Emotion::Disgust => "Disgust",
            Emotion::Fear => "Fear",
            Emotion::Happy => "Happy",
            Emotion::Sad => "Sad",
            Emotion::Surprise => "Surprise",
            Emotion::Neutral => "Neutral",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// One probability per emotion, indexed in [`Emotion::ALL`] order.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EmotionDistribution([f32; NUM_EMOTIONS]);

impl EmotionDistribution {
    /// All-zero reading. Only used for the "no face" stream response, it is
    /// not a valid probability distribution.
    pub fn zeros() -> EmotionDistribution {
        EmotionDistribution([0.; NUM_EMOTIONS])
    }

    /// Wraps raw classifier output. Rejects anything that is not 7 finite,
    /// non-negative values; the values are kept as-is, not re-normalized.
    pub fn from_probabilities(values: &[f32]) -> Result<EmotionDistribution> {
        let arr: [f32; NUM_EMOTIONS] = values.try_into().map_err(|_| {
            PipelineError::Classification(format!(
                "expected {NUM_EMOTIONS} outputs, got {}",
                values.len()
            ))
        })?;

        if let Some(bad) = arr.iter().find(|v| !v.is_finite() || **v < 0.) {
            return Err(PipelineError::Classification(format!(
                "output value {bad} is not a probability"
            )));
        }

        Ok(EmotionDistribution(arr))
    }

    pub fn get(&self, emotion: Emotion) -> f32 {
        self.0[emotion.index()]
    }

    pub fn values(&self) -> &[f32; NUM_EMOTIONS] {
        &self.0
    }

    pub fn sum(&self) -> f32 {
        self.0.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        Emotion::ALL.iter().copied().zip(self.0.iter().copied())
    }

    /// Highest-probability emotion. Ties go to the lowest index.
    pub fn argmax(&self) -> (Emotion, f32) {
        let mut best = 0;
        for (i, v) in self.0.iter().enumerate() {
            if *v > self.0[best] {
                best = i;
            }
        }
        (Emotion::ALL[best], self.0[best])
    }
}

impl Serialize for EmotionDistribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_EMOTIONS))?;
        for (emotion, p) in self.iter() {
            map.serialize_entry(emotion.label(), &p)?;
        }
        map.end()
    }
}

/// Per-face classifier verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub emotion: Emotion,
    pub confidence: f32,
    pub distribution: EmotionDistribution,
}

impl From<EmotionDistribution> for Classification {
    fn from(distribution: EmotionDistribution) -> Classification {
        let (emotion, confidence) = distribution.argmax();
        Classification {
            emotion,
            confidence,
            distribution,
        }
    }
}
