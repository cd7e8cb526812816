use serde::{Deserialize, Serialize};

/// Face descriptor produced by an extractor.
///
/// The dimensionality is whatever the extraction model emits; nothing here
/// assumes a fixed length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when no component is NaN or infinite. JSON cannot represent such
    /// values, so only finite descriptors survive persistence.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance to `other`, or `None` when the dimensions differ.
    pub fn distance(&self, other: &Descriptor) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        Some(sum.sqrt())
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// One face found in a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub descriptor: Descriptor,
    /// Landmarks as reported by the extractor; never interpreted here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<serde_json::Value>,
}

impl Detection {
    pub fn new(descriptor: Descriptor) -> Self {
        Self {
            descriptor,
            landmarks: None,
        }
    }
}
