use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Face region in pixel coordinates of the normalized image.
///
/// `right` and `bottom` are exclusive edges, matching the layout emitted by
/// dlib-style detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl FaceRegion {
    /// Region area in square pixels. Degenerate regions have area 0.
    pub fn area(&self) -> i64 {
        let width = (self.right - self.left).max(0);
        let height = (self.bottom - self.top).max(0);
        width.saturating_mul(height)
    }
}

/// Face embedding vector (128-dimensional for dlib-style encoders).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Callers must check dimensions first; extra components of the longer
    /// vector are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// One face produced by an [`EmbeddingProvider`](crate::EmbeddingProvider).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub region: FaceRegion,
    pub embedding: Embedding,
}

/// An enrolled identity. There is exactly one embedding per `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub embedding: Embedding,
    /// First successful enrollment under this id.
    pub enrolled_at: DateTime<Utc>,
    /// Last (re-)enrollment; equals `enrolled_at` until overwritten.
    pub updated_at: DateTime<Utc>,
}

/// One attendance event. Timestamps are UTC with second precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity_id: String,
    pub display_name: String,
    pub timestamp: DateTime<Utc>,
    /// Capture origin supplied by the caller (e.g. "upload", "gate-2").
    pub source: String,
    /// File name of the stored probe image.
    pub evidence: String,
}
