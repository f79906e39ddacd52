use serde::{Deserialize, Serialize};

/// Label shown for a face that matched nobody in the store.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Default maximum embedding distance for two faces to count as the same person.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Accepted tolerance range (inclusive).
pub const MIN_TOLERANCE: f32 = 0.1;
pub const MAX_TOLERANCE: f32 = 1.0;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Integer face rectangle in `(top, right, bottom, left)` order, clamped to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRect {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceRect {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

impl BoundingBox {
    /// Convert to an integer rectangle inside a `frame_width` × `frame_height` frame.
    pub fn to_rect(&self, frame_width: u32, frame_height: u32) -> FaceRect {
        let max_x = frame_width.saturating_sub(1) as f32;
        let max_y = frame_height.saturating_sub(1) as f32;
        FaceRect {
            top: self.y.round().clamp(0.0, max_y) as u32,
            right: (self.x + self.width).round().clamp(0.0, max_x) as u32,
            bottom: (self.y + self.height).round().clamp(0.0, max_y) as u32,
            left: self.x.round().clamp(0.0, max_x) as u32,
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two embeddings. This is the metric the
    /// match tolerance applies to.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face found in a frame: where it is, and who it matched (if anyone).
///
/// Transient; produced per frame and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Enrolled name of the best match within tolerance.
    pub name: Option<String>,
    /// Distance to the nearest enrolled embedding, if the store was non-empty.
    pub distance: Option<f32>,
}

impl Detection {
    /// Display label: the matched name, or [`UNKNOWN_LABEL`].
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_LABEL)
    }

    pub fn is_known(&self) -> bool {
        self.name.is_some()
    }
}

/// Clamp a user-supplied tolerance into the accepted range.
pub fn clamp_tolerance(tolerance: f32) -> f32 {
    if tolerance.is_nan() {
        return DEFAULT_TOLERANCE;
    }
    tolerance.clamp(MIN_TOLERANCE, MAX_TOLERANCE)
}
