//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional face embeddings from aligned face crops using the
//! w600k_r50 ArcFace model.
//!
//! ArcFace compares faces by cosine similarity. The matcher compares by
//! Euclidean distance against a tolerance on the 0.1–1.0 scale, so each
//! embedding is normalized to length [`ARCFACE_EMBEDDING_NORM`]. For two such
//! vectors `distance = ARCFACE_EMBEDDING_NORM * sqrt(2 - 2 * cosine)`, which
//! puts [`ARCFACE_MATCH_COSINE`] exactly on [`DEFAULT_TOLERANCE`].

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{BoundingBox, Embedding, DEFAULT_TOLERANCE};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

/// Cosine similarity at which two ArcFace embeddings count as the same person.
pub const ARCFACE_MATCH_COSINE: f32 = 0.40;
/// `DEFAULT_TOLERANCE / sqrt(2 - 2 * ARCFACE_MATCH_COSINE)` = 0.6 / sqrt(1.2).
pub const ARCFACE_EMBEDDING_NORM: f32 = 0.547_722_6;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} (download w600k_r50.onnx from insightface and place it in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; alignment needs the detector keypoints")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Extract the embedding of one detected face in an RGB frame.
    ///
    /// The face is aligned to the canonical 112x112 template first, so the
    /// detector must have produced landmarks for it.
    pub fn extract(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(frame, landmarks);
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: to_match_space(raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

/// Convert an aligned 112x112 RGB crop into a NCHW float tensor.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }

    tensor
}

/// Rescale a raw ArcFace output to length [`ARCFACE_EMBEDDING_NORM`].
fn to_match_space(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        let k = ARCFACE_EMBEDDING_NORM / norm;
        raw.iter().map(|x| x * k).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{Matcher, NearestNeighbor};
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let aligned = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([128, 128, 128]));
        let tensor = preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_keeps_channel_order() {
        let aligned = RgbImage::from_pixel(ALIGNED_SIZE, ALIGNED_SIZE, Rgb([255, 0, 128]));
        let tensor = preprocess(&aligned);
        assert!((tensor[[0, 0, 5, 7]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 7]] + 1.0).abs() < 1e-6);
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 2, 5, 7]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_to_match_space_sets_norm() {
        let v = to_match_space(&[3.0, 4.0]);
        assert!((v[0] - 0.6 * ARCFACE_EMBEDDING_NORM).abs() < 1e-6);
        assert!((v[1] - 0.8 * ARCFACE_EMBEDDING_NORM).abs() < 1e-6);
        assert_eq!(to_match_space(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_norm_constant_puts_match_cosine_on_default_tolerance() {
        let expected = DEFAULT_TOLERANCE / (2.0 - 2.0 * ARCFACE_MATCH_COSINE).sqrt();
        assert!((ARCFACE_EMBEDDING_NORM - expected).abs() < 1e-6);
    }

    /// Two raw ArcFace-sized outputs whose cosine similarity is `cosine`.
    fn pair_at_cosine(cosine: f32) -> (Embedding, Embedding) {
        let mut a = vec![0.0f32; ARCFACE_EMBEDDING_DIM];
        let mut b = vec![0.0f32; ARCFACE_EMBEDDING_DIM];
        a[0] = 3.0;
        b[0] = 7.0 * cosine;
        b[1] = 7.0 * (1.0 - cosine * cosine).sqrt();
        (Embedding::new(to_match_space(&a)), Embedding::new(to_match_space(&b)))
    }

    #[test]
    fn test_same_person_cosines_match_at_default_tolerance() {
        for cosine in [0.41, 0.45, 0.5, 0.55, 0.8] {
            let (enrolled, query) = pair_at_cosine(cosine);
            let result = NearestNeighbor.best_match(&query, &[enrolled], DEFAULT_TOLERANCE);
            assert!(result.matched(), "cosine {cosine}: distance {:?}", result.distance);
        }
    }

    #[test]
    fn test_different_people_stay_unknown_at_default_tolerance() {
        for cosine in [0.35, 0.2, 0.0, -0.3] {
            let (enrolled, query) = pair_at_cosine(cosine);
            let result = NearestNeighbor.best_match(&query, &[enrolled], DEFAULT_TOLERANCE);
            assert!(!result.matched(), "cosine {cosine}: distance {:?}", result.distance);
        }
    }
}
