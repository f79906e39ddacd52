//! The face-encoding seam: image in, face boxes and embeddings out.
//!
//! Enrollment and matching only ever talk to a [`FaceEncoder`]. The shipped
//! implementation chains the SCRFD detector and the ArcFace recognizer.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0}")]
    Other(String),
}

/// Opaque face detection + embedding backend.
///
/// `encode` returns exactly one embedding per input box, in the same order.
pub trait FaceEncoder {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EncoderError>;

    fn encode(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, EncoderError>;
}

impl<E: FaceEncoder + ?Sized> FaceEncoder for Box<E> {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EncoderError> {
        (**self).locate(image)
    }

    fn encode(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, EncoderError> {
        (**self).encode(image, faces)
    }
}

/// SCRFD + ArcFace running on ONNX Runtime.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EncoderError> {
        Ok(self.detector.detect(image)?)
    }

    fn encode(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, EncoderError> {
        faces
            .iter()
            .map(|face| self.recognizer.extract(image, face).map_err(EncoderError::from))
            .collect()
    }
}

/// Default model directory: `$XDG_DATA_HOME/facetag/models`, falling back to
/// `~/.local/share/facetag/models`.
pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}

/// Default data directory: `$XDG_DATA_HOME/facetag`, falling back to
/// `~/.local/share/facetag`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facetag")
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted encoder for exercising enrollment, matching and sessions
    //! without model files.

    use super::*;
    use std::collections::VecDeque;

    /// Scripted reply for one `locate` call.
    pub enum Script {
        Faces(Vec<(BoundingBox, Embedding)>),
        Fail(&'static str),
    }

    #[derive(Default)]
    pub struct FakeEncoder {
        scripts: VecDeque<Script>,
        current: Vec<(BoundingBox, Embedding)>,
        pub locate_calls: usize,
    }

    impl FakeEncoder {
        pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
            Self {
                scripts: scripts.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    pub fn face_at(x: f32) -> BoundingBox {
        BoundingBox {
            x,
            y: 10.0,
            width: 40.0,
            height: 40.0,
            confidence: 0.9,
            landmarks: None,
        }
    }

    impl FaceEncoder for FakeEncoder {
        fn locate(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>, EncoderError> {
            self.locate_calls += 1;
            match self.scripts.pop_front() {
                Some(Script::Faces(faces)) => {
                    let boxes = faces.iter().map(|(b, _)| b.clone()).collect();
                    self.current = faces;
                    Ok(boxes)
                }
                Some(Script::Fail(msg)) => Err(EncoderError::Other(msg.to_string())),
                None => {
                    self.current.clear();
                    Ok(Vec::new())
                }
            }
        }

        fn encode(&mut self, _image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, EncoderError> {
            faces
                .iter()
                .map(|face| {
                    self.current
                        .iter()
                        .find(|(b, _)| b == face)
                        .map(|(_, e)| e.clone())
                        .ok_or_else(|| EncoderError::Other("unknown face".into()))
                })
                .collect()
        }
    }
}
