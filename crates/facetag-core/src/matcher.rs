//! Nearest-neighbour matching of detected faces against enrolled embeddings.

use crate::encoder::FaceEncoder;
use crate::store::KnownFaces;
use crate::types::{Detection, Embedding};
use image::RgbImage;

/// Result of matching a query embedding against the enrolled faces.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Index of the nearest enrolled embedding, if it lies within tolerance.
    pub index: Option<usize>,
    /// Distance to the nearest enrolled embedding (`None` for an empty store).
    pub distance: Option<f32>,
}

impl MatchResult {
    pub fn matched(&self) -> bool {
        self.index.is_some()
    }
}

/// Strategy for comparing a query embedding against enrolled embeddings.
pub trait Matcher {
    fn best_match(&self, query: &Embedding, known: &[Embedding], tolerance: f32) -> MatchResult;
}

/// Dense linear scan by Euclidean distance.
///
/// The first minimum wins on ties, and a face matches when its nearest
/// distance is `<= tolerance`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighbor;

impl Matcher for NearestNeighbor {
    fn best_match(&self, query: &Embedding, known: &[Embedding], tolerance: f32) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, candidate) in known.iter().enumerate() {
            let d = query.distance(candidate);
            // Strict `<` keeps the earliest entry on equal distances.
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((i, d));
            }
        }

        match best {
            Some((idx, d)) if d <= tolerance => MatchResult { index: Some(idx), distance: Some(d) },
            Some((_, d)) => MatchResult { index: None, distance: Some(d) },
            None => MatchResult { index: None, distance: None },
        }
    }
}

/// Detect, embed and label every face in `frame`.
///
/// Output order follows the detector. Encoder failures are logged and
/// degrade to an empty result so a bad frame never stops the caller.
pub fn recognize<E, M>(
    encoder: &mut E,
    matcher: &M,
    frame: &RgbImage,
    known: &KnownFaces,
    tolerance: f32,
) -> Vec<Detection>
where
    E: FaceEncoder + ?Sized,
    M: Matcher + ?Sized,
{
    let faces = match encoder.locate(frame) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, "face detection failed; skipping frame");
            return Vec::new();
        }
    };
    if faces.is_empty() {
        return Vec::new();
    }

    let embeddings = match encoder.encode(frame, &faces) {
        Ok(embeddings) if embeddings.len() == faces.len() => embeddings,
        Ok(embeddings) => {
            tracing::warn!(
                faces = faces.len(),
                embeddings = embeddings.len(),
                "encoder returned a mismatched embedding count; skipping frame"
            );
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!(error = %e, "face encoding failed; skipping frame");
            return Vec::new();
        }
    };

    faces
        .into_iter()
        .zip(embeddings.iter())
        .map(|(bbox, embedding)| {
            let result = matcher.best_match(embedding, known.encodings(), tolerance);
            Detection {
                bbox,
                name: result.index.map(|i| known.names()[i].clone()),
                distance: result.distance,
            }
        })
        .collect()
}

/// Match quality in `[.., 1]`: `1 - nearest distance`, or 0.0 when nothing
/// was enrolled to compare against.
pub fn quality_score(nearest_distance: Option<f32>) -> f32 {
    nearest_distance.map_or(0.0, |d| 1.0 - d)
}
