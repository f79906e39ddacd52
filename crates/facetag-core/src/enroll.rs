//! Enrollment: one photo, one face, one name.

use crate::encoder::{EncoderError, FaceEncoder};
use crate::quality::{self, QualityError};
use crate::store::{EncodingStore, StoreError};
use image::RgbImage;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// What to do when the name being enrolled already has embeddings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Keep existing embeddings and add the new one alongside them.
    #[default]
    Append,
    /// Drop existing embeddings for the name, then add the new one.
    Replace,
    /// Refuse the enrollment.
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown duplicate policy {other:?} (expected append, replace or reject)")),
        }
    }
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Append => "append",
            Self::Replace => "replace",
            Self::Reject => "reject",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrollOptions {
    pub policy: DuplicatePolicy,
    /// Run size/brightness checks before detection.
    pub validate: bool,
}

/// Outcome of a successful enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrolled {
    pub name: String,
    /// Store entries after this enrollment.
    pub total: usize,
    /// Entries for this name dropped under [`DuplicatePolicy::Replace`].
    pub replaced: usize,
    pub photo: PathBuf,
}

impl Enrolled {
    pub fn message(&self) -> String {
        match self.replaced {
            0 => format!("Face for {} enrolled successfully", self.name),
            n => format!("Face for {} enrolled successfully (replaced {n} previous)", self.name),
        }
    }
}

/// Why an enrollment was refused. `Display` is the user-facing message.
#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("Please enter a name first")]
    EmptyName,
    #[error("Name {0:?} cannot be used (no path separators, control characters, '.' or '..')")]
    InvalidName(String),
    #[error("Photo rejected: {0}")]
    Quality(#[from] QualityError),
    #[error("No face detected in the photo")]
    NoFace,
    #[error("Detected {0} faces. Please upload a photo with exactly one face")]
    MultipleFaces(usize),
    #[error("{0} is already enrolled")]
    AlreadyEnrolled(String),
    #[error("Face analysis failed: {0}")]
    Encoder(#[from] EncoderError),
    #[error("Encoding store: {0}")]
    Store(#[from] StoreError),
}

/// Trim and check a name that will also key a file name.
pub fn normalize_name(name: &str) -> Result<String, EnrollError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EnrollError::EmptyName);
    }
    let bad_char = |c: char| c == '/' || c == '\\' || c.is_control();
    if name == "." || name == ".." || name.chars().any(bad_char) {
        return Err(EnrollError::InvalidName(name.to_string()));
    }
    Ok(name.to_string())
}

/// Enroll the single face in `image` under `name`.
///
/// On any error the persisted store is left as it was.
pub fn enroll<E>(
    store: &EncodingStore,
    encoder: &mut E,
    image: &RgbImage,
    name: &str,
    options: &EnrollOptions,
) -> Result<Enrolled, EnrollError>
where
    E: FaceEncoder + ?Sized,
{
    let name = normalize_name(name)?;

    if options.validate {
        quality::validate_face_image(image)?;
    }

    let mut known = store.load()?;
    if options.policy == DuplicatePolicy::Reject && known.contains(&name) {
        return Err(EnrollError::AlreadyEnrolled(name));
    }

    let faces = encoder.locate(image)?;
    match faces.len() {
        0 => return Err(EnrollError::NoFace),
        1 => {}
        n => return Err(EnrollError::MultipleFaces(n)),
    }

    let embedding = encoder
        .encode(image, &faces)?
        .into_iter()
        .next()
        .ok_or_else(|| EncoderError::Other("encoder returned no embedding".into()))?;

    let previous = known.clone();
    let replaced = match options.policy {
        DuplicatePolicy::Replace => known.remove(&name),
        DuplicatePolicy::Append | DuplicatePolicy::Reject => 0,
    };
    if options.policy == DuplicatePolicy::Append && known.contains(&name) {
        tracing::info!(name = %name, existing = known.count(&name), "appending another embedding for existing name");
    }

    known.push(name.clone(), embedding);

    // Photo first: a name the filesystem refuses fails before the store changes.
    let staged = store.stage_photo(&name, image)?;
    store.save(&known)?;
    let photo = match staged.commit() {
        Ok(photo) => photo,
        Err(e) => {
            store.save(&previous)?;
            return Err(e.into());
        }
    };

    tracing::info!(
        name = %name,
        confidence = faces[0].confidence,
        total = known.len(),
        replaced,
        "enrolled face"
    );

    Ok(Enrolled {
        name,
        total: known.len(),
        replaced,
        photo,
    })
}
