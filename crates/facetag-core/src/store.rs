//! Encoding store: enrolled names and embeddings, plus one photo per name.
//!
//! Layout under the data directory:
//!
//! ```text
//! encodings/encodings.msgpack   parallel `names` / `encodings` lists
//! known_faces/<name>.jpg        last photo enrolled under <name>
//! ```
//!
//! The blob is loaded wholesale and rewritten wholesale. Writes go to a
//! sibling temp file that is renamed over the blob, so readers only ever see
//! a complete snapshot. There is no locking; one writer at a time.

use crate::types::Embedding;
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const ENCODINGS_DIR: &str = "encodings";
const ENCODINGS_FILE: &str = "encodings.msgpack";
const PHOTOS_DIR: &str = "known_faces";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding store {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to serialize encoding store: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to write photo {path}: {source}")]
    Photo {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// In-memory snapshot of the store: `names[i]` owns `encodings[i]`.
///
/// Names are not unique; re-enrolling a name adds another entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnownFaces {
    names: Vec<String>,
    encodings: Vec<Embedding>,
}

impl KnownFaces {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn encodings(&self) -> &[Embedding] {
        &self.encodings
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn push(&mut self, name: String, embedding: Embedding) {
        self.names.push(name);
        self.encodings.push(embedding);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Number of embeddings enrolled under `name`.
    pub fn count(&self, name: &str) -> usize {
        self.names.iter().filter(|n| *n == name).count()
    }

    /// Drop every entry enrolled under `name`, returning how many went.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.names.len();
        let (names, encodings) = self
            .names
            .drain(..)
            .zip(self.encodings.drain(..))
            .filter(|(n, _)| n != name)
            .unzip();
        self.names = names;
        self.encodings = encodings;
        before - self.names.len()
    }

    /// Enrolled names, deduplicated, in first-enrolled order.
    pub fn distinct_names(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for name in &self.names {
            if !seen.contains(&name.as_str()) {
                seen.push(name);
            }
        }
        seen
    }
}

/// A photo written beside its destination. Dropped without
/// [`commit`](StagedPhoto::commit), the temp file is removed.
#[derive(Debug)]
pub struct StagedPhoto {
    tmp: PathBuf,
    path: PathBuf,
    committed: bool,
}

impl StagedPhoto {
    /// Move the photo into place, overwriting any previous one.
    pub fn commit(mut self) -> Result<PathBuf, StoreError> {
        fs::rename(&self.tmp, &self.path).map_err(io_err(&self.path))?;
        self.committed = true;
        Ok(self.path.clone())
    }
}

impl Drop for StagedPhoto {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Handle to the on-disk store rooted at a data directory.
#[derive(Debug, Clone)]
pub struct EncodingStore {
    root: PathBuf,
}

impl EncodingStore {
    /// Open (and create, if needed) the store directories under `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = data_dir.into();
        for dir in [root.join(ENCODINGS_DIR), root.join(PHOTOS_DIR)] {
            fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path(&self) -> PathBuf {
        self.root.join(ENCODINGS_DIR).join(ENCODINGS_FILE)
    }

    pub fn photo_path(&self, name: &str) -> PathBuf {
        self.root.join(PHOTOS_DIR).join(format!("{name}.jpg"))
    }

    /// Load the full snapshot. A missing blob is an empty store; an
    /// unreadable or malformed one is an error.
    pub fn load(&self) -> Result<KnownFaces, StoreError> {
        let path = self.blob_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no encoding store yet");
                return Ok(KnownFaces::default());
            }
            Err(e) => return Err(io_err(&path)(e)),
        };

        let known: KnownFaces = rmp_serde::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if known.names.len() != known.encodings.len() {
            return Err(StoreError::Corrupt {
                path,
                reason: format!(
                    "{} names but {} encodings",
                    known.names.len(),
                    known.encodings.len()
                ),
            });
        }

        tracing::debug!(path = %path.display(), entries = known.len(), "loaded encoding store");
        Ok(known)
    }

    /// Replace the persisted snapshot with `known`.
    pub fn save(&self, known: &KnownFaces) -> Result<(), StoreError> {
        let path = self.blob_path();
        let tmp = path.with_extension("msgpack.tmp");
        let bytes = rmp_serde::to_vec_named(known)?;

        let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(&bytes).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
        drop(file);
        fs::rename(&tmp, &path).map_err(io_err(&path))?;

        tracing::debug!(path = %path.display(), entries = known.len(), "saved encoding store");
        Ok(())
    }

    /// Write the enrollment photo for `name` next to its final path. Nothing
    /// replaces the current photo until [`StagedPhoto::commit`].
    pub fn stage_photo(&self, name: &str, image: &RgbImage) -> Result<StagedPhoto, StoreError> {
        let path = self.photo_path(name);
        let tmp = self.root.join(PHOTOS_DIR).join(format!(".{name}.jpg.tmp"));
        image
            .save_with_format(&tmp, ImageFormat::Jpeg)
            .map_err(|source| {
                let _ = fs::remove_file(&tmp);
                StoreError::Photo { path: path.clone(), source }
            })?;
        Ok(StagedPhoto {
            tmp,
            path,
            committed: false,
        })
    }

    /// Delete the photo for `name`. Returns whether one existed.
    pub fn remove_photo(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.photo_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path)(e)),
        }
    }
}
