//! Still images as a finite frame source: one file, or every image in a
//! directory in file-name order.

use facetag_core::session::{FrameSource, SourceError};
use image::RgbImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff"];

pub struct ImageSequence {
    origin: PathBuf,
    pending: VecDeque<PathBuf>,
    total: usize,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl ImageSequence {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let unavailable = |e: std::io::Error| SourceError::Unavailable(format!("{}: {e}", path.display()));

        let files: Vec<PathBuf> = if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(path)
                .map_err(unavailable)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image(p))
                .collect();
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(SourceError::Unavailable(format!("{}: no such file or directory", path.display())));
        };

        if files.is_empty() {
            return Err(SourceError::Unavailable(format!("{}: no images found", path.display())));
        }

        tracing::debug!(path = %path.display(), frames = files.len(), "opened image sequence");
        Ok(Self {
            origin: path.to_path_buf(),
            total: files.len(),
            pending: files.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        let img = image::open(&path).map_err(|e| SourceError::Read(format!("{}: {e}", path.display())))?;
        Ok(Some(img.to_rgb8()))
    }

    fn describe(&self) -> String {
        format!("{} ({} image(s))", self.origin.display(), self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_directory_is_read_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(4, 4, Rgb([2, 0, 0])).save(dir.path().join("b.png")).unwrap();
        RgbImage::from_pixel(4, 4, Rgb([1, 0, 0])).save(dir.path().join("a.png")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let mut seq = ImageSequence::open(dir.path()).unwrap();
        assert_eq!(seq.len(), 2);
        assert!(!seq.mirrored());
        assert_eq!(seq.next_frame().unwrap().unwrap().get_pixel(0, 0), &Rgb([1, 0, 0]));
        assert_eq!(seq.next_frame().unwrap().unwrap().get_pixel(0, 0), &Rgb([2, 0, 0]));
        assert!(seq.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.png");
        RgbImage::new(3, 3).save(&path).unwrap();
        let mut seq = ImageSequence::open(&path).unwrap();
        assert!(seq.next_frame().unwrap().is_some());
        assert!(seq.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_empty_directory_and_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(ImageSequence::open(dir.path()), Err(SourceError::Unavailable(_))));
        assert!(matches!(
            ImageSequence::open(&dir.path().join("nope")),
            Err(SourceError::Unavailable(_))
        ));
    }

    #[test]
    fn test_corrupt_image_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not a jpeg").unwrap();
        let mut seq = ImageSequence::open(&path).unwrap();
        assert!(matches!(seq.next_frame(), Err(SourceError::Read(_))));
    }
}
