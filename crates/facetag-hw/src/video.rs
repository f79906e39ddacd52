//! Recorded video files decoded through OpenCV's videoio.
//!
//! Only available with the `video` feature; otherwise [`VideoFile::open`]
//! reports the source as unsupported.

use facetag_core::session::{FrameSource, SourceError};
use image::RgbImage;
use std::path::{Path, PathBuf};

#[cfg(feature = "video")]
pub struct VideoFile {
    path: PathBuf,
    capture: opencv::videoio::VideoCapture,
}

#[cfg(not(feature = "video"))]
pub struct VideoFile {
    path: PathBuf,
}

#[cfg(feature = "video")]
impl VideoFile {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        use opencv::prelude::*;
        use opencv::videoio::{VideoCapture, CAP_ANY};

        if !path.is_file() {
            return Err(SourceError::Unavailable(format!("{}: no such file", path.display())));
        }
        let unavailable = |e: opencv::Error| SourceError::Unavailable(format!("{}: {e}", path.display()));

        let capture = VideoCapture::from_file(&path.to_string_lossy(), CAP_ANY).map_err(unavailable)?;
        if !capture.is_opened().map_err(unavailable)? {
            return Err(SourceError::Unavailable(format!("{}: unsupported or unreadable video", path.display())));
        }

        tracing::debug!(path = %path.display(), "opened video file");
        Ok(Self {
            path: path.to_path_buf(),
            capture,
        })
    }
}

#[cfg(feature = "video")]
impl FrameSource for VideoFile {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        use opencv::core::{Mat, CV_8UC3};
        use opencv::prelude::*;

        let read_err = |e: opencv::Error| SourceError::Read(e.to_string());

        let mut mat = Mat::default();
        if !self.capture.read(&mut mat).map_err(read_err)? || mat.empty() {
            return Ok(None);
        }
        if mat.typ() != CV_8UC3 {
            return Err(SourceError::Read(format!("unexpected frame type {}", mat.typ())));
        }

        let (width, height) = (mat.cols() as u32, mat.rows() as u32);
        let bytes = mat.data_bytes().map_err(read_err)?;
        crate::frame::bgr_to_rgb(bytes, width, height)
            .map(Some)
            .map_err(|e| SourceError::Read(e.to_string()))
    }

    fn describe(&self) -> String {
        format!("video {}", self.path.display())
    }
}

#[cfg(not(feature = "video"))]
impl VideoFile {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        Err(SourceError::Unsupported(format!(
            "cannot play {}: facetag was built without video support (rebuild with `--features video`)",
            path.display()
        )))
    }
}

#[cfg(not(feature = "video"))]
impl FrameSource for VideoFile {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        Ok(None)
    }

    fn describe(&self) -> String {
        format!("video {}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "video"))]
    #[test]
    fn test_without_feature_is_unsupported() {
        match VideoFile::open(Path::new("clip.mp4")) {
            Err(SourceError::Unsupported(msg)) => assert!(msg.contains("--features video")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("video support is compiled out"),
        }
    }

    #[cfg(feature = "video")]
    #[test]
    fn test_missing_file_is_unavailable() {
        assert!(matches!(
            VideoFile::open(Path::new("/nonexistent/clip.mp4")),
            Err(SourceError::Unavailable(_))
        ));
    }
}
