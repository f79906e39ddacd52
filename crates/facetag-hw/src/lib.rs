//! facetag-hw: frame sources for recognition sessions.
//!
//! A V4L2 camera, still images (single file or directory), and video files
//! through OpenCV when built with the `video` feature.

pub mod camera;
pub mod frame;
pub mod sequence;
pub mod video;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use sequence::ImageSequence;
pub use video::VideoFile;
