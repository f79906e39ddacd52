//! Frame sinks for `facetag watch`.

use facetag_core::session::{FrameReport, FrameSink, SinkError};
use image::RgbImage;
use std::path::PathBuf;

/// Prints the recognition status whenever it changes and optionally writes
/// every annotated frame to a directory as `frame_000000.jpg`, ...
pub struct WatchSink {
    output_dir: Option<PathBuf>,
    last_status: Option<String>,
    quiet: bool,
}

impl WatchSink {
    pub fn new(output_dir: Option<PathBuf>) -> Result<Self, SinkError> {
        if let Some(dir) = &output_dir {
            std::fs::create_dir_all(dir).map_err(|source| SinkError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(Self {
            output_dir,
            last_status: None,
            quiet: false,
        })
    }

    #[cfg(test)]
    fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    fn frame_path(&self, index: u64) -> Option<PathBuf> {
        self.output_dir.as_ref().map(|dir| dir.join(format!("frame_{index:06}.jpg")))
    }
}

impl FrameSink for WatchSink {
    fn present(&mut self, frame: &RgbImage, report: &FrameReport) -> Result<(), SinkError> {
        if let Some(path) = self.frame_path(report.index) {
            frame.save(&path)?;
        }

        let status = report.status_line();
        if self.last_status.as_deref() != Some(status.as_str()) {
            if !self.quiet {
                println!("[frame {}] {status}", report.index);
            }
            self.last_status = Some(status);
        }
        Ok(())
    }
}
