//! Frame-by-frame recognition loop over a camera or recorded source.
//!
//! Single-threaded and blocking: each iteration reads a frame, recognizes,
//! draws, presents, then optionally sleeps. Cancellation goes through an
//! explicit [`StopToken`] checked once per iteration.

use crate::encoder::FaceEncoder;
use crate::matcher::{self, NearestNeighbor};
use crate::quality;
use crate::render::{self, LabelFont};
use crate::store::KnownFaces;
use crate::types::{Detection, DEFAULT_TOLERANCE};
use image::{imageops, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Cancellation handle shared between a running session and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("cannot open {0}")]
    Unavailable(String),
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("{0}")]
    Unsupported(String),
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("{path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write frame: {0}")]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Other(String),
}

/// Something that yields RGB frames until it runs dry.
pub trait FrameSource {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError>;

    /// Whether frames should be mirrored before display (selfie view).
    fn mirrored(&self) -> bool {
        false
    }

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        (**self).next_frame()
    }

    fn mirrored(&self) -> bool {
        (**self).mirrored()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Where annotated frames go.
pub trait FrameSink {
    fn present(&mut self, frame: &RgbImage, report: &FrameReport) -> Result<(), SinkError>;
}

/// Time spent in each stage of one iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTiming {
    pub read: Duration,
    pub recognize: Duration,
    pub render: Duration,
}

impl FrameTiming {
    pub fn total(&self) -> Duration {
        self.read + self.recognize + self.render
    }
}

/// What the sink learns about the frame it is presenting.
#[derive(Debug, Clone)]
pub struct FrameReport {
    /// Zero-based frame index within the session.
    pub index: u64,
    pub detections: Vec<Detection>,
    pub timing: FrameTiming,
}

impl FrameReport {
    pub fn status_line(&self) -> String {
        render::status_line(&self.detections)
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub tolerance: f32,
    /// Fixed pause after each frame.
    pub throttle: Option<Duration>,
    /// Per-frame processing budget (read + recognize + render + present).
    pub frame_budget: Option<Duration>,
    pub max_frames: Option<u64>,
    /// Override the source's mirroring preference.
    pub mirror: Option<bool>,
    /// Equalize each frame's luminance histogram before recognition.
    pub equalize: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            throttle: None,
            frame_budget: None,
            max_frames: None,
            mirror: None,
            equalize: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Stopped,
    EndOfStream,
    FrameLimit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub frames: u64,
    /// Faces detected across all frames.
    pub faces: u64,
    /// Frames with at least one recognized face.
    pub known_frames: u64,
    /// Frames whose processing exceeded the budget.
    pub over_budget: u64,
    pub slowest: Duration,
    pub stop_reason: StopReason,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("source: {0}")]
    Source(#[from] SourceError),
    #[error("sink: {0}")]
    Sink(#[from] SinkError),
}

/// One recognition run: an encoder, a snapshot of the store, and options.
pub struct Session<'a, E: FaceEncoder + ?Sized> {
    encoder: &'a mut E,
    known: &'a KnownFaces,
    font: Option<&'a LabelFont>,
    options: SessionOptions,
}

impl<'a, E: FaceEncoder + ?Sized> Session<'a, E> {
    pub fn new(encoder: &'a mut E, known: &'a KnownFaces, options: SessionOptions) -> Self {
        Self {
            encoder,
            known,
            font: None,
            options,
        }
    }

    pub fn with_font(mut self, font: Option<&'a LabelFont>) -> Self {
        self.font = font;
        self
    }

    /// Run until `stop` trips, the source ends, or `max_frames` is reached.
    ///
    /// A source read error or sink error ends the session with that error.
    pub fn run<S, K>(&mut self, source: &mut S, sink: &mut K, stop: &StopToken) -> Result<SessionSummary, SessionError>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let mirror = self.options.mirror.unwrap_or_else(|| source.mirrored());
        let mut summary = SessionSummary {
            frames: 0,
            faces: 0,
            known_frames: 0,
            over_budget: 0,
            slowest: Duration::ZERO,
            stop_reason: StopReason::EndOfStream,
        };

        tracing::info!(
            source = %source.describe(),
            enrolled = self.known.len(),
            tolerance = self.options.tolerance,
            mirror,
            "session started"
        );

        loop {
            if stop.is_stopped() {
                summary.stop_reason = StopReason::Stopped;
                break;
            }
            if self.options.max_frames.is_some_and(|max| summary.frames >= max) {
                summary.stop_reason = StopReason::FrameLimit;
                break;
            }

            let started = Instant::now();
            let Some(mut frame) = source.next_frame()? else {
                summary.stop_reason = StopReason::EndOfStream;
                break;
            };
            let read = started.elapsed();

            if mirror {
                imageops::flip_horizontal_in_place(&mut frame);
            }
            if self.options.equalize {
                quality::equalize(&mut frame);
            }

            let t = Instant::now();
            let detections = matcher::recognize(
                &mut *self.encoder,
                &NearestNeighbor,
                &frame,
                self.known,
                self.options.tolerance,
            );
            let recognize = t.elapsed();

            let t = Instant::now();
            render::draw(&mut frame, &detections, self.font);
            let render = t.elapsed();

            let report = FrameReport {
                index: summary.frames,
                detections,
                timing: FrameTiming { read, recognize, render },
            };
            sink.present(&frame, &report)?;
            let processing = started.elapsed();

            summary.frames += 1;
            summary.faces += report.detections.len() as u64;
            if report.detections.iter().any(Detection::is_known) {
                summary.known_frames += 1;
            }
            summary.slowest = summary.slowest.max(processing);

            if let Some(budget) = self.options.frame_budget {
                if processing > budget {
                    summary.over_budget += 1;
                    tracing::warn!(
                        frame = report.index,
                        elapsed_ms = processing.as_secs_f64() * 1000.0,
                        budget_ms = budget.as_secs_f64() * 1000.0,
                        recognize_ms = recognize.as_secs_f64() * 1000.0,
                        "frame over budget"
                    );
                }
            }
            tracing::debug!(
                frame = report.index,
                faces = report.detections.len(),
                elapsed_ms = processing.as_secs_f64() * 1000.0,
                "frame processed"
            );

            if let Some(pause) = self.options.throttle {
                std::thread::sleep(pause);
            }
        }

        tracing::info!(
            frames = summary.frames,
            faces = summary.faces,
            over_budget = summary.over_budget,
            reason = ?summary.stop_reason,
            "session finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::testing::{face_at, FakeEncoder, Script};
    use crate::types::Embedding;
    use image::Rgb;
    use std::collections::VecDeque;

    struct VecSource {
        frames: VecDeque<Result<RgbImage, &'static str>>,
        mirrored: bool,
    }

    impl VecSource {
        fn blank(n: usize) -> Self {
            Self {
                frames: (0..n).map(|_| Ok(RgbImage::new(64, 64))).collect(),
                mirrored: false,
            }
        }
    }

    impl FrameSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
            match self.frames.pop_front() {
                Some(Ok(f)) => Ok(Some(f)),
                Some(Err(e)) => Err(SourceError::Read(e.to_string())),
                None => Ok(None),
            }
        }

        fn mirrored(&self) -> bool {
            self.mirrored
        }

        fn describe(&self) -> String {
            "test frames".into()
        }
    }

    #[derive(Default)]
    struct Collect {
        frames: Vec<RgbImage>,
        reports: Vec<FrameReport>,
        stop_after: Option<(usize, StopToken)>,
        delay: Option<Duration>,
    }

    impl FrameSink for Collect {
        fn present(&mut self, frame: &RgbImage, report: &FrameReport) -> Result<(), SinkError> {
            self.frames.push(frame.clone());
            self.reports.push(report.clone());
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if let Some((n, token)) = &self.stop_after {
                if self.reports.len() >= *n {
                    token.stop();
                }
            }
            Ok(())
        }
    }

    fn known_ana() -> KnownFaces {
        let mut known = KnownFaces::default();
        known.push("ana".into(), Embedding::new(vec![0.0, 0.0]));
        known
    }

    #[test]
    fn test_runs_to_end_of_stream() {
        let known = known_ana();
        let mut encoder = FakeEncoder::new([
            Script::Faces(vec![(face_at(0.0), Embedding::new(vec![0.1, 0.0]))]),
            Script::Faces(vec![(face_at(0.0), Embedding::new(vec![3.0, 0.0]))]),
            Script::Faces(vec![]),
        ]);
        let mut sink = Collect::default();

        let summary = Session::new(&mut encoder, &known, SessionOptions::default())
            .run(&mut VecSource::blank(3), &mut sink, &StopToken::new())
            .unwrap();

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.faces, 2);
        assert_eq!(summary.known_frames, 1);
        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
        assert_eq!(sink.reports[0].status_line(), "Detected: ana");
        assert_eq!(sink.reports[1].detections[0].label(), "Unknown");
        assert_eq!(sink.reports[2].index, 2);
    }

    #[test]
    fn test_stop_token_set_before_start() {
        let known = known_ana();
        let mut encoder = FakeEncoder::default();
        let stop = StopToken::new();
        stop.stop();

        let summary = Session::new(&mut encoder, &known, SessionOptions::default())
            .run(&mut VecSource::blank(5), &mut Collect::default(), &stop)
            .unwrap();
        assert_eq!(summary.frames, 0);
        assert_eq!(summary.stop_reason, StopReason::Stopped);
        assert_eq!(encoder.locate_calls, 0);
    }

    #[test]
    fn test_stop_takes_effect_on_next_iteration() {
        let known = known_ana();
        let mut encoder = FakeEncoder::default();
        let stop = StopToken::new();
        let mut sink = Collect {
            stop_after: Some((2, stop.clone())),
            ..Collect::default()
        };

        let summary = Session::new(&mut encoder, &known, SessionOptions::default())
            .run(&mut VecSource::blank(10), &mut sink, &stop)
            .unwrap();
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.stop_reason, StopReason::Stopped);
    }

    #[test]
    fn test_max_frames() {
        let known = known_ana();
        let mut encoder = FakeEncoder::default();
        let options = SessionOptions {
            max_frames: Some(4),
            ..SessionOptions::default()
        };
        let summary = Session::new(&mut encoder, &known, options)
            .run(&mut VecSource::blank(10), &mut Collect::default(), &StopToken::new())
            .unwrap();
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.stop_reason, StopReason::FrameLimit);
    }

    #[test]
    fn test_read_error_ends_session() {
        let known = known_ana();
        let mut encoder = FakeEncoder::default();
        let mut source = VecSource::blank(1);
        source.frames.push_back(Err("camera unplugged"));
        let mut sink = Collect::default();

        let err = Session::new(&mut encoder, &known, SessionOptions::default())
            .run(&mut source, &mut sink, &StopToken::new())
            .unwrap_err();
        assert!(matches!(err, SessionError::Source(SourceError::Read(_))));
        assert_eq!(sink.reports.len(), 1);
    }

    #[test]
    fn test_encoder_failure_skips_frame_but_continues() {
        let known = known_ana();
        let mut encoder = FakeEncoder::new([
            Script::Fail("boom"),
            Script::Faces(vec![(face_at(0.0), Embedding::new(vec![0.0, 0.0]))]),
        ]);
        let mut sink = Collect::default();
        let summary = Session::new(&mut encoder, &known, SessionOptions::default())
            .run(&mut VecSource::blank(2), &mut sink, &StopToken::new())
            .unwrap();
        assert_eq!(summary.frames, 2);
        assert!(sink.reports[0].detections.is_empty());
        assert_eq!(sink.reports[1].detections[0].label(), "ana");
    }

    #[test]
    fn test_mirrored_source_is_flipped() {
        let known = known_ana();
        let mut encoder = FakeEncoder::default();
        let mut frame = RgbImage::new(8, 2);
        frame.put_pixel(0, 0, Rgb([255, 0, 0]));
        let mut source = VecSource {
            frames: VecDeque::from([Ok(frame.clone()), Ok(frame)]),
            mirrored: true,
        };
        let mut sink = Collect::default();

        Session::new(&mut encoder, &known, SessionOptions::default())
            .run(&mut source, &mut sink, &StopToken::new())
            .unwrap();
        assert_eq!(sink.frames[0].get_pixel(7, 0), &Rgb([255, 0, 0]));
        assert_eq!(sink.frames[0].get_pixel(0, 0), &Rgb([0, 0, 0]));

        // An explicit override wins over the source preference.
        let mut source = VecSource {
            frames: VecDeque::from([Ok(sink.frames[0].clone())]),
            mirrored: true,
        };
        let options = SessionOptions { mirror: Some(false), ..SessionOptions::default() };
        let mut sink2 = Collect::default();
        Session::new(&mut encoder, &known, options)
            .run(&mut source, &mut sink2, &StopToken::new())
            .unwrap();
        assert_eq!(sink2.frames[0].get_pixel(7, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_frame_budget_counts_slow_frames() {
        let known = known_ana();
        let mut encoder = FakeEncoder::default();
        let mut sink = Collect {
            delay: Some(Duration::from_millis(5)),
            ..Collect::default()
        };
        let options = SessionOptions {
            frame_budget: Some(Duration::from_millis(1)),
            ..SessionOptions::default()
        };
        let summary = Session::new(&mut encoder, &known, options)
            .run(&mut VecSource::blank(2), &mut sink, &StopToken::new())
            .unwrap();
        assert_eq!(summary.over_budget, 2);
        assert!(summary.slowest >= Duration::from_millis(5));
    }
}
