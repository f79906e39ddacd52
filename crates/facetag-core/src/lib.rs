//! facetag-core: enroll face photos and recognize them in frames.
//!
//! Faces are found with SCRFD and embedded with ArcFace (ONNX Runtime, CPU),
//! kept in a flat encoding store, and matched by nearest Euclidean distance
//! under a fixed tolerance.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod enroll;
pub mod matcher;
pub mod quality;
pub mod recognizer;
pub mod render;
pub mod session;
pub mod store;
pub mod types;

pub use encoder::{default_data_dir, default_model_dir, EncoderError, FaceEncoder, OnnxFaceEncoder};
pub use enroll::{enroll, DuplicatePolicy, EnrollError, EnrollOptions, Enrolled};
pub use matcher::{recognize, Matcher, MatchResult, NearestNeighbor};
pub use render::LabelFont;
pub use session::{
    FrameReport, FrameSink, FrameSource, Session, SessionError, SessionOptions, SessionSummary, SinkError,
    SourceError, StopReason, StopToken,
};
pub use store::{EncodingStore, KnownFaces, StoreError};
pub use types::{BoundingBox, Detection, Embedding, DEFAULT_TOLERANCE, UNKNOWN_LABEL};
