//! Error types for the chess vision pipeline.
//!
//! Every collaborator failure funnels into [`VisionError`], whose variants
//! follow the categories the HTTP layer cares about: bad input, detector
//! failures, engine failures, text generation failures and unknown sequence
//! lookups. Malformed generated text is not an error; the explanation parser
//! absorbs it.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    /// No image, or an empty one, was uploaded.
    #[error("No file provided")]
    MissingImage,

    /// The multipart upload itself was malformed.
    #[error("Invalid upload: {0}")]
    InvalidUpload(#[from] axum::extract::multipart::MultipartError),

    /// The uploaded bytes could not be decoded as an image.
    #[error("Image decoding error: {0}")]
    ImageError(#[from] image::ImageError),

    /// Wraps an error returned by the underlying ONNX Runtime bindings.
    #[error("ONNX Runtime error: {0}")]
    OrtError(#[from] ort::Error),

    /// The detector produced a tensor of an unexpected shape.
    #[error("Tensor shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    /// Any other detector failure, e.g. a crashed inference thread.
    #[error("Detection failed: {0}")]
    Detection(String),

    /// The encoded FEN string could not be parsed.
    #[error("Invalid FEN: {0}")]
    InvalidFen(#[from] shakmaty::fen::ParseFenError),

    /// The detected board is not a position the engine can search.
    #[error("Invalid Chess Position: {0}")]
    InvalidPosition(#[from] shakmaty::PositionError<shakmaty::Chess>),

    /// The engine suggested a move that is not legal in the analysed position.
    #[error("Illegal move from engine: {0}")]
    IllegalMove(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// No stored sequence for the requested move.
    #[error("Move {0} not found")]
    SequenceNotFound(u32),

    /// Writing or reading rendered artifacts failed.
    #[error("Artifact storage error: {0}")]
    Artifact(#[from] std::io::Error),
}

impl VisionError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MissingImage | Self::InvalidUpload(_) => 400,
            Self::SequenceNotFound(_) => 404,
            _ => 500,
        }
    }
}

/// Failures of the move search engine process.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to start engine `{path}`: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine closed its output before finishing a command.
    #[error("engine exited unexpectedly")]
    Exited,

    #[error("engine protocol error: {0}")]
    Protocol(String),

    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),

    /// The process pool was shut down while waiting for a lease.
    #[error("engine pool closed")]
    PoolClosed,
}

/// Failures of the text generator collaborator.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Raised before any network call when no API key is configured.
    #[error("Missing GROQ_API_KEY in environment variables")]
    MissingApiKey,

    #[error("generation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed generation response: {0}")]
    Decode(#[from] serde_json::Error),
}
