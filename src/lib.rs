//! Chess position analysis from a photo of a board.
//!
//! A detector model finds the pieces, the board is encoded as FEN, a UCI
//! engine lists the strongest candidate moves, and each candidate is scored
//! on five heuristics and ranked. A language model explains every candidate
//! in plain words, and the boards along each principal variation are
//! rendered for the client to step through.
//!
//! The principal type is [`Analyzer`], which runs that pipeline over
//! pluggable collaborators ([`PieceDetector`], [`SearchProvider`],
//! [`TextGenerator`]). [`server::router`] exposes it over HTTP.
//!
//! The library re‑exports `shakmaty` to make position construction easy.

pub mod analysis;
pub mod artifacts;
pub mod board;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod explanation;
pub mod generator;
pub mod metrics;
pub mod ranker;
pub mod reasoning;
pub mod render;
pub mod server;
pub mod types;

/// Request pipeline.
pub use analysis::{AnalysisReport, Analyzer, PipelineSettings};

/// Collaborator seams and their production implementations.
pub use detector::{OnnxDetector, PieceDetector};
pub use engine::{EnginePool, MoveSearch, SearchProvider};
pub use generator::{GroqClient, TextGenerator};

/// Error types produced by library operations.
pub use error::{EngineError, GenerationError, VisionError};

/// Shared data model.
pub use types::{CandidateMove, MoveMetrics, RankedMove, RankedResult, Score};

/// Re-export of `shakmaty` for convenience when building positions.
pub use shakmaty;
