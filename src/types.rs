use std::fmt;

use serde::{Deserialize, Serialize};
use shakmaty::{Color, Piece};

/// A single piece reported by the detector, in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedPiece {
    pub label: Piece,
    pub center_x: f32,
    pub center_y: f32,
}

/// Everything one detection pass produced for an image.
#[derive(Debug, Clone, Default)]
pub struct Detections {
    pub width: u32,
    pub height: u32,
    pub pieces: Vec<DetectedPiece>,
}

/// Board layout inferred from a photo plus the side to move.
///
/// Castling rights, en passant target and move counters cannot be read off a
/// static image, so [`Position::fen`] always emits `- - 0 1` for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// Eight `/`-separated rank tokens, rank 8 first.
    pub placement: String,
    pub side_to_move: Color,
}

impl Position {
    pub fn fen(&self) -> String {
        format!("{} {} - - 0 1", self.placement, self.side_to_move.char())
    }
}

/// Engine evaluation, relative to the side to move.
///
/// A forced mate is kept apart from centipawn scores so the two are never
/// compared numerically by accident. `Mate(n)` with `n > 0` means the side to
/// move mates in `n`; `n <= 0` means it gets mated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    #[serde(rename = "cp")]
    Centipawns(i32),
    Mate(i32),
}

/// Finite stand-in for a forced mate once scores have to be compared linearly.
pub const MATE_SENTINEL: i32 = 10_000;

impl Score {
    /// Collapse to centipawns, clamping mates to [`MATE_SENTINEL`].
    pub fn to_centipawns(self) -> i32 {
        match self {
            Self::Centipawns(cp) => cp.clamp(-MATE_SENTINEL, MATE_SENTINEL),
            Self::Mate(n) if n > 0 => MATE_SENTINEL,
            Self::Mate(_) => -MATE_SENTINEL,
        }
    }

    /// The same score seen from the other side.
    ///
    /// `Mate(0)` (side to move is mated) becomes `Mate(1)` for the winner.
    pub fn flip(self) -> Self {
        match self {
            Self::Centipawns(cp) => Self::Centipawns(-cp),
            Self::Mate(0) => Self::Mate(1),
            Self::Mate(n) => Self::Mate(-n),
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Centipawns(cp) => write!(f, "{cp}"),
            Self::Mate(n) => write!(f, "Mate{n}"),
        }
    }
}

/// One line reported by the move search engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMove {
    /// UCI square-pair notation, e.g. `e2e4` or `e7e8q`.
    #[serde(rename = "move")]
    pub uci: String,
    /// Principal variation starting with `uci`.
    pub pv: Vec<String>,
    pub score: Score,
}

/// Raw per-move heuristics, computed on the position after the move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveMetrics {
    #[serde(rename = "move")]
    pub uci: String,
    /// Centipawns from the mover's point of view, mates clamped.
    pub engine_eval: i32,
    pub pv_length: u32,
    pub tactical_complexity: u32,
    /// `1` if the mover's king is not attacked after the move.
    pub king_safety: u8,
    pub positional_score: u32,
}

/// Each metric linearly rescaled into `[0, 1]` across the candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedMetrics {
    #[serde(rename = "norm_engine_eval")]
    pub engine_eval: f64,
    #[serde(rename = "norm_pv_length")]
    pub pv_length: f64,
    #[serde(rename = "norm_tactical_complexity")]
    pub tactical_complexity: f64,
    #[serde(rename = "norm_king_safety")]
    pub king_safety: f64,
    #[serde(rename = "norm_positional_score")]
    pub positional_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMove {
    #[serde(flatten)]
    pub metrics: MoveMetrics,
    #[serde(flatten)]
    pub normalized: NormalizedMetrics,
    pub total_score: f64,
}

/// Outcome of ranking: the winner, every candidate in input order, and the
/// templated justification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub best_move: RankedMove,
    pub all_moves: Vec<RankedMove>,
    pub reasoning: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fen_appends_placeholder_fields() {
        let position = Position {
            placement: "8/8/8/8/8/8/8/8".to_string(),
            side_to_move: Color::Black,
        };
        assert_eq!(position.fen(), "8/8/8/8/8/8/8/8 b - - 0 1");
    }

    #[test]
    fn mate_scores_clamp_to_sentinel() {
        assert_eq!(Score::Mate(3).to_centipawns(), MATE_SENTINEL);
        assert_eq!(Score::Mate(-2).to_centipawns(), -MATE_SENTINEL);
        assert_eq!(Score::Mate(0).to_centipawns(), -MATE_SENTINEL);
        assert_eq!(Score::Centipawns(45).to_centipawns(), 45);
        assert_eq!(Score::Mate(2).flip(), Score::Mate(-2));
        assert_eq!(Score::Mate(0).flip(), Score::Mate(1));
        assert_eq!(Score::Mate(0).flip().to_centipawns(), MATE_SENTINEL);
    }

    #[test]
    fn score_serializes_as_tagged_variant() {
        let json = serde_json::to_string(&Score::Centipawns(-30)).unwrap();
        assert_eq!(json, r#"{"cp":-30}"#);
        let json = serde_json::to_string(&Score::Mate(4)).unwrap();
        assert_eq!(json, r#"{"mate":4}"#);
    }
}
