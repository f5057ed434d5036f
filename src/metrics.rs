//! Per-candidate heuristics computed on the position after the move.

use shakmaty::{
    CastlingMode, Chess, Color, Move, Position as _, PositionError, Square, fen::Fen, uci::UciMove,
};
use tracing::debug;

use crate::{
    engine::MoveSearch,
    error::VisionError,
    types::{CandidateMove, MoveMetrics, Score},
};

/// Plies of the principal variation inspected for captures.
pub const TACTICAL_HORIZON: usize = 5;

const CENTER: [Square; 4] = [Square::D4, Square::D5, Square::E4, Square::E5];

/// Parse a FEN into a searchable position.
///
/// Boards read from photos often carry extra material or a side to move that
/// is already in check; both are tolerated. A missing king is not.
pub fn parse_position(fen: &str) -> Result<Chess, VisionError> {
    let fen: Fen = fen.parse()?;
    let position = fen
        .into_position::<Chess>(CastlingMode::Standard)
        .or_else(PositionError::ignore_too_much_material)
        .or_else(PositionError::ignore_impossible_check)?;
    Ok(position)
}

/// Resolve a UCI move string against `position`.
pub fn legal_move(position: &Chess, uci: &str) -> Result<Move, VisionError> {
    let parsed: UciMove = uci
        .parse()
        .map_err(|_| VisionError::IllegalMove(uci.to_string()))?;
    parsed
        .to_move(position)
        .map_err(|_| VisionError::IllegalMove(uci.to_string()))
}

/// Position after playing a legal move.
pub fn successor(position: &Chess, m: Move) -> Chess {
    let mut next = position.clone();
    next.play_unchecked(m);
    next
}

/// Compute [`MoveMetrics`] for every candidate, one at a time.
///
/// `engine_eval` re-searches each successor at `depth` and reports the score
/// from the mover's side.
pub async fn evaluate_candidates(
    search: &mut dyn MoveSearch,
    root_fen: &str,
    root: &Chess,
    candidates: &[CandidateMove],
    depth: u8,
) -> Result<Vec<MoveMetrics>, VisionError> {
    let mut metrics = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let m = legal_move(root, &candidate.uci)?;
        let mover = root.turn();
        let next = successor(root, m);

        let lines = search
            .search(root_fen, std::slice::from_ref(&candidate.uci), depth, 1)
            .await?;
        let engine_eval = mover_eval(lines.first().map(|l| l.score), &next);

        let row = MoveMetrics {
            uci: candidate.uci.clone(),
            engine_eval,
            pv_length: candidate.pv.len().max(1) as u32,
            tactical_complexity: tactical_complexity(root, &candidate.pv),
            king_safety: king_safety(&next, mover),
            positional_score: positional_score(&next),
        };
        debug!(?row, "candidate metrics");
        metrics.push(row);
    }
    Ok(metrics)
}

/// Turn the engine's verdict on the successor (relative to the side now to
/// move) into centipawns for the side that just moved.
fn mover_eval(successor_score: Option<Score>, next: &Chess) -> i32 {
    let score = match successor_score {
        Some(score) => score.flip(),
        // no line at all: the game is over after the move
        None if next.is_checkmate() => Score::Mate(1),
        None => Score::Centipawns(0),
    };
    score.to_centipawns()
}

/// Captures among the first [`TACTICAL_HORIZON`] plies of `pv`, found by
/// replaying the line on the board rather than guessing from notation.
pub fn tactical_complexity(root: &Chess, pv: &[String]) -> u32 {
    let mut position = root.clone();
    let mut captures = 0;
    for uci in pv.iter().take(TACTICAL_HORIZON) {
        let Ok(m) = legal_move(&position, uci) else {
            break;
        };
        if m.is_capture() {
            captures += 1;
        }
        position.play_unchecked(m);
    }
    captures
}

/// `1` when `mover`'s king is not attacked in `next`, else `0`.
pub fn king_safety(next: &Chess, mover: Color) -> u8 {
    let board = next.board();
    match board.king_of(mover) {
        Some(king) if board.attacks_to(king, !mover, board.occupied()).is_empty() => 1,
        _ => 0,
    }
}

/// Central squares attacked by the side to move plus its knights, bishops
/// and queens still on the board.
pub fn positional_score(next: &Chess) -> u32 {
    let side = next.turn();
    let board = next.board();
    let center = CENTER
        .iter()
        .filter(|&&sq| board.attacks_to(sq, side, board.occupied()).any())
        .count();
    let minor_and_queens = board.knights() | board.bishops() | board.queens();
    let developed = (board.by_color(side) & minor_and_queens).count();
    (center + developed) as u32
}
