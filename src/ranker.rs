//! Weighted ranking of candidate moves.
//!
//! Each metric is min-max scaled across the candidate set, then the five
//! scaled values are combined with fixed weights. The weights sum to one, so
//! every total lands in `[0, 1]`.

use crate::types::{MoveMetrics, NormalizedMetrics, RankedMove};

pub const WEIGHT_ENGINE_EVAL: f64 = 0.40;
pub const WEIGHT_PV_LENGTH: f64 = 0.10;
pub const WEIGHT_TACTICAL_COMPLEXITY: f64 = 0.15;
pub const WEIGHT_KING_SAFETY: f64 = 0.15;
pub const WEIGHT_POSITIONAL_SCORE: f64 = 0.20;

/// Value every candidate gets on a metric where they all tie.
pub const NEUTRAL: f64 = 0.5;

/// Ranked candidates in input order plus the index of the winner.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    pub best: usize,
    pub moves: Vec<RankedMove>,
}

impl Ranking {
    pub fn best_move(&self) -> &RankedMove {
        &self.moves[self.best]
    }
}

/// Linear rescale into `[0, 1]`; [`NEUTRAL`] when `min == max`.
pub fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if max == min {
        return NEUTRAL;
    }
    (value - min) / (max - min)
}

fn normalize_column(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    values.iter().map(|&v| normalize(v, min, max)).collect()
}

/// Rank `metrics`, keeping their order. `None` for an empty set.
///
/// The winner is the first candidate holding the strictly highest total, so
/// ties go to whichever the engine listed first.
pub fn rank(metrics: Vec<MoveMetrics>) -> Option<Ranking> {
    if metrics.is_empty() {
        return None;
    }

    let column = |f: fn(&MoveMetrics) -> f64| -> Vec<f64> {
        normalize_column(&metrics.iter().map(f).collect::<Vec<_>>())
    };
    let engine_eval = column(|m| m.engine_eval as f64);
    let pv_length = column(|m| m.pv_length as f64);
    let tactical = column(|m| m.tactical_complexity as f64);
    let safety = column(|m| m.king_safety as f64);
    let positional = column(|m| m.positional_score as f64);

    let moves: Vec<RankedMove> = metrics
        .into_iter()
        .enumerate()
        .map(|(i, metrics)| {
            let normalized = NormalizedMetrics {
                engine_eval: engine_eval[i],
                pv_length: pv_length[i],
                tactical_complexity: tactical[i],
                king_safety: safety[i],
                positional_score: positional[i],
            };
            RankedMove {
                metrics,
                normalized,
                total_score: total_score(&normalized),
            }
        })
        .collect();

    let mut best = 0;
    for (i, m) in moves.iter().enumerate().skip(1) {
        if m.total_score > moves[best].total_score {
            best = i;
        }
    }

    Some(Ranking { best, moves })
}

pub fn total_score(n: &NormalizedMetrics) -> f64 {
    let total = n.engine_eval * WEIGHT_ENGINE_EVAL
        + n.pv_length * WEIGHT_PV_LENGTH
        + n.tactical_complexity * WEIGHT_TACTICAL_COMPLEXITY
        + n.king_safety * WEIGHT_KING_SAFETY
        + n.positional_score * WEIGHT_POSITIONAL_SCORE;
    // rounding in the weight sum can overshoot 1 by an ulp
    total.clamp(0.0, 1.0)
}
