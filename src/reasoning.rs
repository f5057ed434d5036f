use crate::types::RankedMove;

/// Aspect names in tie-break priority order.
const ASPECTS: [&str; 5] = [
    "Engine Evaluation",
    "Positional Score",
    "King Safety",
    "Tactical Complexity",
    "Continuity (PV)",
];

/// The two aspects where `best` scored highest after normalization.
///
/// Equal values keep the order of [`ASPECTS`].
pub fn leading_aspects(best: &RankedMove) -> (&'static str, &'static str) {
    let n = &best.normalized;
    let mut aspects = [
        (ASPECTS[0], n.engine_eval),
        (ASPECTS[1], n.positional_score),
        (ASPECTS[2], n.king_safety),
        (ASPECTS[3], n.tactical_complexity),
        (ASPECTS[4], n.pv_length),
    ];
    // stable sort
    aspects.sort_by(|a, b| b.1.total_cmp(&a.1));
    (aspects[0].0, aspects[1].0)
}

/// Two-sentence justification naming the move and its two strongest aspects.
pub fn compose(best: &RankedMove) -> String {
    let (primary, secondary) = leading_aspects(best);
    format!(
        "Move `{}` is considered best primarily because of its {primary}, \
         which significantly influences the position. Additionally, it offers strong {secondary}, \
         making it a well-rounded and strategic option in this position.",
        best.metrics.uci
    )
}
