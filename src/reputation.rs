//! Bounded reinforcement update for a user's trust score. Pure; does not
//! persist — `Routine` writes the result back through the store.

const K: f64 = 0.1;

/// Self-anchored update: at the fixed point `trust_score == outcome` the
/// score does not move, and deviation from it shrinks geometrically with
/// each observation.
pub fn compute_new_score(current_trust_score: f64, outcome: bool) -> f64 {
    let expected = current_trust_score;
    let actual = if outcome { 1.0 } else { 0.0 };
    let new = current_trust_score + K * (actual - expected);
    new.clamp(0.0, 1.0)
}
