//! Conversions between occupancy probabilities, odds and log-odds.
//!
//! Occupancy maps usually accumulate evidence as log-odds and clamp the resulting
//! probability to `[MIN_PROBABILITY, MAX_PROBABILITY]` so that no cell becomes certain.

/// Lower clamp for stored probabilities. Unknown cells resolve to this value.
pub const MIN_PROBABILITY: f64 = 0.1;

/// Upper clamp for stored probabilities.
pub const MAX_PROBABILITY: f64 = 0.9;

/// Odds `p / (1 - p)` of a probability.
///
/// PRECONDITION: `probability < 1`.
#[inline]
pub fn odds(probability: f64) -> f64 {
    probability / (1.0 - probability)
}

/// Log-odds `ln(p / (1 - p))` of a probability.
#[inline]
pub fn log_odds(probability: f64) -> f64 {
    odds(probability).ln()
}

/// Probability corresponding to the given log-odds.
#[inline]
pub fn probability_from_log_odds(log_odds: f64) -> f64 {
    1.0 / (1.0 + (-log_odds).exp())
}

/// Clamp a probability to `[MIN_PROBABILITY, MAX_PROBABILITY]`.
#[inline]
pub fn clamp_probability(probability: f64) -> f64 {
    probability.clamp(MIN_PROBABILITY, MAX_PROBABILITY)
}
