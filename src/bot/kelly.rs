/// Kelly Criterion bet sizing.
///
/// The Kelly formula sizes a bet to maximise the expected logarithm of wealth,
/// which balances risk and reward optimally over the long run.
///
/// Standard formula:
///   f* = (b·p − q) / b
/// where
///   b  = net odds received on the bet (decimal odds − 1)
///   p  = estimated probability of winning
///   q  = 1 − p  (probability of losing)
///
/// We apply a *fractional* Kelly multiplier (typically half-Kelly) to reduce
/// variance at the cost of slightly lower expected growth, then cap the final
/// sizing fraction at a configured share of bankroll.

/// Calculate the Kelly stake fraction.
///
/// # Arguments
/// * `prob_win` – Estimated probability that the bet wins (0.0–1.0 exclusive).
/// * `odds` – Decimal odds, i.e. gross payout per unit staked (e.g. 2.0 for
///   even money). Derived from a market price as `1/price`.
/// * `fraction` – Fractional Kelly multiplier (0.5 = half-Kelly).
///
/// # Returns
/// The fraction of bankroll to stake (0.0–1.0). Returns `0.0` when inputs are
/// out of range or expected value is non-positive. Decimal odds of exactly 1
/// imply a zero payout multiplier and must short-circuit to avoid dividing by
/// zero.
pub fn kelly_fraction(prob_win: f64, odds: f64, fraction: f64) -> f64 {
    if odds <= 1.0 || prob_win <= 0.0 || prob_win >= 1.0 || fraction <= 0.0 {
        return 0.0;
    }

    let b = odds - 1.0;
    let q = 1.0 - prob_win;
    let kelly = (prob_win * b - q) / b;

    if kelly <= 0.0 {
        return 0.0; // no edge
    }

    (kelly * fraction).clamp(0.0, 1.0)
}

/// Calculate the actual USD bet size with risk limits applied.
///
/// The scaled Kelly fraction is capped at `max_bet_pct` of bankroll; the cap
/// applies to the sizing fraction, not to raw Kelly.
pub fn calculate_bet_size(
    bankroll: f64,
    estimated_prob: f64,
    market_odds: f64,
    max_bet_pct: f64,
    kelly_fraction_mult: f64,
) -> f64 {
    if bankroll <= 0.0 || max_bet_pct <= 0.0 || kelly_fraction_mult <= 0.0 {
        return 0.0;
    }

    let kelly = kelly_fraction(estimated_prob, market_odds, kelly_fraction_mult);
    if kelly <= 0.0 {
        return 0.0;
    }

    bankroll * kelly.min(max_bet_pct)
}
