//! Dollar amounts accounted in integer micro-dollars.
//!
//! Summing station costs as `f64` drifts (`0.05 + 0.01 + 0.02 != 0.08`), which
//! would make the budget check flaky at the boundary. All accounting happens
//! in micros and converts back to dollars only at the API edge.

const MICROS_PER_DOLLAR: f64 = 1_000_000.0;

/// Scaled amounts this close to a whole micro are float noise, not a
/// fraction of a micro (`0.05 * 1e6` is `50000.000000000007`).
const NOISE_MICROS: f64 = 1e-6;

#[derive(Clone, Copy)]
enum Rounding {
    Nearest,
    Up,
    Down,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale(dollars: f64, rounding: Rounding) -> u64 {
    if dollars.is_nan() || dollars <= 0.0 {
        return 0;
    }
    if dollars.is_infinite() {
        return u64::MAX;
    }
    let micros = dollars * MICROS_PER_DOLLAR;
    let nearest = micros.round();
    let rounded = match rounding {
        Rounding::Nearest => nearest,
        _ if (micros - nearest).abs() < NOISE_MICROS => nearest,
        Rounding::Up => micros.ceil(),
        Rounding::Down => micros.floor(),
    };
    rounded as u64
}

/// Converts dollars to micro-dollars, rounding to the nearest micro.
/// Negative and NaN clamp to zero, infinity saturates.
#[must_use]
pub fn to_micros(dollars: f64) -> u64 {
    scale(dollars, Rounding::Nearest)
}

/// Converts a station cost to the micros it is charged. Fractions of a
/// micro round up, so a non-zero cost never charges zero.
#[must_use]
pub fn cost_to_micros(dollars: f64) -> u64 {
    scale(dollars, Rounding::Up)
}

/// Converts a budget to the micros that may be spent. Fractions of a micro
/// round down.
#[must_use]
pub fn budget_to_micros(dollars: f64) -> u64 {
    scale(dollars, Rounding::Down)
}

/// Converts micro-dollars back to dollars.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn to_dollars(micros: u64) -> f64 {
    if micros == u64::MAX {
        return f64::INFINITY;
    }
    micros as f64 / MICROS_PER_DOLLAR
}
