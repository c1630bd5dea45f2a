//! Exponential backoff between submission attempts

use std::time::Duration;

/// Wait before retrying after failed `attempt` (1-based): `base * 2^(attempt-1)`.
///
/// There is no maximum-delay clamp; the number of attempts bounds the total
/// wait. Arithmetic saturates at `Duration::MAX` rather than overflowing.
pub fn delay(attempt: u32, base: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1);
    match 2u32.checked_pow(exponent) {
        Some(factor) => base.checked_mul(factor).unwrap_or(Duration::MAX),
        None if base.is_zero() => Duration::ZERO,
        None => Duration::MAX,
    }
}

/// Whole milliseconds for log fields, saturating at `u64::MAX`
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
