use std::time::Duration;

use rand::Rng;

/// Exponential backoff: `base * 2^(attempt-1)` capped at `max`, then
/// jittered ±20 % so a fleet of consumers does not reconnect in lockstep.
/// `attempt` counts from 1.
pub fn delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
    let capped = exp.min(max);
    let factor = rand::rng().random_range(0.8..=1.2);
    capped.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(15 * 60);
    const MAX: Duration = Duration::from_secs(60 * 60);

    #[test]
    fn schedule_doubles_then_caps() {
        for _ in 0..50 {
            let d1 = delay(BASE, MAX, 1).as_secs_f64();
            let d2 = delay(BASE, MAX, 2).as_secs_f64();
            let d3 = delay(BASE, MAX, 3).as_secs_f64();
            let d4 = delay(BASE, MAX, 4).as_secs_f64();

            assert!((720.0..=1080.0).contains(&d1), "attempt 1: {d1}");
            assert!((1440.0..=2160.0).contains(&d2), "attempt 2: {d2}");
            assert!((2880.0..=4320.0).contains(&d3), "attempt 3: {d3}");
            // capped at one hour before jitter
            assert!((2880.0..=4320.0).contains(&d4), "attempt 4: {d4}");
        }
    }

    #[test]
    fn extreme_attempts_do_not_overflow() {
        let d = delay(BASE, MAX, u32::MAX);
        assert!(d <= MAX.mul_f64(1.2));
    }
}
