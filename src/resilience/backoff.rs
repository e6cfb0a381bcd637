//! Jittered retry delays.

use std::time::Duration;

use rand::Rng;

/// Milliseconds per attempt step of the jittered delay.
const JITTER_STEP_MS: f64 = 42.0;

/// `42 * random() * (attempt + 1)` milliseconds. Never zero, so it always schedules a retry.
pub fn jittered_delay(attempt: u32) -> Duration {
    // (0, 1] keeps the delay strictly positive
    let factor = 1.0 - rand::thread_rng().gen::<f64>();
    let ms = JITTER_STEP_MS * factor * f64::from(attempt + 1);
    Duration::from_nanos((ms * 1_000_000.0) as u64).max(Duration::from_nanos(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_bounds() {
        for attempt in 0..5 {
            for _ in 0..100 {
                let delay = jittered_delay(attempt);
                assert!(delay > Duration::ZERO);
                assert!(delay <= Duration::from_millis(42 * u64::from(attempt + 1)));
            }
        }
    }
}
