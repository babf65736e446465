//! Gate timing and buffer sizing.
//!
//! Gate lengths and pulse periods are given in seconds and programmed in
//! ticks of the board's 20 MHz timebase:
//!
//! ```text
//! ticks = max(round(seconds × 20e6), MIN_GATE_TICKS)
//! ```
//!
//! A continuous buffered session started without an explicit capacity gets
//! room for [`DEFAULT_BUFFER_SECONDS`] worth of gates.

use ctr_driver::{CounterError, Result, TIMEBASE_HZ};

/// Shortest gate the pulse generator can produce.
pub const MIN_GATE_TICKS: u32 = 2;

/// Seconds of samples a default-sized continuous ring holds.
pub const DEFAULT_BUFFER_SECONDS: f64 = 10.0;

/// Lower bound of a default-sized ring.
pub const MIN_DEFAULT_CAPACITY: usize = 64;

/// Upper bound of a default-sized ring (16 MiB of samples).
pub const MAX_DEFAULT_CAPACITY: usize = 1 << 22;

/// Convert a duration in seconds to timebase ticks.
pub fn gate_ticks(seconds: f64) -> Result<u32> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(CounterError::invalid_argument(format!(
            "gate length must be a positive number of seconds, got {seconds}"
        )));
    }
    let ticks = (seconds * TIMEBASE_HZ).round();
    if ticks > f64::from(u32::MAX) {
        return Err(CounterError::invalid_argument(format!(
            "gate length {seconds} s exceeds the timebase range ({:.1} s)",
            f64::from(u32::MAX) / TIMEBASE_HZ
        )));
    }
    Ok((ticks as u32).max(MIN_GATE_TICKS))
}

/// Duration in seconds of `ticks` timebase periods.
pub fn ticks_to_seconds(ticks: u32) -> f64 {
    f64::from(ticks) / TIMEBASE_HZ
}

/// Capacity for a continuous session with gates of `ticks`.
pub fn default_capacity(ticks: u32) -> usize {
    let gates = (DEFAULT_BUFFER_SECONDS * TIMEBASE_HZ / f64::from(ticks.max(MIN_GATE_TICKS))).ceil();
    if gates >= MAX_DEFAULT_CAPACITY as f64 {
        return MAX_DEFAULT_CAPACITY;
    }
    (gates as usize).clamp(MIN_DEFAULT_CAPACITY, MAX_DEFAULT_CAPACITY)
}

/// Resolve the ring capacity requested for a buffered session.
///
/// `0` selects [`default_capacity`] for a continuous session and is rejected
/// for a bounded one, which would never hold a sample.
pub fn resolve_capacity(requested: usize, continuous: bool, ticks: u32) -> Result<usize> {
    match (requested, continuous) {
        (0, true) => Ok(default_capacity(ticks)),
        (0, false) => Err(CounterError::invalid_argument(
            "a bounded session needs a non-zero capacity",
        )),
        (n, _) => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_ticks() {
        assert_eq!(gate_ticks(1.0), Ok(20_000_000));
        assert_eq!(gate_ticks(0.001), Ok(20_000));
        // 1.26 ticks rounds to 1, floored to the minimum
        assert_eq!(gate_ticks(63e-9), Ok(MIN_GATE_TICKS));
        assert_eq!(gate_ticks(1e-12), Ok(MIN_GATE_TICKS));
        assert_eq!(gate_ticks(123e-9), Ok(2));
        assert_eq!(gate_ticks(130e-9), Ok(3));
    }

    #[test]
    fn test_gate_ticks_rejects() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY, 1000.0] {
            assert!(gate_ticks(bad).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn test_default_capacity() {
        // 10 ms gates: 1000 gates in 10 s
        assert_eq!(default_capacity(200_000), 1000);
        // 1 s gates: clamped up
        assert_eq!(default_capacity(20_000_000), MIN_DEFAULT_CAPACITY);
        // shortest gates: clamped down
        assert_eq!(default_capacity(MIN_GATE_TICKS), MAX_DEFAULT_CAPACITY);
    }

    #[test]
    fn test_resolve_capacity() {
        assert_eq!(resolve_capacity(0, true, 200_000), Ok(1000));
        assert_eq!(resolve_capacity(17, false, 200_000), Ok(17));
        assert!(resolve_capacity(0, false, 200_000).is_err());
    }
}
