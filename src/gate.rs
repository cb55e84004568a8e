//! Dual-rate gate.
//!
//! Decides, per named stream, whether enough time has passed since the stream last
//! emitted. Each stream has its own minimum interval and its own clock:
//!
//! - a stream that has never emitted is always eligible;
//! - otherwise it is eligible iff `now - last_emitted_at > interval` (strict);
//! - an eligible answer records `now` as the stream's new `last_emitted_at`.
//!
//! The gate itself only holds the intervals. The mutable per-stream timestamps live in
//! `GateState`, owned by the caller and passed in on every call.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Stream name for detection events.
pub const DETECTION_STREAM: &str = "detection";

/// Stream name for preview frames.
pub const FRAME_STREAM: &str = "frame";

/// Per-stream minimum intervals.
#[derive(Clone, Debug, Default)]
pub struct DualRateGate {
    intervals: HashMap<String, Duration>,
}

impl DualRateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate with the two monitor streams configured.
    pub fn for_monitor(detection_interval: Duration, frame_interval: Duration) -> Self {
        Self::new()
            .with_stream(DETECTION_STREAM, detection_interval)
            .with_stream(FRAME_STREAM, frame_interval)
    }

    /// Configure (or replace) a stream's minimum interval.
    pub fn with_stream(mut self, stream: impl Into<String>, interval: Duration) -> Self {
        self.intervals.insert(stream.into(), interval);
        self
    }

    /// Minimum interval for a stream. Unconfigured streams use a zero interval.
    pub fn interval(&self, stream: &str) -> Duration {
        self.intervals.get(stream).copied().unwrap_or(Duration::ZERO)
    }

    /// Returns true when `stream` may emit at `now`, recording `now` in `state` if so.
    pub fn should_emit(&self, state: &mut GateState, stream: &str, now: Instant) -> bool {
        let eligible = match state.last_emitted_at(stream) {
            Some(last) => now.saturating_duration_since(last) > self.interval(stream),
            None => true,
        };
        if eligible {
            state.record(stream, now);
        }
        eligible
    }
}

/// Last emission instant per stream. Absent means "never emitted".
#[derive(Clone, Debug, Default)]
pub struct GateState {
    last_emitted_at: HashMap<String, Instant>,
}

impl GateState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_emitted_at(&self, stream: &str) -> Option<Instant> {
        self.last_emitted_at.get(stream).copied()
    }

    fn record(&mut self, stream: &str, now: Instant) {
        match self.last_emitted_at.get_mut(stream) {
            Some(last) => *last = now,
            None => {
                self.last_emitted_at.insert(stream.to_string(), now);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn first_call_is_always_eligible() {
        let gate = DualRateGate::for_monitor(ms(1000), ms(200));
        let mut state = GateState::new();
        assert!(gate.should_emit(&mut state, DETECTION_STREAM, Instant::now()));
    }

    #[test]
    fn second_call_within_interval_is_rejected() {
        for interval in [ms(1), ms(200), ms(1000), ms(5000)] {
            let gate = DualRateGate::new().with_stream("s", interval);
            let mut state = GateState::new();
            let t0 = Instant::now();

            assert!(gate.should_emit(&mut state, "s", t0));
            assert!(!gate.should_emit(&mut state, "s", t0 + interval / 2));
            assert!(gate.should_emit(&mut state, "s", t0 + interval + ms(1)));
        }
    }

    #[test]
    fn exactly_one_interval_is_not_enough() {
        let gate = DualRateGate::new().with_stream("s", ms(200));
        let mut state = GateState::new();
        let t0 = Instant::now();

        assert!(gate.should_emit(&mut state, "s", t0));
        assert!(!gate.should_emit(&mut state, "s", t0 + ms(200)));
        assert!(gate.should_emit(&mut state, "s", t0 + ms(201)));
    }

    #[test]
    fn rejected_calls_do_not_move_the_clock() {
        let gate = DualRateGate::new().with_stream("s", ms(100));
        let mut state = GateState::new();
        let t0 = Instant::now();

        assert!(gate.should_emit(&mut state, "s", t0));
        assert!(!gate.should_emit(&mut state, "s", t0 + ms(60)));
        assert_eq!(state.last_emitted_at("s"), Some(t0));
        assert!(gate.should_emit(&mut state, "s", t0 + ms(120)));
        assert_eq!(state.last_emitted_at("s"), Some(t0 + ms(120)));
    }

    #[test]
    fn streams_are_independent() {
        let gate = DualRateGate::for_monitor(ms(1000), ms(200));
        let mut state = GateState::new();
        let t0 = Instant::now();

        assert!(gate.should_emit(&mut state, DETECTION_STREAM, t0));
        assert!(!gate.should_emit(&mut state, DETECTION_STREAM, t0 + ms(10)));
        // driving detection to false leaves frame untouched
        assert!(gate.should_emit(&mut state, FRAME_STREAM, t0 + ms(20)));
        assert!(!gate.should_emit(&mut state, FRAME_STREAM, t0 + ms(30)));
        assert!(!gate.should_emit(&mut state, DETECTION_STREAM, t0 + ms(40)));
        assert!(gate.should_emit(&mut state, FRAME_STREAM, t0 + ms(250)));
    }

    #[test]
    fn same_frame_detections_share_one_slot() {
        let gate = DualRateGate::for_monitor(ms(1000), ms(200));
        let mut state = GateState::new();
        let now = Instant::now();

        let admitted = (0..4)
            .filter(|_| gate.should_emit(&mut state, DETECTION_STREAM, now))
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn unconfigured_stream_uses_zero_interval() {
        let gate = DualRateGate::new();
        let mut state = GateState::new();
        let t0 = Instant::now();

        assert_eq!(gate.interval("other"), Duration::ZERO);
        assert!(gate.should_emit(&mut state, "other", t0));
        assert!(!gate.should_emit(&mut state, "other", t0));
        assert!(gate.should_emit(&mut state, "other", t0 + Duration::from_nanos(1)));
    }
}
