//! Wall-clock / audio-frame time, used by the audio I/O state machine (C8)
//! to present clients with a continuous clock across start/stop cycles.

use crate::AR;
use std::time::{Duration, Instant};

/// A point in time, as seen by clients of the audio engine. Internally this
/// is backed either by the OS wall clock (when audio is not running) or by
/// a count of audio frames since the stream started (while running); see
/// [`crate::Seconds`] consumers in `arco_graph::clock` for the switch-over.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Seconds(f64);

impl Seconds {
    pub const ZERO: Seconds = Seconds(0.0);

    pub fn from_secs_f64(secs: f64) -> Self {
        Seconds(secs)
    }

    pub fn to_secs_f64(self) -> f64 {
        self.0
    }

    pub fn from_frames(frames: u64) -> Self {
        Seconds(frames as f64 / AR as f64)
    }

    pub fn from_instant_delta(since: Instant, now: Instant) -> Self {
        Seconds(now.saturating_duration_since(since).as_secs_f64())
    }
}

impl core::ops::Add for Seconds {
    type Output = Seconds;
    fn add(self, rhs: Seconds) -> Seconds {
        Seconds(self.0 + rhs.0)
    }
}

impl core::ops::Sub for Seconds {
    type Output = Seconds;
    fn sub(self, rhs: Seconds) -> Seconds {
        Seconds(self.0 - rhs.0)
    }
}

impl From<Duration> for Seconds {
    fn from(d: Duration) -> Self {
        Seconds(d.as_secs_f64())
    }
}
