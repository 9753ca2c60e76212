//! Shared audio/wall clock (C8, `spec.md` §4.5).
//!
//! Grounded on `knaster_graph::scheduling::SharedFrameClock`: an `f64`
//! published through an `AtomicU64` so any thread can read the current
//! time lock-free. That type transmutes its own `Seconds` newtype to
//! `u64`; there is no such newtype here, so `f64::to_bits`/`from_bits`
//! plays the same role without `unsafe`.
//!
//! `spec.md` §4.5 calls for switching between a free-running wall clock
//! (while `idle`) and the audio-frame clock (once `running`): `SharedClock`
//! itself only stores one `f64`, so the audio callback is responsible for
//! publishing whichever source applies to the current state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cheaply clonable handle to a clock reading published by the audio
/// thread (or, before the backend starts, by a free-running wall clock)
/// and readable lock-free from the control thread or file-I/O worker.
#[derive(Debug, Clone)]
pub struct SharedClock(Arc<AtomicU64>);

impl SharedClock {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0.0f64.to_bits())))
    }

    /// Only the audio I/O state machine calls this, once per block.
    pub fn publish(&self, seconds: f64) {
        self.0.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl Default for SharedClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_what_was_published() {
        let clock = SharedClock::new();
        assert_eq!(clock.get(), 0.0);
        clock.publish(1.5);
        assert_eq!(clock.get(), 1.5);
    }

    #[test]
    fn clones_share_the_same_underlying_value() {
        let clock = SharedClock::new();
        let handle = clock.clone();
        clock.publish(3.0);
        assert_eq!(handle.get(), 3.0);
    }
}
