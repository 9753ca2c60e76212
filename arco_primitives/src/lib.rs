//! # Arco Primitives
//!
//! The handful of constants and conversions shared by every other Arco
//! crate: the block length, the compiled-in sample rate, and the block-rate
//! and time conversions derived from them.
//!
//! Keeping these in their own crate (mirroring how the rest of the Arco
//! workspace is layered) means `arco_core`'s ugens and `arco_graph`'s audio
//! I/O state machine agree on exactly one definition of a block.

mod time;

pub use time::Seconds;

/// Number of frames in one scheduling block. Every ugen computes its audio
/// rate output, and every cross-thread hand-off between the audio callback
/// and the control/file threads, in units of this many frames.
pub const BL: usize = 32;

/// Compiled-in sample rate in Hz. Arco does not perform sample-rate
/// conversion; the audio device must be opened at this rate.
pub const AR: u32 = 44_100;

/// Derived block rate: the number of blocks computed per second.
pub fn br() -> f64 {
    AR as f64 / BL as f64
}

/// Convert a duration in seconds to a whole number of blocks, rounded up.
/// Used to turn a requested tail duration (`Ugen::term`) into a countdown
/// in blocks.
pub fn seconds_to_blocks(seconds: f64) -> u32 {
    (seconds * br()).ceil().max(0.0) as u32
}

/// Convert a duration in seconds to a sample count at `AR`, rounded to the
/// nearest sample. Used for delay lines and other buffers sized in seconds.
pub fn seconds_to_samples(seconds: f64) -> usize {
    (seconds * AR as f64).round().max(0.0) as usize
}

/// Convert a block index to the time, in seconds, at which that block
/// starts playing.
pub fn block_to_seconds(block: u64) -> f64 {
    block as f64 * BL as f64 / AR as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_rate_matches_ar_over_bl() {
        assert!((br() - 1378.125).abs() < 1e-9);
    }

    #[test]
    fn seconds_to_blocks_rounds_up() {
        // One block is BL/AR seconds ~= 0.000725s; anything over a whole
        // number of blocks must round up, never down, since it's a tail.
        assert_eq!(seconds_to_blocks(0.0), 0);
        let one_block_secs = BL as f64 / AR as f64;
        assert_eq!(seconds_to_blocks(one_block_secs), 1);
        assert_eq!(seconds_to_blocks(one_block_secs + 1e-6), 2);
    }

    #[test]
    fn seconds_to_samples_is_exact_at_one_second() {
        assert_eq!(seconds_to_samples(1.0), AR as usize);
    }
}
