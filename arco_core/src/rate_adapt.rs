//! Parameter/rate adaptation (C6).
//!
//! Grounded on `Ugen::init_param` in `original_source/arco/src/ugen.h`:
//! binding a new input computes a *stride*, the number of samples to
//! advance per channel while iterating the input's `output` buffer. A
//! stride of `0` means "fan out": the input is mono and every output
//! channel reads the same single value. `BL` means "audio-rate, one
//! channel per consumer channel". `1` means "block-rate, one held value
//! per consumer channel".

use crate::ugen::{Rate, UgenRef};
use arco_primitives::BL;

/// How far to advance, per channel, when reading an input's `output`
/// buffer. See the module docs for the three possible values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stride(pub usize);

impl Stride {
    pub const FANOUT: Stride = Stride(0);
}

/// Compute the stride for binding `input` as an input of a consumer with
/// `consumer_chans` channels, and report whether the consumer (if it is
/// audio-rate) needs at least a one-block termination tail because the
/// input isn't audio-rate (a block-held value ramped to audio rate needs
/// one more block to finish interpolating to zero after the input
/// terminates).
///
/// Channel-count mismatches where the input has more than one channel but
/// fewer than the consumer is a configuration error; Arco's original just
/// warns and falls back to the input's first channel only (mirrored here
/// by returning `Stride::FANOUT` after logging, rather than rejecting the
/// bind outright — rejecting would stop the client's graph edit from
/// having any effect, which is worse for a block-granular control
/// protocol that can't retry synchronously).
pub fn bind_stride(
    consumer_rate: Rate,
    consumer_chans: usize,
    input: &UgenRef,
) -> (Stride, bool) {
    let input_ref = input.borrow();
    let input_base = input_ref.base();
    let mut n = input_base.chans;
    if n != 1 && n < consumer_chans {
        log::warn!(
            "channel mismatch binding {} ({} chans) into a {}-chan consumer, using only its first channel",
            input_ref.classname(),
            n,
            consumer_chans
        );
        n = 1;
    }
    let stride = if n == 1 {
        Stride::FANOUT
    } else if input_base.rate == Rate::Audio {
        Stride(BL)
    } else {
        Stride(1)
    };
    let needs_tail =
        consumer_rate == Rate::Audio && input_base.rate != Rate::Audio;
    (stride, needs_tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ugen::{Ugen, UgenBase};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug)]
    struct Stub {
        base: UgenBase,
    }
    impl Ugen for Stub {
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
        fn base(&self) -> &UgenBase {
            &self.base
        }
        fn base_mut(&mut self) -> &mut UgenBase {
            &mut self.base
        }
        fn classname(&self) -> &'static str {
            "Stub"
        }
        fn real_run(&mut self) {}
    }

    fn stub(rate: Rate, chans: usize) -> UgenRef {
        Rc::new(RefCell::new(Stub {
            base: UgenBase::new(-1, rate, chans),
        }))
    }

    #[test]
    fn mono_input_always_fans_out() {
        let input = stub(Rate::Audio, 1);
        let (stride, _) = bind_stride(Rate::Audio, 2, &input);
        assert_eq!(stride, Stride::FANOUT);
    }

    #[test]
    fn multichannel_audio_input_strides_by_block_length() {
        let input = stub(Rate::Audio, 2);
        let (stride, _) = bind_stride(Rate::Audio, 2, &input);
        assert_eq!(stride, Stride(BL));
    }

    #[test]
    fn multichannel_block_input_strides_by_one() {
        let input = stub(Rate::Block, 2);
        let (stride, _) = bind_stride(Rate::Audio, 2, &input);
        assert_eq!(stride, Stride(1));
    }

    #[test]
    fn binding_non_audio_input_into_audio_consumer_needs_tail() {
        let input = stub(Rate::Block, 1);
        let (_, needs_tail) = bind_stride(Rate::Audio, 1, &input);
        assert!(needs_tail);
        let input = stub(Rate::Audio, 1);
        let (_, needs_tail) = bind_stride(Rate::Audio, 1, &input);
        assert!(!needs_tail);
    }
}
