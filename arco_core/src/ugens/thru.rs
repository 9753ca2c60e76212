//! `Thru` (C10): copies an input to the output, with an optional alternate
//! source. Used directly by `arco_graph` for the device-input and
//! previous-output sentinel nodes described in `spec.md` §4.5/§4.6.
//!
//! Grounded on `original_source/arco/src/thru.h`.

use crate::rate_adapt::{Stride, bind_stride};
use crate::ugen::{Rate, Ugen, UgenBase, UgenRef};
use arco_primitives::BL;

#[derive(Debug)]
pub struct Thru {
    base: UgenBase,
    input: Option<UgenRef>,
    input_stride: Stride,
    /// When set, output is copied from this instead of `input`. `audioio`
    /// uses this so the device-input node can be repointed without
    /// rebuilding the graph, and so the previous-output node can switch
    /// what it mirrors.
    alternate: Option<UgenRef>,
    alternate_stride: Stride,
}

impl Thru {
    pub fn new(id: i32, chans: usize) -> Self {
        Self {
            base: UgenBase::new(id, Rate::Audio, chans),
            input: None,
            input_stride: Stride::FANOUT,
            alternate: None,
            alternate_stride: Stride::FANOUT,
        }
    }

    pub fn repl_input(&mut self, input: UgenRef) {
        let (stride, needs_tail) = bind_stride(self.base.rate, self.base.chans, &input);
        if needs_tail {
            self.term(0.0);
        }
        self.input = Some(input);
        self.input_stride = stride;
    }

    pub fn set_alternate(&mut self, alt: Option<UgenRef>) {
        self.alternate = alt.map(|a| {
            let (stride, _) = bind_stride(self.base.rate, self.base.chans, &a);
            self.alternate_stride = stride;
            a
        });
        if self.alternate.is_none() {
            self.alternate_stride = Stride::FANOUT;
        }
    }
}

fn copy_with_wrap(dst: &mut [f32], src: &[f32], src_stride: Stride, dst_chans: usize) {
    let src_chans = if src_stride == Stride::FANOUT {
        1
    } else {
        src.len() / src_stride.0.max(1)
    };
    for ch in 0..dst_chans {
        let src_ch = ch % src_chans.max(1);
        let dst_slice = &mut dst[ch * BL..(ch + 1) * BL];
        if src_stride == Stride::FANOUT {
            dst_slice.fill(src[src_ch]);
        } else if src_stride.0 == BL {
            dst_slice.copy_from_slice(&src[src_ch * BL..(src_ch + 1) * BL]);
        } else {
            // block rate, held constant across the block
            dst_slice.fill(src[src_ch]);
        }
    }
}

impl Ugen for Thru {
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
        "Thru"
    }
    /// Used by `arco_graph`'s audio I/O state machine to feed the
    /// device-input node: the device driver hands over deinterleaved
    /// frames, which are copied in and `current_block` is bumped, with no
    /// `real_run` involved.
    fn write_direct(&mut self, block: u64, samples: &[f32]) {
        let n = self.base.output.len().min(samples.len());
        self.base.output[..n].copy_from_slice(&samples[..n]);
        self.base.current_block = block;
    }
    fn real_run(&mut self) {
        let block = self.base.current_block;
        let chans = self.base.chans;
        if let Some(alt) = &self.alternate {
            alt.borrow_mut().run(block);
            let src = alt.borrow();
            let src_out = src.base().output.clone();
            drop(src);
            copy_with_wrap(&mut self.base.output, &src_out, self.alternate_stride, chans);
        } else if let Some(input) = &self.input {
            input.borrow_mut().run(block);
            let src = input.borrow();
            let src_out = src.base().output.clone();
            let src_terminated = src.base().is_terminated();
            drop(src);
            copy_with_wrap(&mut self.base.output, &src_out, self.input_stride, chans);
            if src_terminated && self.base.flags.contains(crate::ugen::UgenFlags::CAN_TERMINATE) {
                self.terminate();
            }
        }
        // No input and no alternate: output is whatever was last written
        // by `write_direct`, i.e. this is acting as the device-input node.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ugens::Const;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn copies_mono_const_to_stereo_output() {
        let c: UgenRef = Rc::new(RefCell::new(Const::new(100, 1, &[0.25])));
        let mut thru = Thru::new(101, 2);
        thru.repl_input(c);
        thru.run(1);
        assert_eq!(thru.base().output[0], 0.25);
        assert_eq!(thru.base().output[BL], 0.25);
    }

    #[test]
    fn direct_write_feeds_output_without_an_input() {
        let mut thru = Thru::new(200, 1);
        let samples = [0.5f32; BL];
        thru.write_direct(7, &samples);
        assert_eq!(thru.base().current_block, 7);
        assert_eq!(thru.base().output, samples);
    }
}
