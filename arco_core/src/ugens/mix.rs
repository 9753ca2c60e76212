//! `Mix` and `Sum` (C10): fan-in ugens with an ordered list of
//! contributors.
//!
//! Grounded on `original_source/arco/src/mix.h` (gain-ramped summing) and
//! the simpler, gainless `Sum` it shares a shape with.

use crate::ugen::{Rate, Ugen, UgenBase, UgenFlags, UgenRef};
use arco_primitives::BL;

fn channel_for(out_chan: usize, src_chans: usize, wrap: bool) -> Option<usize> {
    if src_chans == 0 {
        None
    } else if wrap {
        Some(out_chan % src_chans)
    } else if out_chan < src_chans {
        Some(out_chan)
    } else {
        None
    }
}

fn read_sample(src_out: &[f32], src_rate: Rate, src_chan: usize, frame: usize) -> f32 {
    match src_rate {
        Rate::Audio => src_out[src_chan * BL + frame],
        Rate::Block | Rate::Const => src_out[src_chan],
    }
}

/// One input to a [`Mix`]: the signal and the (usually block-rate) gain
/// that scales it, ramped linearly across the block so changing the gain
/// never produces a zipper/click.
#[derive(Debug)]
struct MixContributor {
    ugen: UgenRef,
    gain: UgenRef,
    gain_prev: f32,
}

#[derive(Debug)]
pub struct Mix {
    base: UgenBase,
    contributors: Vec<MixContributor>,
    wrap_channels: bool,
}

impl Mix {
    pub fn new(id: i32, chans: usize, wrap_channels: bool) -> Self {
        Self {
            base: UgenBase::new(id, Rate::Audio, chans),
            contributors: Vec::new(),
            wrap_channels,
        }
    }

    /// `gain` is typically a block-rate or const ugen; its first channel's
    /// current value is read once per block and ramped to across the
    /// block from its value at the end of the previous block.
    pub fn add_input(&mut self, ugen: UgenRef, gain: UgenRef) {
        let initial_gain = gain.borrow().base().output[0];
        self.contributors.push(MixContributor {
            ugen,
            gain,
            gain_prev: initial_gain,
        });
    }

    pub fn remove_input(&mut self, id: i32) {
        self.contributors.retain(|c| c.ugen.borrow().base().id != id);
    }

    pub fn num_contributors(&self) -> usize {
        self.contributors.len()
    }
}

impl Ugen for Mix {
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
        "Mix"
    }
    fn real_run(&mut self) {
        let block = self.base.current_block;
        let chans = self.base.chans;
        self.base.output.fill(0.0);
        let wrap = self.wrap_channels;
        let mut terminated_ids = Vec::new();
        for c in &mut self.contributors {
            c.ugen.borrow_mut().run(block);
            c.gain.borrow_mut().run(block);
            let src = c.ugen.borrow();
            let src_rate = src.base().rate;
            let src_chans = src.base().chans;
            let src_out = src.base().output.clone();
            let src_terminated = src.base().is_terminated();
            let src_id = src.base().id;
            drop(src);
            let gain_now = c.gain.borrow().base().output[0];
            let gain_prev = c.gain_prev;
            for out_ch in 0..chans {
                if let Some(src_ch) = channel_for(out_ch, src_chans, wrap) {
                    for frame in 0..BL {
                        let t = if BL > 1 { frame as f32 / (BL - 1) as f32 } else { 1.0 };
                        let gain = gain_prev + t * (gain_now - gain_prev);
                        let sample = read_sample(&src_out, src_rate, src_ch, frame);
                        self.base.output[out_ch * BL + frame] += sample * gain;
                    }
                }
            }
            c.gain_prev = gain_now;
            if src_terminated {
                terminated_ids.push(src_id);
            }
        }
        for id in terminated_ids {
            self.remove_input(id);
        }
        if self.contributors.is_empty() && self.base.flags.contains(UgenFlags::CAN_TERMINATE) {
            self.terminate();
        }
    }
}

/// Like [`Mix`] but without per-contributor gain: plain summation.
#[derive(Debug)]
pub struct Sum {
    base: UgenBase,
    contributors: Vec<UgenRef>,
    wrap_channels: bool,
}

impl Sum {
    pub fn new(id: i32, chans: usize, wrap_channels: bool) -> Self {
        Self {
            base: UgenBase::new(id, Rate::Audio, chans),
            contributors: Vec::new(),
            wrap_channels,
        }
    }

    pub fn add_input(&mut self, ugen: UgenRef) {
        self.contributors.push(ugen);
    }

    pub fn remove_input(&mut self, id: i32) {
        self.contributors.retain(|c| c.borrow().base().id != id);
    }

    pub fn num_contributors(&self) -> usize {
        self.contributors.len()
    }
}

impl Ugen for Sum {
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
        "Sum"
    }
    fn real_run(&mut self) {
        let block = self.base.current_block;
        let chans = self.base.chans;
        self.base.output.fill(0.0);
        let wrap = self.wrap_channels;
        let mut terminated_ids = Vec::new();
        for ugen in &self.contributors {
            ugen.borrow_mut().run(block);
            let src = ugen.borrow();
            let src_rate = src.base().rate;
            let src_chans = src.base().chans;
            let src_out = src.base().output.clone();
            let src_terminated = src.base().is_terminated();
            let src_id = src.base().id;
            drop(src);
            for out_ch in 0..chans {
                if let Some(src_ch) = channel_for(out_ch, src_chans, wrap) {
                    for frame in 0..BL {
                        self.base.output[out_ch * BL + frame] +=
                            read_sample(&src_out, src_rate, src_ch, frame);
                    }
                }
            }
            if src_terminated {
                terminated_ids.push(src_id);
            }
        }
        for id in terminated_ids {
            self.remove_input(id);
        }
        if self.contributors.is_empty() && self.base.flags.contains(UgenFlags::CAN_TERMINATE) {
            self.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ugens::Const;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn const_ugen(id: i32, v: f32) -> UgenRef {
        Rc::new(RefCell::new(Const::new(id, 1, &[v])))
    }

    #[test]
    fn sum_adds_contributors() {
        let mut sum = Sum::new(1, 1, false);
        sum.add_input(const_ugen(10, 0.25));
        sum.add_input(const_ugen(11, 0.5));
        sum.run(1);
        assert!((sum.base().output[0] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn mix_ramps_gain_from_prior_to_current_block_value() {
        use crate::ugens::Tableosc;
        let mut mix = Mix::new(1, 1, false);
        let sine_id = 300;
        let mut osc = Tableosc::sine(sine_id, 1);
        osc.set_freq_const(440.0);
        osc.set_amp_const(1.0);
        let osc: UgenRef = Rc::new(RefCell::new(osc));
        let gain = const_ugen(200, 1.0);
        mix.add_input(osc.clone(), gain.clone());
        mix.run(1);
        // now drop gain to 0 for the next block
        gain.borrow_mut().const_set(0, 0.0);
        mix.run(2);
        let out = &mix.base().output;
        assert!((out[0]).abs() > 1e-6, "first sample should carry gain ~1");
        assert!(out[BL - 1].abs() < 1e-6, "last sample should carry gain ~0");
    }

    #[test]
    fn mix_terminates_when_empty_and_can_terminate() {
        let mut mix = Mix::new(1, 1, false);
        mix.term(0.0);
        mix.run(1);
        assert!(mix.base().is_terminated());
    }
}
