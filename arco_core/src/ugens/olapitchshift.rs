//! `OlaPitchShift` (C10): overlap-add pitch shifter reading two taps
//! (ratio - 1 apart in step) from a circular input buffer, crossfading
//! between them each time the faster tap laps the input point.
//!
//! Grounded directly on `original_source/arco/src/olapitchshift.h`'s
//! `chan_a`: the tap arithmetic (`fouttap_delta`, `tap1a`/`tap2a`,
//! `tap1b`/`tap2b`, the `beta` crossfade weight) is carried over sample
//! for sample, since this is the one C10 ugen where the original's inner
//! loop already reads as idiomatic, branch-light DSP rather than
//! C-specific pointer juggling.

use crate::ringbuf::RingBuf;
use crate::ugen::{Rate, Ugen, UgenBase, UgenRef};
use arco_primitives::{AR, BL};

#[derive(Debug)]
pub struct OlaPitchShift {
    base: UgenBase,
    input: UgenRef,
    ratio: f32,
    xfade: f32,
    windur: f32,
    ixfade: i64,
    xfade_recip: f32,
    iwindur: i64,
    fouttap_delta: f32,
    channels: Vec<RingBuf>,
}

impl OlaPitchShift {
    pub fn new(id: i32, chans: usize, input: UgenRef, ratio: f32, xfade: f32, windur: f32) -> Self {
        let mut osc = Self {
            base: UgenBase::new(id, Rate::Audio, chans),
            input,
            ratio,
            xfade: 0.0,
            windur: 0.0,
            ixfade: 1,
            xfade_recip: 1.0,
            iwindur: 1,
            fouttap_delta: 0.0,
            channels: (0..chans).map(|_| RingBuf::new(1, false)).collect(),
        };
        osc.set_windur(windur);
        osc.set_xfade(xfade);
        osc
    }

    pub fn repl_input(&mut self, input: UgenRef) {
        self.input = input;
    }

    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio;
    }

    pub fn set_xfade(&mut self, xfade: f32) {
        self.xfade = xfade;
        self.ixfade = ((xfade * AR as f32) as i64).max(1);
        self.xfade_recip = 1.0 / self.ixfade as f32;
        if self.iwindur < self.ixfade * 2 {
            self.set_buflen();
        }
    }

    pub fn set_windur(&mut self, windur: f32) {
        self.windur = windur;
        self.set_buflen();
    }

    fn set_buflen(&mut self) {
        if self.windur == 0.0 {
            return;
        }
        self.iwindur = ((self.windur * AR as f32) as i64).max(self.ixfade * 2);
        let bl = (self.iwindur + 1) as usize;
        for ch in &mut self.channels {
            ch.set_fifo_len(bl, true);
        }
        self.fouttap_delta = 0.0;
    }

    fn chan_run(&mut self, ch: usize, input: &[f32], out: &mut [f32]) {
        let iwindur = self.iwindur;
        let ixfade = self.ixfade;
        let xfade_recip = self.xfade_recip;
        let ratio = self.ratio;
        let delaybuf = &mut self.channels[ch];
        let mut delta = self.fouttap_delta;

        for (i, &in_samp) in input.iter().enumerate() {
            delaybuf.toss(1);
            delaybuf.enqueue(in_samp);

            if delta > 0.0 {
                delta -= (iwindur - ixfade) as f32;
            } else if delta < -((iwindur - ixfade) as f32) {
                delta += (iwindur - ixfade) as f32;
            }

            let tap1a = delta as i64;
            let alpha = delta - tap1a as f32;
            let tap2a = tap1a + 1;
            let x1a = delaybuf.get_nth((-tap1a).max(0) as usize);
            let x2a = delaybuf.get_nth((-tap2a).max(0) as usize);
            let xa = x1a + alpha * (x2a - x1a);

            out[i] = if delta < -(ixfade as f32) {
                xa
            } else {
                let tap1b = tap1a - (iwindur - ixfade);
                let tap2b = tap1b + 1;
                let x1b = delaybuf.get_nth((-tap1b).max(0) as usize);
                let x2b = delaybuf.get_nth((-tap2b).max(0) as usize);
                let xb = x1b + alpha * (x2b - x1b);
                let beta = -delta * xfade_recip;
                xb + beta * (xa - xb)
            };

            delta += ratio - 1.0;
        }
        self.fouttap_delta = delta;
    }
}

impl Ugen for OlaPitchShift {
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
        "OlaPitchShift"
    }
    fn real_run(&mut self) {
        let block = self.base.current_block;
        self.input.borrow_mut().run(block);
        let input_chans = self.input.borrow().base().chans;
        let input_out = self.input.borrow().base().output.clone();

        let chans = self.base.chans;
        for ch in 0..chans {
            let input_ch = ch % input_chans.max(1);
            let input_block = &input_out[input_ch * BL..(input_ch + 1) * BL];
            let mut out_block = [0.0f32; BL];
            self.chan_run(ch, input_block, &mut out_block);
            self.base.output[ch * BL..(ch + 1) * BL].copy_from_slice(&out_block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ugens::Tableosc;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn unity_ratio_passes_signal_through_after_warmup() {
        let mut osc = Tableosc::sine(1, 1);
        osc.set_freq_const(220.0);
        osc.set_amp_const(1.0);
        let input: UgenRef = Rc::new(RefCell::new(osc));
        let mut ps = OlaPitchShift::new(2, 1, input, 1.0, 0.005, 0.05);
        for block in 1..=50 {
            ps.run(block);
        }
        assert!(ps.base().output.iter().any(|&s| s.abs() > 0.01));
    }

    #[test]
    fn buffer_length_respects_window_and_crossfade_minimum() {
        let input: UgenRef = Rc::new(RefCell::new(Tableosc::sine(1, 1)));
        let ps = OlaPitchShift::new(2, 1, input, 1.0, 0.1, 0.01);
        // xfade (0.1s) is longer than windur (0.01s), so the window is
        // clamped up to 2*ixfade per `set_buflen`.
        assert!(ps.iwindur >= ps.ixfade * 2);
    }
}
