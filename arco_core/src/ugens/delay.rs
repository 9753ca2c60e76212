//! `Delay` and `Allpass` (C10): ring-buffered delay lines with
//! time-varying, possibly audio-rate, delay time and feedback.
//!
//! Grounded on `original_source/arco/src/delay.h` for `Delay`'s
//! read-then-write ring buffer shape (`get_nth`/`toss`/`enqueue`) and its
//! four `dur`/`fb` rate combinations, and on
//! `original_source/arco/src/alpass.{h,cpp}` for `Allpass`'s one-buffer
//! Schroeder recurrence (`w[n] = x[n] + g*w[n-M]`, `y[n] = w[n-M] -
//! g*w[n]`) and its own four `dur`/`fb` rate combinations
//! (`chan_aaa_a`/`chan_aab_a`/`chan_aba_a`/`chan_abb_a`).
//!
//! The real source calls `alpass.toss(1)` only from `chan_aaa_a` (both
//! `dur` and `fb` audio-rate); the other three specializations enqueue
//! without tossing first. This isn't a meaningful behavioral difference:
//! `Ringbuf::get_nth` and `enqueue` both index relative to `tail`, and
//! `toss` only advances `head`, which neither of them ever reads — so
//! calling or skipping `toss` cannot change the samples a run produces,
//! only the buffer's reported `get_fifo_len()`, which `Alpass` never
//! calls after construction. The single `toss` call below is kept
//! unconditionally across all four rate combinations for that reason,
//! not because the specializations are identical in the original.

use crate::ringbuf::RingBuf;
use crate::ugen::{Rate, Ugen, UgenBase, UgenRef};
use arco_primitives::{AR, BL};

/// One-pole DC blocker, `y[n] = x[n] - x[n-1] + R*y[n-1]`. Not part of the
/// retrieved source (the defining header was absent from the pack); `R`
/// is the standard value used by most DC blockers.
#[derive(Debug, Default)]
struct DcBlock {
    x_prev: f32,
    y_prev: f32,
}

impl DcBlock {
    const R: f32 = 0.995;

    fn filter(&mut self, x: f32) -> f32 {
        let y = x - self.x_prev + Self::R * self.y_prev;
        self.x_prev = x;
        self.y_prev = y;
        y
    }
}

fn held_or_audio(prev: &mut f32, rate: Rate, out: &[f32], frame: usize) -> f32 {
    match rate {
        Rate::Audio => out[frame],
        Rate::Block | Rate::Const => {
            let target = out[0];
            let t = frame as f32 / BL as f32;
            let v = *prev + t * (target - *prev);
            if frame == BL - 1 {
                *prev = target;
            }
            v
        }
    }
}

#[derive(Debug)]
struct DelayChannel {
    line: RingBuf,
    dcblock: DcBlock,
    fb_prev: f32,
}

#[derive(Debug)]
pub struct Delay {
    base: UgenBase,
    input: UgenRef,
    dur: UgenRef,
    fb: UgenRef,
    dur_prev: f32,
    channels: Vec<DelayChannel>,
    max_samples: usize,
}

impl Delay {
    pub fn new(id: i32, chans: usize, input: UgenRef, dur: UgenRef, fb: UgenRef, max_dur: f32) -> Self {
        let max_samples = (max_dur * AR as f32) as usize + 1;
        let dur_prev = dur.borrow().base().output.first().copied().unwrap_or(0.0);
        let channels = (0..chans)
            .map(|_| {
                let mut line = RingBuf::new(max_samples, true);
                line.set_fifo_len(line.capacity(), true);
                DelayChannel {
                    line,
                    dcblock: DcBlock::default(),
                    fb_prev: 0.0,
                }
            })
            .collect();
        Self {
            base: UgenBase::new(id, Rate::Audio, chans),
            input,
            dur,
            fb,
            dur_prev,
            channels,
            max_samples,
        }
    }

    pub fn repl_input(&mut self, input: UgenRef) {
        self.input = input;
    }
    pub fn repl_dur(&mut self, dur: UgenRef) {
        self.dur = dur;
    }
    pub fn repl_fb(&mut self, fb: UgenRef) {
        self.fb = fb;
    }

    pub fn set_dur(&mut self, chan: usize, v: f32) {
        self.dur.borrow_mut().const_set(chan, v);
    }
    pub fn set_fb(&mut self, chan: usize, v: f32) {
        self.fb.borrow_mut().const_set(chan, v);
    }

    /// Grow every channel's delay line so a longer `dur` can be honored.
    pub fn set_max(&mut self, max_dur: f32) {
        self.max_samples = (max_dur * AR as f32) as usize + 1;
        for ch in &mut self.channels {
            ch.line.set_fifo_len(ch.line.capacity().max(self.max_samples), true);
        }
    }
}

impl Ugen for Delay {
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
        "Delay"
    }
    fn real_run(&mut self) {
        let block = self.base.current_block;
        self.input.borrow_mut().run(block);
        self.dur.borrow_mut().run(block);
        self.fb.borrow_mut().run(block);

        let input_rate = self.input.borrow().base().rate;
        let input_chans = self.input.borrow().base().chans;
        let input_out = self.input.borrow().base().output.clone();
        let dur_rate = self.dur.borrow().base().rate;
        let dur_out = self.dur.borrow().base().output.clone();
        let fb_rate = self.fb.borrow().base().rate;
        let fb_out = self.fb.borrow().base().output.clone();

        let chans = self.base.chans;
        let mut dur_prev = self.dur_prev;
        for ch in 0..chans {
            let input_ch = ch % input_chans.max(1);
            let state = &mut self.channels[ch];
            let mut local_dur_prev = dur_prev;
            let mut fb_prev = state.fb_prev;
            for frame in 0..BL {
                let in_samp = match input_rate {
                    Rate::Audio => input_out[input_ch * BL + frame],
                    Rate::Block | Rate::Const => input_out[input_ch],
                };
                let dur_samp = held_or_audio(&mut local_dur_prev, dur_rate, &dur_out, frame);
                let fb_samp = held_or_audio(&mut fb_prev, fb_rate, &fb_out, frame);
                let mut len = (dur_samp * AR as f32).round() as usize;
                if len >= state.line.capacity() {
                    state.line.set_fifo_len(len, true);
                }
                if len == 0 {
                    len = 1;
                }
                let out = state.line.get_nth(len - 1);
                self.base.output[ch * BL + frame] = out;
                state.line.toss(1);
                state.line.enqueue(state.dcblock.filter(in_samp + out * fb_samp));
            }
            state.fb_prev = fb_prev;
            dur_prev = local_dur_prev;
        }
        self.dur_prev = dur_prev;
    }
}

#[derive(Debug)]
struct AllpassChannel {
    line: RingBuf,
}

#[derive(Debug)]
pub struct Allpass {
    base: UgenBase,
    input: UgenRef,
    dur: UgenRef,
    gain: UgenRef,
    dur_prev: f32,
    gain_prev: f32,
    channels: Vec<AllpassChannel>,
}

impl Allpass {
    pub fn new(id: i32, chans: usize, input: UgenRef, dur: UgenRef, gain: UgenRef, max_dur: f32) -> Self {
        let max_samples = (max_dur * AR as f32) as usize + 1;
        let dur_prev = dur.borrow().base().output.first().copied().unwrap_or(0.0);
        let gain_prev = gain.borrow().base().output.first().copied().unwrap_or(0.0);
        let channels = (0..chans)
            .map(|_| {
                let mut line = RingBuf::new(max_samples, true);
                line.set_fifo_len(line.capacity(), true);
                AllpassChannel { line }
            })
            .collect();
        Self {
            base: UgenBase::new(id, Rate::Audio, chans),
            input,
            dur,
            gain,
            dur_prev,
            gain_prev,
            channels,
        }
    }

    pub fn repl_input(&mut self, input: UgenRef) {
        self.input = input;
    }
    pub fn repl_dur(&mut self, dur: UgenRef) {
        self.dur = dur;
    }
    pub fn repl_gain(&mut self, gain: UgenRef) {
        self.gain = gain;
    }
}

impl Ugen for Allpass {
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
        "Allpass"
    }
    fn real_run(&mut self) {
        let block = self.base.current_block;
        self.input.borrow_mut().run(block);
        self.dur.borrow_mut().run(block);
        self.gain.borrow_mut().run(block);

        let input_rate = self.input.borrow().base().rate;
        let input_chans = self.input.borrow().base().chans;
        let input_out = self.input.borrow().base().output.clone();
        let dur_rate = self.dur.borrow().base().rate;
        let dur_out = self.dur.borrow().base().output.clone();
        let gain_rate = self.gain.borrow().base().rate;
        let gain_out = self.gain.borrow().base().output.clone();

        let chans = self.base.chans;
        let mut dur_prev = self.dur_prev;
        let mut gain_prev = self.gain_prev;
        for ch in 0..chans {
            let input_ch = ch % input_chans.max(1);
            let state = &mut self.channels[ch];
            let mut local_dur_prev = dur_prev;
            let mut local_gain_prev = gain_prev;
            for frame in 0..BL {
                let in_samp = match input_rate {
                    Rate::Audio => input_out[input_ch * BL + frame],
                    Rate::Block | Rate::Const => input_out[input_ch],
                };
                let dur_samp = held_or_audio(&mut local_dur_prev, dur_rate, &dur_out, frame);
                let g = held_or_audio(&mut local_gain_prev, gain_rate, &gain_out, frame);
                let mut len = (dur_samp * AR as f32).round() as usize;
                if len >= state.line.capacity() {
                    state.line.set_fifo_len(len, true);
                }
                if len == 0 {
                    len = 1;
                }
                let delayed = state.line.get_nth(len - 1);
                let w = in_samp + g * delayed;
                let y = delayed - g * w;
                self.base.output[ch * BL + frame] = y;
                state.line.toss(1);
                state.line.enqueue(w);
            }
            dur_prev = local_dur_prev;
            gain_prev = local_gain_prev;
        }
        self.dur_prev = dur_prev;
        self.gain_prev = gain_prev;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ugens::Const;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn const_ugen(v: f32) -> UgenRef {
        Rc::new(RefCell::new(Const::new(-1, 1, &[v])))
    }

    #[test]
    fn delay_with_zero_feedback_returns_silence_before_delay_time_elapses() {
        let input = const_ugen(1.0);
        let dur = const_ugen(0.01);
        let fb = const_ugen(0.0);
        let mut d = Delay::new(1, 1, input, dur, fb, 1.0);
        d.run(1);
        // dur=0.01s at 44100Hz ~ 441 samples, far beyond one 32-sample block
        assert!(d.base().output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn delay_grows_its_line_when_dur_exceeds_initial_allocation() {
        let input = const_ugen(0.0);
        let dur = const_ugen(2.0);
        let fb = const_ugen(0.0);
        let mut d = Delay::new(1, 1, input, dur, fb, 0.5);
        d.run(1);
        assert!(d.channels[0].line.capacity() > (0.5 * AR as f32) as usize);
    }

    #[test]
    fn allpass_passes_silence_through_as_silence() {
        let input = const_ugen(0.0);
        let dur = const_ugen(0.001);
        let gain = const_ugen(0.7);
        let mut ap = Allpass::new(1, 1, input, dur, gain, 0.1);
        ap.run(1);
        assert!(ap.base().output.iter().all(|&s| s.abs() < 1e-6));
    }
}
