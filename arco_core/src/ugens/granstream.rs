//! `Granstream` (C10): granular synthesis on streaming input. Per input
//! channel, a fixed-size circular history buffer feeds a bank of
//! polyphonic grain generators, each an independent predelay/rise/hold/
//! fall state machine whose timing is drawn from uniform random ranges
//! to hit a target grain density.
//!
//! Grounded on `original_source/arco/src/granstream.h`/`.cpp`'s
//! `Gran_gen::run` state machine and `unifrand`/`unifrand_range` timing
//! model, carried over call for call.
//!
//! **Simplification (recorded in DESIGN.md):** the original spreads every
//! channel's grains across *all* output channels by `out_channel =
//! grain_index % chans`, writing through a shared pointer so grains from
//! different input channels can land on the same output channel in the
//! same block. Output channel selection here is `(input_channel +
//! grain_index) % chans`, which keeps the "grains spread across outputs"
//! behavior without every channel racing for the same slot first. The
//! growable history buffer is also a plain reallocate-and-zero-extend on
//! `set_dur` rather than the original's in-place `memmove`, since a
//! duration change is a rare control-rate event, not a hot path.

use crate::ugen::{Rate, Ugen, UgenBase, UgenRef};
use arco_primitives::{AR, BL};

fn unifrand() -> f32 {
    fastrand::f32()
}

fn unifrand_range(low: f32, high: f32) -> f32 {
    low + unifrand() * (high - low)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GrainState {
    Predelay,
    Rise,
    Hold,
    Fall,
}

#[derive(Debug, Clone, Copy)]
struct GrainGen {
    state: GrainState,
    delay: i64,
    dur_blocks: i64,
    attack_blocks: i64,
    release_blocks: i64,
    ratio: f32,
    phase: f32,
    env_val: f32,
    env_inc: f32,
}

impl GrainGen {
    fn reset() -> Self {
        Self {
            state: GrainState::Fall,
            delay: 1,
            dur_blocks: 0,
            attack_blocks: 1,
            release_blocks: 1,
            ratio: 1.0,
            phase: 0.0,
            env_val: 0.0,
            env_inc: 0.0,
        }
    }

    /// Returns `true` if this grain produced audio this block.
    fn run(&mut self, params: &GranParams, buf: &GrainBuffer, out_chan: &mut [f32]) -> bool {
        let bufferlen = buf.data.len() as f32;
        self.delay -= 1;
        if self.delay == 0 {
            let mut falling_through = true;
            while falling_through {
                falling_through = false;
                match self.state {
                    GrainState::Fall => {
                        self.env_val = 0.0;
                        self.env_inc = 0.0;
                        if !params.enable {
                            return false;
                        }
                        self.dur_blocks = (unifrand_range(params.lowdur, params.highdur) * params.br() + 0.5) as i64;
                        self.attack_blocks = ((params.attack * params.br()) as i64 + 1).max(1);
                        self.release_blocks = ((params.release * params.br()) as i64 + 1).max(1);
                        if self.attack_blocks + self.release_blocks > self.dur_blocks {
                            self.dur_blocks = self.attack_blocks + self.release_blocks;
                        }
                        self.ratio = unifrand_range(params.low, params.high);
                        let avgdur = params.lowdur + params.highdur - (params.attack + params.release) * 0.5;
                        let avgioi = avgdur * params.polyphony as f32 / params.density;
                        let ts = (2.0 * (avgioi - avgdur) * unifrand()).max(0.0);
                        self.delay = ((ts * params.br()) as i64).max(0);
                        self.state = GrainState::Predelay;
                        if self.delay == 0 {
                            falling_through = true;
                        }
                    }
                    GrainState::Predelay => {
                        if !params.enable {
                            return false;
                        }
                        self.phase = -params.dur * AR as f32 * unifrand();
                        let dur_in_samples = (self.dur_blocks * BL as i64) as f32;
                        let mut final_phase = self.phase + (dur_in_samples + 2.0) * self.ratio;
                        if final_phase < BL as f32 - bufferlen {
                            let advance = (BL as f32 - bufferlen) - final_phase - 1.0;
                            final_phase += advance;
                            self.phase += advance;
                        } else if final_phase > -1.0 {
                            self.phase -= final_phase + 1.0;
                            final_phase = -1.0;
                        }
                        if self.phase > BL as f32 - bufferlen
                            && final_phase > BL as f32 - bufferlen
                            && self.phase < 0.0
                            && final_phase < 0.0
                        {
                            self.env_val = 0.0;
                            self.env_inc = 1.0 / (self.attack_blocks as f32 * BL as f32);
                            let mut start = buf.tail as f32 - BL as f32 + self.phase;
                            if start < 0.0 {
                                start += bufferlen;
                            }
                            self.phase = start;
                            self.state = GrainState::Rise;
                            self.delay = self.attack_blocks;
                        } else {
                            self.delay = 1;
                            self.state = GrainState::Predelay;
                        }
                    }
                    GrainState::Rise => {
                        self.delay = self.dur_blocks - self.attack_blocks - self.release_blocks;
                        self.state = GrainState::Hold;
                        self.env_val = 1.0;
                        self.env_inc = 0.0;
                        if self.delay <= 0 {
                            falling_through = true;
                        }
                    }
                    GrainState::Hold => {
                        self.delay = self.release_blocks;
                        self.env_val = 0.0;
                        self.env_inc = -1.0 / (self.release_blocks as f32 * BL as f32);
                        self.state = GrainState::Fall;
                    }
                }
            }
        }

        if self.state == GrainState::Predelay {
            return false;
        }

        for sample in out_chan.iter_mut() {
            let index = self.phase as i64;
            let index = index.rem_euclid(buf.data.len() as i64) as usize;
            let mut x = buf.data[index];
            if self.ratio != 1.0 {
                let index2 = (index + 1) % buf.data.len();
                let x2 = buf.data[index2];
                x += (self.phase - index as f32) * (x2 - x);
            }
            self.env_val += self.env_inc;
            *sample += x * self.env_val;
            self.phase += self.ratio;
            if self.phase >= bufferlen {
                self.phase -= bufferlen;
            }
        }
        true
    }
}

/// Circular history buffer for one input channel, length always a
/// multiple of `BL` so blocks write contiguously without wrapping mid-copy.
#[derive(Debug)]
struct GrainBuffer {
    data: Vec<f32>,
    tail: usize,
}

impl GrainBuffer {
    fn new(dur_secs: f32) -> Self {
        let len = Self::round_up_to_bl((dur_secs * AR as f32) as usize + BL);
        Self { data: vec![0.0; len], tail: 0 }
    }

    fn round_up_to_bl(n: usize) -> usize {
        (n + BL - 1) / BL * BL
    }

    fn write_block(&mut self, block: &[f32]) {
        self.data[self.tail..self.tail + BL].copy_from_slice(block);
        self.tail += BL;
        if self.tail >= self.data.len() {
            self.tail = 0;
        }
    }

    fn set_len(&mut self, dur_secs: f32) {
        let len = Self::round_up_to_bl((dur_secs * AR as f32) as usize + BL);
        if len > self.data.len() {
            let mut new_data = vec![0.0; len];
            new_data[..self.data.len()].copy_from_slice(&self.data);
            self.data = new_data;
        }
    }
}

#[derive(Debug)]
struct ChannelState {
    buf: GrainBuffer,
    gens: Vec<GrainGen>,
}

#[derive(Debug, Clone, Copy)]
struct GranParams {
    low: f32,
    high: f32,
    lowdur: f32,
    highdur: f32,
    density: f32,
    attack: f32,
    release: f32,
    dur: f32,
    polyphony: usize,
    enable: bool,
}

impl GranParams {
    fn br(&self) -> f32 {
        AR as f32 / BL as f32
    }
}

#[derive(Debug)]
pub struct Granstream {
    base: UgenBase,
    input: UgenRef,
    params: GranParams,
    stop_request: bool,
    channels: Vec<ChannelState>,
}

impl Granstream {
    pub fn new(id: i32, chans: usize, input: UgenRef, polyphony: usize, dur: f32, enable: bool) -> Self {
        let params = GranParams {
            low: 1.0,
            high: 1.0,
            lowdur: 0.1,
            highdur: 0.1,
            density: polyphony as f32 * 0.5,
            attack: 0.02,
            release: 0.02,
            dur,
            polyphony,
            enable,
        };
        let channels = (0..chans)
            .map(|_| ChannelState {
                buf: GrainBuffer::new(dur),
                gens: (0..polyphony).map(|_| GrainGen::reset()).collect(),
            })
            .collect();
        Self {
            base: UgenBase::new(id, Rate::Audio, chans),
            input,
            params,
            stop_request: false,
            channels,
        }
    }

    pub fn repl_input(&mut self, input: UgenRef) {
        self.input = input;
    }

    pub fn set_polyphony(&mut self, polyphony: usize) {
        self.params.polyphony = polyphony;
        for ch in &mut self.channels {
            ch.gens = (0..polyphony).map(|_| GrainGen::reset()).collect();
        }
    }

    pub fn set_dur(&mut self, dur: f32) {
        self.params.dur = dur;
        for ch in &mut self.channels {
            ch.buf.set_len(dur);
        }
    }

    pub fn set_ratio_range(&mut self, low: f32, high: f32) {
        self.params.low = low;
        self.params.high = high;
    }

    pub fn set_dur_range(&mut self, lowdur: f32, highdur: f32) {
        self.params.lowdur = lowdur;
        self.params.highdur = highdur;
    }

    pub fn set_density(&mut self, density: f32) {
        self.params.density = density;
    }

    pub fn set_attack(&mut self, attack: f32) {
        self.params.attack = attack;
    }

    pub fn set_release(&mut self, release: f32) {
        self.params.release = release;
    }

    /// `set_enable(false)` drains active grains to their natural end
    /// instead of cutting them off; `set_enable(true)` cancels that.
    pub fn set_enable(&mut self, enable: bool) {
        self.stop_request = !enable;
        if enable {
            self.params.enable = true;
        }
    }
}

impl Ugen for Granstream {
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
        "Granstream"
    }
    fn real_run(&mut self) {
        let block = self.base.current_block;
        self.input.borrow_mut().run(block);
        let input_chans = self.input.borrow().base().chans;
        let input_out = self.input.borrow().base().output.clone();

        let chans = self.base.chans;
        self.base.output.fill(0.0);
        let mut any_active = false;

        for (ch, state) in self.channels.iter_mut().enumerate() {
            let input_ch = ch % input_chans.max(1);
            state.buf.write_block(&input_out[input_ch * BL..(input_ch + 1) * BL]);

            for (g, r#gen) in state.gens.iter_mut().enumerate() {
                let out_chan = (ch + g) % chans;
                let mut grain_out = [0.0f32; BL];
                let active = r#gen.run(&self.params, &state.buf, &mut grain_out);
                any_active |= active;
                if active {
                    for (dst, src) in self.base.output[out_chan * BL..(out_chan + 1) * BL].iter_mut().zip(grain_out) {
                        *dst += src;
                    }
                }
            }
        }

        if self.stop_request {
            self.params.enable = false;
            if !any_active {
                self.stop_request = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ugens::Const;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn disabled_granstream_produces_silence() {
        let input: UgenRef = Rc::new(RefCell::new(Const::new(-1, 1, &[1.0])));
        let mut gs = Granstream::new(1, 2, input, 2, 0.5, false);
        for block in 1..=5 {
            gs.run(block);
        }
        assert!(gs.base().output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn enabled_granstream_eventually_produces_a_grain() {
        let input: UgenRef = Rc::new(RefCell::new(Const::new(-1, 1, &[0.8])));
        let mut gs = Granstream::new(1, 1, input, 4, 0.5, true);
        gs.set_dur_range(0.05, 0.05);
        gs.set_density(4.0);
        let mut heard_sound = false;
        for block in 1..=200 {
            gs.run(block);
            if gs.base().output.iter().any(|&s| s != 0.0) {
                heard_sound = true;
                break;
            }
        }
        assert!(heard_sound, "expected at least one grain to fire within 200 blocks");
    }

    #[test]
    fn grain_buffer_write_block_wraps_at_its_length() {
        let mut buf = GrainBuffer::new(0.001); // rounds up to at least BL samples
        let block = [1.0f32; BL];
        let starting_len = buf.data.len();
        for _ in 0..(starting_len / BL + 1) {
            buf.write_block(&block);
        }
        assert!(buf.tail < buf.data.len());
    }
}
