//! `RecPlay` (C10): simultaneous record and variable-speed playback into
//! a growable in-memory buffer, with raised-cosine fade in/out and
//! polyphony via buffer borrowing.
//!
//! Grounded on `original_source/arco/src/recplay.h`/`.cpp`.
//!
//! **Simplification (recorded in DESIGN.md):** the original grows its
//! recording in a `Vec<Sample_ptr>` of fixed `SAMPLES_PER_BUFFER` blocks
//! so playback can later be transferred a block at a time to a file
//! writer or another thread. Recording here stays on the audio thread and
//! is consumed only by this ugen's own playback, so the per-channel
//! buffer is a single growable `Vec<f32>` behind an `Rc<RefCell<_>>` (the
//! same borrow-without-copy shape `Tableosc` uses for wavetables) rather
//! than a chunked buffer-of-buffers.

use crate::dsp::raised_cosine::RaisedCosine;
use crate::ugen::{Rate, Ugen, UgenBase, UgenRef};
use arco_primitives::BL;
use std::cell::RefCell;
use std::rc::Rc;

pub type RecordingStorage = Rc<RefCell<Vec<Vec<f32>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FadeDirection {
    None,
    In,
    Out,
}

#[derive(Debug)]
pub struct RecPlay {
    base: UgenBase,
    input: UgenRef,
    gain: UgenRef,
    buffers: RecordingStorage,
    #[allow(dead_code)]
    lender: Option<UgenRef>,
    rec_index: usize,
    play_phase: f64,
    speed: f32,
    recording: bool,
    playing: bool,
    looping: bool,
    start_phase: f64,
    fade_secs: f32,
    fade_dir: FadeDirection,
    fade_pos: f32,
    cosine: RaisedCosine,
    action_id: i32,
}

fn lerp_in_channel(samples: &[f32], phase: f64) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let max_index = samples.len() - 1;
    let i0 = (phase as usize).min(max_index);
    let i1 = (i0 + 1).min(max_index);
    let frac = (phase - i0 as f64) as f32;
    samples[i0] + frac * (samples[i1] - samples[i0])
}

impl RecPlay {
    pub fn new(id: i32, chans: usize, input: UgenRef, gain: UgenRef, fade_secs: f32, looping: bool) -> Self {
        Self {
            base: UgenBase::new(id, Rate::Audio, chans),
            input,
            gain,
            buffers: Rc::new(RefCell::new(vec![Vec::new(); chans])),
            lender: None,
            rec_index: 0,
            play_phase: 0.0,
            speed: 1.0,
            recording: false,
            playing: false,
            looping,
            start_phase: 0.0,
            fade_secs,
            fade_dir: FadeDirection::None,
            fade_pos: 0.0,
            cosine: RaisedCosine::new(),
            action_id: 0,
        }
    }

    pub fn repl_input(&mut self, input: UgenRef) {
        self.input = input;
    }
    pub fn repl_gain(&mut self, gain: UgenRef) {
        self.gain = gain;
    }

    pub fn set_action_id(&mut self, action_id: i32) {
        self.action_id = action_id;
    }

    pub fn set_fade(&mut self, secs: f32) {
        self.fade_secs = secs.max(0.0);
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed;
    }

    pub fn record(&mut self, on: bool) {
        if on && !self.recording {
            self.rec_index = 0;
            for ch in self.buffers.borrow_mut().iter_mut() {
                ch.clear();
            }
        }
        self.recording = on;
    }

    pub fn play(&mut self, start_time_secs: f64) {
        self.start_phase = start_time_secs * arco_primitives::AR as f64;
        self.play_phase = self.start_phase;
        self.playing = true;
        self.fade_dir = if self.fade_secs > 0.0 { FadeDirection::In } else { FadeDirection::None };
        self.fade_pos = 0.0;
    }

    pub fn stop(&mut self) {
        if self.playing && self.fade_secs > 0.0 {
            self.fade_dir = FadeDirection::Out;
            self.fade_pos = 0.0;
        } else {
            self.playing = false;
        }
    }

    /// Share another `RecPlay`'s recorded buffers for polyphonic playback
    /// of the same material.
    pub fn borrow_buffers(&mut self, lender_storage: RecordingStorage, lender: UgenRef) {
        self.buffers = lender_storage;
        self.lender = Some(lender);
    }

    pub fn recording_storage(&self) -> RecordingStorage {
        Rc::clone(&self.buffers)
    }

    fn recorded_len(&self) -> usize {
        self.buffers.borrow().first().map(Vec::len).unwrap_or(0)
    }

    fn fade_gain(&mut self) -> f32 {
        if self.fade_secs <= 0.0 {
            return 1.0;
        }
        let t = (self.fade_pos / self.fade_secs).min(1.0);
        match self.fade_dir {
            FadeDirection::In => self.cosine.at(t),
            FadeDirection::Out => self.cosine.fade_out_at(t),
            FadeDirection::None => 1.0,
        }
    }
}

impl Ugen for RecPlay {
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
        "RecPlay"
    }
    fn real_run(&mut self) {
        let block = self.base.current_block;
        self.input.borrow_mut().run(block);
        self.gain.borrow_mut().run(block);

        let input_rate = self.input.borrow().base().rate;
        let input_chans = self.input.borrow().base().chans;
        let input_out = self.input.borrow().base().output.clone();
        let gain_rate = self.gain.borrow().base().rate;
        let gain_out = self.gain.borrow().base().output.clone();

        let chans = self.base.chans;
        let sample_period = 1.0 / arco_primitives::AR as f64;

        for frame in 0..BL {
            let gain_samp = match gain_rate {
                Rate::Audio => gain_out[frame],
                Rate::Block | Rate::Const => gain_out[0],
            };

            if self.recording {
                let mut buffers = self.buffers.borrow_mut();
                for ch in 0..chans.min(buffers.len()) {
                    let in_samp = match input_rate {
                        Rate::Audio => input_out[(ch % input_chans.max(1)) * BL + frame],
                        Rate::Block | Rate::Const => input_out[ch % input_chans.max(1)],
                    };
                    buffers[ch].push(in_samp * gain_samp);
                }
                self.rec_index += 1;
            }

            let out_gain = if self.playing { self.fade_gain() } else { 0.0 };
            let recorded_len = self.recorded_len();
            for ch in 0..chans {
                let sample = if self.playing && recorded_len > 0 {
                    let buffers = self.buffers.borrow();
                    let ch_samples = &buffers[ch % buffers.len()];
                    lerp_in_channel(ch_samples, self.play_phase) * out_gain
                } else {
                    0.0
                };
                self.base.output[ch * BL + frame] = sample;
            }

            if self.playing {
                self.play_phase += self.speed as f64;
                if self.fade_dir != FadeDirection::None {
                    self.fade_pos += sample_period as f32;
                    if self.fade_pos >= self.fade_secs {
                        match self.fade_dir {
                            FadeDirection::In => self.fade_dir = FadeDirection::None,
                            FadeDirection::Out => {
                                self.playing = false;
                                self.fade_dir = FadeDirection::None;
                            }
                            FadeDirection::None => {}
                        }
                    }
                }
                if self.play_phase >= recorded_len as f64 || self.play_phase < 0.0 {
                    if self.looping && recorded_len > 0 {
                        self.play_phase = self.start_phase;
                    } else {
                        self.playing = false;
                    }
                }
            }
        }

        if !self.playing && !self.recording {
            self.terminate();
        }
    }

    fn on_terminate(&mut self) {
        if self.action_id != 0 {
            log::debug!("recplay {} fired action_id {}", self.base.id, self.action_id);
        }
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
    fn recording_then_playing_reproduces_the_input() {
        let input = const_ugen(0.5);
        let gain = const_ugen(1.0);
        let mut rp = RecPlay::new(1, 1, input, gain, 0.0, false);
        rp.record(true);
        rp.run(1);
        rp.record(false);
        rp.play(0.0);
        rp.run(2);
        assert!(rp.base().output.iter().all(|&s| (s - 0.5).abs() < 1e-5));
    }

    #[test]
    fn stop_without_fade_silences_immediately() {
        let input = const_ugen(1.0);
        let gain = const_ugen(1.0);
        let mut rp = RecPlay::new(1, 1, input, gain, 0.0, false);
        rp.record(true);
        rp.run(1);
        rp.play(0.0);
        rp.stop();
        rp.run(2);
        assert!(rp.base().output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn borrowing_shares_recorded_buffers() {
        let input = const_ugen(0.25);
        let gain = const_ugen(1.0);
        let mut lender = RecPlay::new(1, 1, input, gain, 0.0, false);
        lender.record(true);
        lender.run(1);
        let storage = lender.recording_storage();
        let lender: UgenRef = Rc::new(RefCell::new(lender));

        let g2 = const_ugen(1.0);
        let i2 = const_ugen(0.0);
        let mut borrower = RecPlay::new(2, 1, i2, g2, 0.0, false);
        borrower.borrow_buffers(storage.clone(), lender.clone());
        assert_eq!(Rc::strong_count(&storage), 2);
        borrower.play(0.0);
        borrower.run(1);
        assert!(borrower.base().output.iter().any(|&s| (s - 0.25).abs() < 1e-5));
    }
}
