//! Audio I/O state machine (C8), `spec.md` §4.5.
//!
//! Grounded on `original_source/arco/src/audioio.h`/`.cpp`: the same seven
//! states (`uninitialized, idle, starting, started, first, running,
//! stopping`), the same per-callback order (drain inbox, copy device input,
//! pull run set, pull and mix output set, publish previous-output, write
//! device output), and the same channel-count reconciliation (wrap extra
//! graph channels modulo the device count; zero-fill extra device
//! channels). The `AudioBackend` trait split from [`AudioProcessor`] below
//! mirrors `knaster_graph::audio_backend::AudioBackend`/`AudioProcessor`:
//! one object owns the device handle and feature-gated backend, the other
//! owns everything the callback touches and is `Send` across the
//! thread boundary into the backend's callback closure.

use arco_core::ugen::{Ugen, UgenRef};
use arco_primitives::{AR, BL};

use crate::clock::SharedClock;
use crate::control_service::{ControlService, flush_probe_reports};
use crate::error::ArcoError;
use crate::fileio_worker::FileIoHub;
use crate::inbox::Inbox;
use crate::sets::{OutputSet, RunSet};
use crate::table::{PREV_OUTPUT_ID, UgenTable};

#[cfg(feature = "cpal")]
pub mod cpal;

/// Mirrors `original_source/arco/src/audioio.h`'s `UNINITIALIZED..STOPPING`
/// constants. Kept as a Rust enum rather than those bare `const int`s since
/// nothing outside this module needs the numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioState {
    Uninitialized,
    Idle,
    Starting,
    Started,
    First,
    Running,
    Stopping,
}

/// Unified API for a swappable audio device backend, grounded on
/// `knaster_graph::audio_backend::AudioBackend`.
pub trait AudioBackend {
    fn start_processing(&mut self, processor: AudioProcessor) -> Result<(), ArcoError>;
    fn stop(&mut self) -> Result<(), ArcoError>;
    fn sample_rate(&self) -> u32;
    fn output_channels(&self) -> usize;
    fn input_channels(&self) -> usize;
}

/// Everything one audio callback touches: the ugen table, the two sets, the
/// inbox, the file-I/O hub, the shared clock, and the control service. Owned
/// by the backend's callback closure for the lifetime of the stream.
pub struct AudioProcessor {
    state: AudioState,
    table: UgenTable,
    output_set: OutputSet,
    run_set: RunSet,
    inbox: Inbox,
    fileio: FileIoHub,
    clock: SharedClock,
    control_service: Box<dyn ControlService>,
    device_in_chans: usize,
    device_out_chans: usize,
    blocks_done: u64,
}

// `UgenTable` holds `Rc<RefCell<dyn Ugen>>`, which is not `Send`. Every
// ugen in a processor is touched only by the single thread a backend hands
// this struct to (the cpal callback thread, or the thread a non-cpal
// backend drives its own loop on), so moving the whole processor there
// once, up front, is sound. Mirrors
// `knaster_graph::processor::AudioProcessor`'s own `unsafe impl Send`.
unsafe impl Send for AudioProcessor {}

impl AudioProcessor {
    pub fn new(
        table: UgenTable,
        inbox: Inbox,
        fileio: FileIoHub,
        clock: SharedClock,
        control_service: Box<dyn ControlService>,
        device_in_chans: usize,
        device_out_chans: usize,
    ) -> Self {
        Self {
            state: AudioState::Uninitialized,
            table,
            output_set: OutputSet::new(),
            run_set: RunSet::new(),
            inbox,
            fileio,
            clock,
            control_service,
            device_in_chans,
            device_out_chans,
            blocks_done: 0,
        }
    }

    pub fn state(&self) -> AudioState {
        self.state
    }

    pub fn device_out_chans(&self) -> usize {
        self.device_out_chans
    }

    pub fn device_in_chans(&self) -> usize {
        self.device_in_chans
    }

    /// Called by the backend once the driver has opened the stream and is
    /// about to invoke the callback for the first time.
    pub fn mark_starting(&mut self) {
        self.state = AudioState::Starting;
    }

    /// Request shutdown. The original lets the callback notice a
    /// `close_request` flag and finish the in-flight block before handing
    /// off to `stopping`; here the backend calls this once it has decided
    /// to stop (e.g. before dropping a cpal stream), and the very next
    /// `run_block` call, if any, writes silence instead of computing one
    /// more block.
    pub fn mark_stopping(&mut self) {
        if self.state == AudioState::Running {
            self.state = AudioState::Stopping;
        }
    }

    /// `reset` (`spec.md` §4.5): forces `idle` and clears the sets. Only
    /// safe to call while the callback is suspended, i.e. between
    /// `AudioBackend::stop` and the next `start_processing`.
    pub fn reset(&mut self, device_chans: usize) {
        self.table = UgenTable::new(device_chans);
        self.output_set = OutputSet::new();
        self.run_set = RunSet::new();
        self.state = AudioState::Idle;
    }

    /// Process one `BL`-frame block. `input` is deinterleaved-ready: exactly
    /// `device_in_chans * BL` samples, frame-interleaved as the device
    /// hands them over. `output` must have room for
    /// `device_out_chans * BL` interleaved samples; every path through this
    /// function fills all of it (silence included).
    pub fn run_block(&mut self, input: &[f32], output: &mut [f32]) {
        match self.state {
            AudioState::Starting => {
                self.state = AudioState::Started;
                output.fill(0.0);
                return;
            }
            AudioState::Started => {
                self.state = AudioState::First;
                output.fill(0.0);
                return;
            }
            AudioState::First => {
                self.state = AudioState::Running;
            }
            AudioState::Running => {}
            _ => {
                output.fill(0.0);
                return;
            }
        }

        unsafe { no_denormals::no_denormals(|| {
            self.blocks_done += 1;
            self.clock.publish(self.blocks_done as f64 * BL as f64 / AR as f64);

            self.inbox.drain(&mut self.table, &mut self.output_set, &mut self.run_set, &mut self.fileio);
            self.table.collect_garbage(&mut self.output_set, &mut self.run_set);
            self.fileio.poll_incoming();

            self.copy_device_input(input);

            for id in self.run_set.iter() {
                if let Ok(ugen) = self.table.lookup(id) {
                    ugen.borrow_mut().run(self.blocks_done);
                }
            }

            self.mix_output_set(output);
            flush_probe_reports(&self.table, &self.run_set, &mut *self.control_service);
        }); }
    }

    fn copy_device_input(&mut self, input: &[f32]) {
        let Ok(input_ugen) = self.table.lookup(crate::table::INPUT_ID) else { return };
        // `input` is frame-interleaved; the input ugen's output is
        // channel-major (one `BL`-length run per channel), matching
        // `Ugen::write_direct`'s contract.
        let chans = self.device_in_chans.max(1);
        let mut deinterleaved = vec![0.0f32; chans * BL];
        for frame in 0..BL {
            for ch in 0..chans {
                deinterleaved[ch * BL + frame] = input.get(frame * chans + ch).copied().unwrap_or(0.0);
            }
        }
        input_ugen.borrow_mut().write_direct(self.blocks_done, &deinterleaved);
    }

    /// Pulls every contributor in the output set, sums into a channel-major
    /// buffer sized to the device's output channel count (wrapping extra
    /// graph channels modulo that count), publishes the result as the
    /// previous-output ugen's output a block late, then interleaves into
    /// `output`.
    fn mix_output_set(&mut self, output: &mut [f32]) {
        let device_chans = self.device_out_chans;
        if device_chans == 0 || self.output_set.is_empty() {
            output.fill(0.0);
            return;
        }
        let mut buffer = vec![0.0f32; device_chans * BL];
        for (i, id) in self.output_set.iter().enumerate() {
            let Ok(ugen) = self.table.lookup(id) else { continue };
            ugen.borrow_mut().run(self.blocks_done);
            let borrowed = ugen.borrow();
            let src = &borrowed.base().output;
            let src_chans = borrowed.base().chans;
            for ch in 0..src_chans {
                let dst_ch = ch % device_chans;
                let dst = &mut buffer[dst_ch * BL..(dst_ch + 1) * BL];
                let src_slice = &src[ch * BL..(ch + 1) * BL];
                if i == 0 && ch < device_chans {
                    dst.copy_from_slice(src_slice);
                } else {
                    for (d, s) in dst.iter_mut().zip(src_slice) {
                        *d += s;
                    }
                }
            }
        }

        if let Ok(prev_output) = self.table.lookup(PREV_OUTPUT_ID) {
            prev_output.borrow_mut().write_direct(self.blocks_done + 1, &buffer);
        }

        interleave(output, &buffer, device_chans);
    }
}

fn interleave(dst: &mut [f32], src: &[f32], chans: usize) {
    for frame in 0..BL {
        for ch in 0..chans {
            if let Some(slot) = dst.get_mut(frame * chans + ch) {
                *slot = src[ch * BL + frame];
            }
        }
    }
}

/// Resolves the client-visible ugen the device-input node writes into, so
/// callers can bind audio graphs to it before the stream starts. Exposed as
/// a free function rather than an `AudioProcessor` method that borrows
/// `self` mutably, since the caller typically needs this before the
/// processor is handed off to the backend.
pub fn input_ugen(table: &UgenTable) -> Result<UgenRef, ArcoError> {
    table.lookup(crate::table::INPUT_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_service::LoggingControlService;
    use arco_core::ugens::Thru;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn processor(device_out_chans: usize) -> AudioProcessor {
        let table = UgenTable::new(device_out_chans);
        let (_producer, consumer) = rtrb::RingBuffer::new(16);
        AudioProcessor::new(
            table,
            Inbox::new(consumer),
            FileIoHub::new_detached(),
            SharedClock::new(),
            Box::new(LoggingControlService),
            0,
            device_out_chans,
        )
    }

    #[test]
    fn starting_then_started_then_first_then_running_is_silent_until_the_fourth_block() {
        let mut proc = processor(1);
        proc.mark_starting();
        let mut out = [0.0f32; BL];
        proc.run_block(&[], &mut out);
        assert_eq!(proc.state(), AudioState::Started);
        proc.run_block(&[], &mut out);
        assert_eq!(proc.state(), AudioState::First);
        out.fill(1.0);
        proc.run_block(&[], &mut out);
        assert_eq!(proc.state(), AudioState::Running);
        assert_eq!(out, [0.0; BL]); // nothing in the output set yet
    }

    #[test]
    fn running_state_mixes_output_set_contributors_with_wraparound() {
        let mut proc = processor(1);
        proc.mark_starting();
        let mut out = [0.0f32; BL];
        proc.run_block(&[], &mut out);
        proc.run_block(&[], &mut out);
        proc.run_block(&[], &mut out); // now Running

        let a: UgenRef = Rc::new(RefCell::new(Thru::new(100, 2)));
        let mut samples = [0.0f32; 2 * BL];
        samples[..BL].fill(0.25);
        samples[BL..].fill(0.5);
        a.borrow_mut().write_direct(1, &samples);
        proc.table.install(100, a).unwrap();
        proc.output_set.insert(100, &proc.table).unwrap();

        proc.run_block(&[], &mut out);
        // two graph channels wrap into the single device channel: 0.25+0.5
        assert!((out[0] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn idle_state_writes_silence() {
        let mut proc = processor(2);
        let mut out = [1.0f32; 64];
        proc.run_block(&[], &mut out);
        assert_eq!(out, [0.0; 64]);
    }

    #[test]
    fn mark_stopping_silences_the_next_block_and_resets_back_to_idle() {
        let mut proc = processor(1);
        proc.mark_starting();
        let mut out = [0.0f32; BL];
        proc.run_block(&[], &mut out);
        proc.run_block(&[], &mut out);
        proc.run_block(&[], &mut out); // now Running

        proc.mark_stopping();
        assert_eq!(proc.state(), AudioState::Stopping);
        out.fill(1.0);
        proc.run_block(&[], &mut out);
        assert_eq!(out, [0.0; BL]);

        proc.reset(1);
        assert_eq!(proc.state(), AudioState::Idle);
    }
}
