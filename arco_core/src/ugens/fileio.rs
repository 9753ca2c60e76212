//! `StrPlay` and `FileRec` (C10), plus the wire types their protocol with
//! the file-I/O worker (C11) exchanges.
//!
//! Grounded on `original_source/arco/src/strplay.h` (playback) and
//! `filerec.h` (recording). The two-slot double-buffer and
//! exactly-one-owning-reference-per-in-flight-message protocol they
//! describe is preserved; the O2 message building (`o2_send_start`,
//! `o2_add_int64`, ...) is not, since `arco_graph::message::Message`
//! already replaces the wire format (`spec.md` §6). `arco_core` owns only
//! the wire types and the audio-side state machines here: the worker
//! thread itself, and the queues connecting the two sides, are C11 and
//! live in `arco_graph` (SPEC_FULL.md §2), reached through the
//! [`FileIoPort`] trait so this crate never depends on it.

use crate::ugen::{Rate, Ugen, UgenBase, UgenRef};
use arco_primitives::BL;
use std::fmt::Debug;

/// Value-semantics block of 16-bit interleaved samples, handed off by
/// pointer in the original; here it is an owned `Vec` moved across the
/// channel, which is the Rust idiom for "ownership passes on receipt".
#[derive(Debug, Clone, Default)]
pub struct FileBlock {
    pub frame_count: usize,
    pub channel_count: usize,
    pub is_last: bool,
    pub payload: Vec<i16>,
}

/// A request an audio-side ugen sends to the file-I/O worker.
#[derive(Debug, Clone)]
pub enum FileIoRequest {
    /// `/fileio/strplay/new`: open `filename` for streaming playback.
    StrplayNew { handle: u64, filename: String, start: f32, end: f32, cycle: bool },
    /// `/fileio/strplay/read`: refill the slot that just emptied.
    StrplayRead { handle: u64 },
    /// `/fileio/strplay/play`: start (`true`) or stop (`false`) playback;
    /// `false` also closes the file.
    StrplayPlay { handle: u64, play: bool },
    /// `/fileio/filerec/new`: open `filename` for writing `channels` of PCM.
    FilerecNew { handle: u64, filename: String, channels: usize },
    /// `/fileio/filerec/write`: hand a full recording buffer to the worker.
    FilerecWrite { handle: u64, block: FileBlock },
    /// `/fileio/filerec/record`: stop recording and close the file.
    FilerecStop { handle: u64 },
}

/// A reply the file-I/O worker sends back to an audio-side ugen.
#[derive(Debug, Clone)]
pub enum FileIoReply {
    /// `/arco/strplay/ready`: `channels == 0` means the open failed.
    StrplayReady { handle: u64, channels: usize, ready: bool },
    /// `/arco/strplay/samps`: one playback block, ownership transferred.
    StrplaySamps { handle: u64, block: FileBlock },
    /// `/arco/filerec/samps`: the worker is done with a write buffer and
    /// returns it so the audio side can reuse its allocation.
    FilerecSamps { handle: u64, block: FileBlock },
}

/// Decouples `arco_core`'s audio-side state machines from `arco_graph`'s
/// actual `rtrb` queues and worker thread (C11 lives one crate up).
pub trait FileIoPort: Debug {
    fn send(&mut self, request: FileIoRequest);
    fn try_recv(&mut self, handle: u64) -> Option<FileIoReply>;
}

#[derive(Debug)]
enum StrPlayState {
    AwaitingReady,
    Playing,
    Stopped,
}

/// Streams 16-bit frames from a file, converting to `f32` as they arrive
/// and round-robin mixing or expanding to the ugen's channel count.
#[derive(Debug)]
pub struct StrPlay {
    base: UgenBase,
    handle: u64,
    port: Box<dyn FileIoPort>,
    state: StrPlayState,
    file_chans: usize,
    mix: bool,
    expand: bool,
    blocks: [Option<FileBlock>; 2],
    block_on_deck: usize,
    frame_in_block: usize,
    reads_outstanding: u32,
    action_id: i32,
}

impl StrPlay {
    pub fn new(
        id: i32,
        chans: usize,
        handle: u64,
        filename: &str,
        start: f32,
        end: f32,
        cycle: bool,
        mix: bool,
        expand: bool,
        mut port: Box<dyn FileIoPort>,
    ) -> Self {
        port.send(FileIoRequest::StrplayNew {
            handle,
            filename: filename.to_string(),
            start,
            end,
            cycle,
        });
        Self {
            base: UgenBase::new(id, Rate::Audio, chans),
            handle,
            port,
            state: StrPlayState::AwaitingReady,
            file_chans: 0,
            mix,
            expand,
            blocks: [None, None],
            block_on_deck: 0,
            frame_in_block: 0,
            reads_outstanding: 2,
            action_id: 0,
        }
    }

    pub fn set_action_id(&mut self, action_id: i32) {
        self.action_id = action_id;
    }

    pub fn play(&mut self, play: bool) {
        match (&self.state, play) {
            (StrPlayState::Stopped, _) => {}
            (_, true) => {
                self.state = StrPlayState::Playing;
                self.port.send(FileIoRequest::StrplayPlay { handle: self.handle, play: true });
            }
            (_, false) => {
                self.state = StrPlayState::Stopped;
                self.port.send(FileIoRequest::StrplayPlay { handle: self.handle, play: false });
            }
        }
    }

    fn poll_replies(&mut self) {
        while let Some(reply) = self.port.try_recv(self.handle) {
            match reply {
                FileIoReply::StrplayReady { channels, ready, .. } => {
                    self.file_chans = channels;
                    if !ready {
                        self.state = StrPlayState::Stopped;
                    }
                }
                FileIoReply::StrplaySamps { block, .. } => {
                    let empty_slot = if self.blocks[0].is_none() { 0 } else { 1 };
                    self.blocks[empty_slot] = Some(block);
                    self.reads_outstanding = self.reads_outstanding.saturating_sub(1);
                }
                FileIoReply::FilerecSamps { .. } => {}
            }
        }
    }

    fn next_sample(&mut self, file_ch: usize) -> f32 {
        loop {
            let Some(block) = &self.blocks[self.block_on_deck] else { return 0.0 };
            if self.frame_in_block >= block.frame_count {
                let is_last = block.is_last;
                self.blocks[self.block_on_deck] = None;
                self.block_on_deck ^= 1;
                self.frame_in_block = 0;
                if is_last {
                    self.state = StrPlayState::Stopped;
                    return 0.0;
                }
                if self.reads_outstanding == 0 {
                    self.port.send(FileIoRequest::StrplayRead { handle: self.handle });
                    self.reads_outstanding += 1;
                }
                continue;
            }
            let block = self.blocks[self.block_on_deck].as_ref().unwrap();
            let idx = self.frame_in_block * self.file_chans.max(1) + file_ch.min(self.file_chans.max(1) - 1);
            let s = block.payload.get(idx).copied().unwrap_or(0) as f32 / i16::MAX as f32;
            return s;
        }
    }
}

impl Ugen for StrPlay {
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
        "StrPlay"
    }
    fn real_run(&mut self) {
        self.poll_replies();
        let chans = self.base.chans;
        if !matches!(self.state, StrPlayState::Playing) {
            self.base.output.fill(0.0);
            return;
        }
        for frame in 0..BL {
            for ch in 0..chans {
                let file_ch = if self.file_chans == 0 {
                    0
                } else if self.mix || self.expand {
                    ch % self.file_chans
                } else {
                    ch
                };
                let s = if ch < self.file_chans || self.expand {
                    self.next_sample(file_ch)
                } else {
                    0.0
                };
                self.base.output[ch * BL + frame] = s;
            }
            self.frame_in_block += 1;
        }
        if matches!(self.state, StrPlayState::Stopped) {
            self.terminate();
        }
    }
}

/// Records an input ugen's audio to a file, double-buffering 16-bit
/// frames and handing full buffers to the worker.
#[derive(Debug)]
pub struct FileRec {
    base: UgenBase,
    input: UgenRef,
    handle: u64,
    port: Box<dyn FileIoPort>,
    ready: bool,
    recording: bool,
    blocks: [FileBlock; 2],
    block_on_deck: usize,
    frame_in_block: usize,
    num_free: u32,
    action_id: i32,
}

const REC_FRAMES_PER_BLOCK: usize = 8192;

impl FileRec {
    pub fn new(id: i32, chans: usize, handle: u64, filename: &str, input: UgenRef, mut port: Box<dyn FileIoPort>) -> Self {
        port.send(FileIoRequest::FilerecNew { handle, filename: filename.to_string(), channels: chans });
        let empty = || FileBlock {
            frame_count: 0,
            channel_count: chans,
            is_last: false,
            payload: vec![0; REC_FRAMES_PER_BLOCK * chans],
        };
        Self {
            base: UgenBase::new(id, Rate::Block, chans),
            input,
            handle,
            port,
            ready: false,
            recording: false,
            blocks: [empty(), empty()],
            block_on_deck: 0,
            frame_in_block: 0,
            num_free: 1,
            action_id: 0,
        }
    }

    pub fn set_action_id(&mut self, action_id: i32) {
        self.action_id = action_id;
    }

    pub fn record(&mut self, on: bool) {
        if !on && self.recording {
            self.flush_current_block(true);
            self.port.send(FileIoRequest::FilerecStop { handle: self.handle });
        }
        self.recording = on && self.ready;
    }

    fn flush_current_block(&mut self, is_last: bool) {
        let chans = self.base.chans;
        let block = &mut self.blocks[self.block_on_deck];
        block.frame_count = self.frame_in_block;
        block.is_last = is_last;
        self.port.send(FileIoRequest::FilerecWrite {
            handle: self.handle,
            block: FileBlock {
                frame_count: block.frame_count,
                channel_count: chans,
                is_last,
                payload: block.payload[..block.frame_count * chans].to_vec(),
            },
        });
        self.block_on_deck ^= 1;
        self.frame_in_block = 0;
        self.num_free = self.num_free.saturating_sub(1);
    }

    fn poll_replies(&mut self) {
        while let Some(reply) = self.port.try_recv(self.handle) {
            match reply {
                FileIoReply::StrplayReady { ready, .. } => {
                    self.ready = ready;
                }
                FileIoReply::FilerecSamps { .. } => {
                    self.num_free = (self.num_free + 1).min(2);
                }
                FileIoReply::StrplaySamps { .. } => {}
            }
        }
    }
}

impl Ugen for FileRec {
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
        "FileRec"
    }
    fn real_run(&mut self) {
        self.poll_replies();
        let block = self.base.current_block;
        self.input.borrow_mut().run(block);
        if !self.recording {
            return;
        }
        let chans = self.base.chans;
        let input_chans = self.input.borrow().base().chans;
        let input_out = self.input.borrow().base().output.clone();
        for frame in 0..BL {
            if self.frame_in_block >= REC_FRAMES_PER_BLOCK {
                if self.num_free == 0 {
                    break; // worker hasn't returned a buffer yet; drop frames
                }
                self.flush_current_block(false);
            }
            let write_idx = self.frame_in_block;
            let buf = &mut self.blocks[self.block_on_deck];
            for ch in 0..chans {
                let s = input_out[(ch % input_chans.max(1)) * BL + frame];
                buf.payload[write_idx * chans + ch] = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            }
            self.frame_in_block += 1;
        }
    }

    fn on_terminate(&mut self) {
        if self.recording {
            self.record(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ugens::Const;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug, Default)]
    struct FakePort {
        sent: Vec<FileIoRequest>,
        queued: VecDeque<FileIoReply>,
    }

    impl FileIoPort for FakePort {
        fn send(&mut self, request: FileIoRequest) {
            self.sent.push(request);
        }
        fn try_recv(&mut self, _handle: u64) -> Option<FileIoReply> {
            self.queued.pop_front()
        }
    }

    #[test]
    fn strplay_stays_silent_until_ready_and_playing() {
        let port = Box::new(FakePort::default());
        let mut sp = StrPlay::new(1, 1, 42, "test.wav", 0.0, 1.0, false, false, false, port);
        sp.run(1);
        assert!(sp.base().output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn strplay_plays_samples_once_ready_and_started() {
        let mut port = Box::new(FakePort::default());
        port.queued.push_back(FileIoReply::StrplayReady { handle: 42, channels: 1, ready: true });
        port.queued.push_back(FileIoReply::StrplaySamps {
            handle: 42,
            block: FileBlock { frame_count: BL, channel_count: 1, is_last: false, payload: vec![i16::MAX / 2; BL] },
        });
        let mut sp = StrPlay::new(1, 1, 42, "test.wav", 0.0, 1.0, false, false, false, port);
        sp.play(true);
        sp.run(1);
        assert!(sp.base().output.iter().all(|&s| s > 0.0));
    }

    #[test]
    fn filerec_accumulates_frames_while_recording() {
        let port = Box::new(FakePort::default());
        let input: UgenRef = Rc::new(RefCell::new(Const::new(-1, 1, &[0.5])));
        let mut fr = FileRec::new(1, 1, 7, "out.wav", input, port);
        fr.ready = true;
        fr.record(true);
        fr.run(1);
        assert!(fr.frame_in_block > 0);
    }
}
