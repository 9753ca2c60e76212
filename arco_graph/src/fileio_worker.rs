//! File-I/O worker (C11), grounded on `spec.md` §4.7 and on
//! `arco_core::ugens::fileio`'s exact request/reply/port contract, which
//! this module is the other end of.
//!
//! The original addresses peer objects by pointer, cast to a 64-bit
//! handle, specifically so the file side needs no lookup table. Here
//! `handle` is simply the requesting ugen's `UgenId` widened to `u64`
//! (`arco_graph::message`'s `StrplayNew`/`FilerecNew` handling) — ids
//! already are this system's stable small-integer identity, so reusing
//! one as the handle costs nothing and needs no unsafe pointer cast. The
//! worker keeps a small `HashMap` from handle to reader/writer state,
//! which the original avoids only because C++ has no owning map handy for
//! this; a `HashMap` is the idiomatic Rust equivalent and the instance
//! count here (concurrent open files) is tiny.
//!
//! **Demux problem.** `rtrb` queues are single-consumer: many `StrPlay`/
//! `FileRec` ugens each hold their own [`FileIoPort`][arco_core::ugens::FileIoPort],
//! but there is exactly one reply channel from the worker. [`FileIoHub`]
//! is the audio-thread-side fan-out point: `poll_incoming` drains the
//! shared consumer once per block into a per-handle bucket, and every
//! port reads only its own bucket.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::rc::Rc;
use std::cell::RefCell;
use std::thread::JoinHandle;

use arco_core::ugens::{FileBlock, FileIoPort, FileIoReply, FileIoRequest};
use arco_primitives::{AR, BL};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::blockqueue::BlockQueue;

const CHANNEL_CAPACITY: usize = 256;
const STRPLAY_FRAMES_PER_BLOCK: usize = 4096;
/// How many `BL`-frame write blocks a recording can fall behind before the
/// worker starts writing straight through instead of queueing, absorbing
/// brief disk stalls without unbounded memory growth.
const WRITE_QUEUE_BLOCKS: usize = 64;

/// Audio-thread handle to the worker: mints per-ugen [`FileIoPort`]s and
/// demuxes the single reply stream between them.
pub struct FileIoHub {
    producer: Rc<RefCell<Producer<FileIoRequest>>>,
    reply_consumer: Consumer<FileIoReply>,
    inboxes: Rc<RefCell<HashMap<u64, VecDeque<FileIoReply>>>>,
    worker: Option<JoinHandle<()>>,
}

impl FileIoHub {
    /// Spawn the worker on its own OS thread and return the audio-thread
    /// handle to it.
    pub fn spawn() -> Self {
        let (req_tx, req_rx) = RingBuffer::new(CHANNEL_CAPACITY);
        let (rep_tx, rep_rx) = RingBuffer::new(CHANNEL_CAPACITY);
        let worker = std::thread::Builder::new()
            .name("arco-fileio".into())
            .spawn(move || FileIoWorker::new(req_rx, rep_tx).run())
            .expect("failed to spawn file-I/O worker thread");
        Self {
            producer: Rc::new(RefCell::new(req_tx)),
            reply_consumer: rep_rx,
            inboxes: Rc::new(RefCell::new(HashMap::new())),
            worker: Some(worker),
        }
    }

    /// A hub with no backing worker thread: requests queue up unread.
    /// Only for tests that exercise message dispatch without touching
    /// the filesystem.
    pub fn new_detached() -> Self {
        let (req_tx, _req_rx) = RingBuffer::new(CHANNEL_CAPACITY);
        let (_rep_tx, rep_rx) = RingBuffer::new(CHANNEL_CAPACITY);
        Self {
            producer: Rc::new(RefCell::new(req_tx)),
            reply_consumer: rep_rx,
            inboxes: Rc::new(RefCell::new(HashMap::new())),
            worker: None,
        }
    }

    /// Construct a port any `StrPlay`/`FileRec` ugen can hold; several
    /// ports may share the same hub, each filtering the demux map by its
    /// own handle at `try_recv` time.
    pub fn make_port(&self) -> Box<dyn FileIoPort> {
        Box::new(FileIoPortHandle {
            producer: self.producer.clone(),
            inboxes: self.inboxes.clone(),
        })
    }

    /// Drain the worker's reply stream into per-handle buckets. Call once
    /// per block, before any ugen in the graph is pulled, so every
    /// `StrPlay`/`FileRec`'s `poll_replies` sees anything that arrived
    /// since the previous block.
    pub fn poll_incoming(&mut self) {
        while let Ok(reply) = self.reply_consumer.pop() {
            let handle = match &reply {
                FileIoReply::StrplayReady { handle, .. }
                | FileIoReply::StrplaySamps { handle, .. }
                | FileIoReply::FilerecSamps { handle, .. } => *handle,
            };
            self.inboxes.borrow_mut().entry(handle).or_default().push_back(reply);
        }
    }

    /// Consume the hub and wait for the worker thread to exit. Only
    /// returns once every port sharing this hub's producer has itself
    /// been dropped, since the worker's loop exits on the request
    /// channel becoming abandoned; a long-lived `StrPlay`/`FileRec` ugen
    /// holding a clone of `producer` will keep the worker alive past this
    /// call until it too is dropped.
    pub fn join(self) {
        let FileIoHub { producer, worker, .. } = self;
        drop(producer);
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

struct FileIoPortHandle {
    producer: Rc<RefCell<Producer<FileIoRequest>>>,
    inboxes: Rc<RefCell<HashMap<u64, VecDeque<FileIoReply>>>>,
}

impl std::fmt::Debug for FileIoPortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIoPortHandle").finish_non_exhaustive()
    }
}

impl FileIoPort for FileIoPortHandle {
    fn send(&mut self, request: FileIoRequest) {
        if self.producer.borrow_mut().push(request).is_err() {
            log::warn!("file-I/O request queue full; dropping request");
        }
    }

    fn try_recv(&mut self, handle: u64) -> Option<FileIoReply> {
        self.inboxes.borrow_mut().get_mut(&handle).and_then(VecDeque::pop_front)
    }
}

enum ReaderState {
    Open {
        reader: hound::WavReader<BufReader<File>>,
        channels: usize,
        cycle: bool,
        start_frame: u32,
        /// Frames read so far since the last (re)start, compared against
        /// `frame_budget` to honor the `end` parameter `hound` has no
        /// direct way to query once a reader is mid-stream.
        frames_consumed: u32,
        frame_budget: Option<u32>,
    },
    Failed,
}

struct WriterState {
    writer: hound::WavWriter<BufWriter<File>>,
    /// Write-behind staging area (C3): `write_filerec_block` enqueues raw
    /// `i16` bytes here, and `FileIoWorker::drain_writer_queues` performs
    /// the blocking `write_sample` calls, so a request that arrives while a
    /// previous write is slow still gets popped off the request queue
    /// promptly instead of stalling every other open file.
    queue: BlockQueue,
    channels: usize,
}

fn write_block_bytesize(channels: usize) -> usize {
    channels.max(1) * BL * std::mem::size_of::<i16>()
}

/// Owns both ends of the cross-thread channels opposite `FileIoHub`, and
/// every open reader/writer, keyed by handle.
struct FileIoWorker {
    requests: Consumer<FileIoRequest>,
    replies: Producer<FileIoReply>,
    readers: HashMap<u64, ReaderState>,
    writers: HashMap<u64, WriterState>,
}

impl FileIoWorker {
    fn new(requests: Consumer<FileIoRequest>, replies: Producer<FileIoReply>) -> Self {
        Self { requests, replies, readers: HashMap::new(), writers: HashMap::new() }
    }

    /// Blocks on the request queue until the audio side drops its
    /// producer (signalling shutdown), parking briefly between polls
    /// rather than busy-spinning since file I/O latency dwarfs a sleep.
    fn run(mut self) {
        loop {
            match self.requests.pop() {
                Ok(request) => self.handle_request(request),
                Err(rtrb::PopError::Empty) => {
                    if self.requests.is_abandoned() {
                        self.drain_writer_queues();
                        return;
                    }
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
            }
            self.drain_writer_queues();
        }
    }

    /// Writes every whole block currently staged in each writer's
    /// [`BlockQueue`] to disk. Called after every request is handled, and
    /// once more on shutdown so nothing queued is lost.
    fn drain_writer_queues(&mut self) {
        for state in self.writers.values_mut() {
            let blocksize = state.queue.blocksize();
            let mut bytes = vec![0u8; blocksize];
            while state.queue.dequeue(&mut bytes) {
                for chunk in bytes.chunks_exact(2) {
                    let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                    if let Err(e) = state.writer.write_sample(sample) {
                        log::warn!("filerec: write failed: {e}");
                        break;
                    }
                }
            }
        }
    }

    fn handle_request(&mut self, request: FileIoRequest) {
        match request {
            FileIoRequest::StrplayNew { handle, filename, start, end, cycle } => {
                self.open_strplay(handle, &filename, start, end, cycle);
                self.send_strplay_block(handle);
                self.send_strplay_block(handle);
            }
            FileIoRequest::StrplayRead { handle } => self.send_strplay_block(handle),
            FileIoRequest::StrplayPlay { handle, play } => {
                if !play {
                    self.readers.remove(&handle);
                }
            }
            FileIoRequest::FilerecNew { handle, filename, channels } => {
                self.open_filerec(handle, &filename, channels);
            }
            FileIoRequest::FilerecWrite { handle, block } => {
                self.write_filerec_block(handle, block);
            }
            FileIoRequest::FilerecStop { handle } => {
                self.drain_writer_queues();
                if let Some(state) = self.writers.remove(&handle) {
                    if let Err(e) = state.writer.finalize() {
                        log::warn!("failed to finalize recording for handle {handle}: {e}");
                    }
                }
            }
        }
    }

    fn open_strplay(&mut self, handle: u64, filename: &str, start: f32, end: f32, cycle: bool) {
        let state = match hound::WavReader::open(filename) {
            Ok(mut reader) => {
                let spec = reader.spec();
                let channels = spec.channels as usize;
                let start_frame = (start * spec.sample_rate as f32).max(0.0) as u32;
                let frame_budget = (end > start)
                    .then(|| (end * spec.sample_rate as f32) as u32)
                    .map(|end_frame| end_frame.saturating_sub(start_frame));
                if reader.seek(start_frame).is_err() {
                    log::warn!("strplay: seek to {start_frame} failed for {filename}");
                }
                self.replies
                    .push(FileIoReply::StrplayReady { handle, channels, ready: true })
                    .ok();
                ReaderState::Open { reader, channels, cycle, start_frame, frames_consumed: 0, frame_budget }
            }
            Err(e) => {
                log::warn!("strplay: failed to open {filename}: {e}");
                self.replies
                    .push(FileIoReply::StrplayReady { handle, channels: 0, ready: false })
                    .ok();
                ReaderState::Failed
            }
        };
        self.readers.insert(handle, state);
    }

    fn send_strplay_block(&mut self, handle: u64) {
        let Some(state) = self.readers.get_mut(&handle) else { return };
        let ReaderState::Open { reader, channels, cycle, start_frame, frames_consumed, frame_budget } = state
        else {
            self.replies
                .push(FileIoReply::StrplaySamps {
                    handle,
                    block: FileBlock { frame_count: 0, channel_count: 0, is_last: true, payload: Vec::new() },
                })
                .ok();
            return;
        };
        let channels = *channels;
        let mut payload = Vec::with_capacity(STRPLAY_FRAMES_PER_BLOCK * channels.max(1));
        let mut frames_read = 0usize;
        let mut hit_end = false;
        'frames: while frames_read < STRPLAY_FRAMES_PER_BLOCK {
            if let Some(budget) = frame_budget {
                if *frames_consumed >= *budget {
                    hit_end = true;
                    break 'frames;
                }
            }
            for _ in 0..channels.max(1) {
                match reader.samples::<i16>().next() {
                    Some(Ok(sample)) => payload.push(sample),
                    _ => {
                        hit_end = true;
                        break 'frames;
                    }
                }
            }
            frames_read += 1;
            *frames_consumed += 1;
        }
        let is_last = hit_end && !*cycle;
        if hit_end && *cycle {
            let restart = *start_frame;
            if reader.seek(restart).is_err() {
                log::warn!("strplay: loop seek failed for handle {handle}");
            }
            *frames_consumed = 0;
        }
        self.replies
            .push(FileIoReply::StrplaySamps {
                handle,
                block: FileBlock { frame_count: frames_read, channel_count: channels, is_last, payload },
            })
            .ok();
        if is_last {
            self.readers.remove(&handle);
        }
    }

    fn open_filerec(&mut self, handle: u64, filename: &str, channels: usize) {
        let spec = hound::WavSpec {
            channels: channels as u16,
            sample_rate: AR,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        match hound::WavWriter::create(filename, spec) {
            Ok(writer) => {
                let queue = BlockQueue::new(write_block_bytesize(channels), WRITE_QUEUE_BLOCKS, false);
                self.writers.insert(handle, WriterState { writer, queue, channels });
                self.replies
                    .push(FileIoReply::StrplayReady { handle, channels, ready: true })
                    .ok();
            }
            Err(e) => {
                log::warn!("filerec: failed to create {filename}: {e}");
                self.replies
                    .push(FileIoReply::StrplayReady { handle, channels: 0, ready: false })
                    .ok();
            }
        }
    }

    fn write_filerec_block(&mut self, handle: u64, block: FileBlock) {
        if let Some(state) = self.writers.get_mut(&handle) {
            let samples = &block.payload[..block.frame_count * block.channel_count.max(1)];
            let mut bytes = Vec::with_capacity(samples.len() * 2);
            for &sample in samples {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            // Only a full `BL`-frame block fits the queue's fixed blocksize;
            // a short final block (end-of-stream, channel-count mismatch)
            // is written straight through instead of padded and queued.
            if bytes.len() == state.queue.blocksize() {
                if !state.queue.enqueue(&bytes) {
                    log::warn!("filerec: write-behind queue full for handle {handle}, writing inline");
                    for &sample in samples {
                        if let Err(e) = state.writer.write_sample(sample) {
                            log::warn!("filerec: write failed for handle {handle}: {e}");
                            break;
                        }
                    }
                }
            } else {
                for &sample in samples {
                    if let Err(e) = state.writer.write_sample(sample) {
                        log::warn!("filerec: write failed for handle {handle}: {e}");
                        break;
                    }
                }
            }
        }
        self.replies.push(FileIoReply::FilerecSamps { handle, block }).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_hub_ports_do_not_panic_on_send() {
        let hub = FileIoHub::new_detached();
        let mut port = hub.make_port();
        port.send(FileIoRequest::StrplayRead { handle: 1 });
        assert!(port.try_recv(1).is_none());
    }

    #[test]
    fn filerec_write_behind_queue_flushes_full_blocks_to_disk() {
        let mut path = std::env::temp_dir();
        path.push(format!("arco_fileio_worker_test_{}.wav", std::process::id()));
        let (_req_tx, req_rx) = RingBuffer::new(CHANNEL_CAPACITY);
        let (rep_tx, _rep_rx) = RingBuffer::new(CHANNEL_CAPACITY);
        let mut worker = FileIoWorker::new(req_rx, rep_tx);
        worker.open_filerec(1, path.to_str().unwrap(), 1);

        let block = FileBlock { frame_count: BL, channel_count: 1, is_last: false, payload: vec![1000; BL] };
        worker.write_filerec_block(1, block.clone());
        worker.write_filerec_block(1, block);
        // nothing hits disk until drained
        assert_eq!(worker.writers.get(&1).unwrap().queue.len(), 2);
        worker.drain_writer_queues();
        assert_eq!(worker.writers.get(&1).unwrap().queue.len(), 0);

        worker.handle_request(FileIoRequest::FilerecStop { handle: 1 });

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(samples.len(), BL * 2);
        assert!(samples.iter().all(|&s| s == 1000));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn poll_incoming_buckets_replies_by_handle() {
        let (mut rep_tx, rep_rx) = RingBuffer::new(CHANNEL_CAPACITY);
        let mut hub = FileIoHub::new_detached();
        hub.reply_consumer = rep_rx;
        rep_tx
            .push(FileIoReply::StrplayReady { handle: 7, channels: 1, ready: true })
            .unwrap();
        hub.poll_incoming();
        let mut port = hub.make_port();
        let reply = port.try_recv(7);
        assert!(matches!(reply, Some(FileIoReply::StrplayReady { handle: 7, .. })));
        assert!(port.try_recv(9).is_none());
    }
}
