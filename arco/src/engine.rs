//! The public facade (C13), tying the audio-thread runtime in
//! `arco_graph` to a client-side id allocator and a swappable
//! [`AudioBackend`][arco_graph::AudioBackend].
//!
//! Design note §9 asks for a process-wide "audio service singleton ...
//! initialized once per process". Rather than a literal global (the
//! Rust idiom for "one thing that owns the audio state" is an owned
//! struct, not a `static`), `Engine` is that singleton made explicit:
//! exactly one instance is expected per process, owned by `main` or a
//! CLI, and only it may construct ids or send messages — matching the
//! constraint ("forbid mutation from any thread other than the audio
//! thread") one level removed, since every mutation still funnels
//! through the single-producer message queue into the audio thread.

use arco_graph::table::UgenTable;
use arco_graph::{
    ArcoError, AudioBackend, AudioProcessor, ControlService, FileIoHub, LoggingControlService, Message, SharedClock,
    UgenId,
};
use rtrb::RingBuffer;

use crate::ids::IdAllocator;

const MESSAGE_QUEUE_CAPACITY: usize = 1024;

/// Owns the client-visible half of a running (or not-yet-started) Arco
/// instance: the id allocator, the message producer, and the backend.
pub struct Engine {
    backend: Box<dyn AudioBackend>,
    message_tx: rtrb::Producer<Message>,
    ids: IdAllocator,
    clock: SharedClock,
}

impl Engine {
    /// Opens `backend`, builds a fresh [`UgenTable`] sized to its output
    /// channel count, and starts the callback. `control_service` is the
    /// outbound sink probe reports and lifecycle notifications go to;
    /// pass [`LoggingControlService`] when nothing else is wired up yet.
    pub fn start(mut backend: Box<dyn AudioBackend>, control_service: Box<dyn ControlService>) -> Result<Self, ArcoError> {
        let device_out_chans = backend.output_channels();
        let device_in_chans = backend.input_channels();
        let table = UgenTable::new(device_out_chans);
        let (message_tx, message_rx) = RingBuffer::new(MESSAGE_QUEUE_CAPACITY);
        let fileio = FileIoHub::spawn();
        let clock = SharedClock::new();
        let processor = AudioProcessor::new(
            table,
            arco_graph::Inbox::new(message_rx),
            fileio,
            clock.clone(),
            control_service,
            device_in_chans,
            device_out_chans,
        );
        backend.start_processing(processor)?;
        Ok(Self { backend, message_tx, ids: IdAllocator::new(), clock })
    }

    /// Allocates a fresh client-side id, per `spec.md` §3's "Ugen ID
    /// lifecycle" step 1. The caller is responsible for following up with
    /// a message that constructs a ugen at this id before using it.
    pub fn alloc_id(&mut self) -> Result<UgenId, ArcoError> {
        self.ids.alloc()
    }

    /// Queues `id` for release without freeing it immediately, so any
    /// message already in flight that names it stays valid; the next
    /// [`collect_garbage`][Self::collect_garbage] call actually sends the
    /// `Free` message.
    pub fn free_id(&mut self, id: UgenId) {
        self.ids.release(id);
    }

    /// Drains the client-side to-be-freed list and sends one `Free`
    /// message for everything that was pending. Call periodically (the
    /// original calls this as part of its own GC); a no-op when nothing
    /// is pending.
    pub fn collect_garbage(&mut self) {
        let freed = self.ids.collect_garbage();
        if !freed.is_empty() {
            self.send(Message::Free(freed));
        }
    }

    /// Sends `message` to the audio thread's inbox. Logs and drops the
    /// message if the queue is full, matching `spec.md` §7's "lookup
    /// failure"/overflow handling: never block the sender.
    pub fn send(&mut self, message: Message) {
        if self.message_tx.push(message).is_err() {
            log::warn!("control message queue full; dropping message");
        }
    }

    pub fn clock_seconds(&self) -> f64 {
        self.clock.get()
    }

    pub fn stop(&mut self) -> Result<(), ArcoError> {
        self.backend.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A stub backend that never opens a real device, so engine wiring
    /// can be exercised without cpal or a sound card.
    struct StubBackend {
        processor: Option<AudioProcessor>,
        chans: usize,
    }

    impl AudioBackend for StubBackend {
        fn start_processing(&mut self, processor: AudioProcessor) -> Result<(), ArcoError> {
            self.processor = Some(processor);
            Ok(())
        }
        fn stop(&mut self) -> Result<(), ArcoError> {
            if self.processor.take().is_none() {
                return Err(ArcoError::BackendNotRunning);
            }
            Ok(())
        }
        fn sample_rate(&self) -> u32 {
            arco_primitives::AR
        }
        fn output_channels(&self) -> usize {
            self.chans
        }
        fn input_channels(&self) -> usize {
            0
        }
    }

    #[test]
    fn start_then_stop_round_trips() {
        let backend = Box::new(StubBackend { processor: None, chans: 2 });
        let mut engine = Engine::start(backend, Box::new(LoggingControlService)).unwrap();
        assert_eq!(engine.clock_seconds(), 0.0);
        engine.stop().unwrap();
    }

    #[test]
    fn alloc_id_and_free_id_round_trip_through_collect_garbage() {
        let backend = Box::new(StubBackend { processor: None, chans: 1 });
        let mut engine = Engine::start(backend, Box::new(LoggingControlService)).unwrap();
        let id = engine.alloc_id().unwrap();
        engine.send(Message::ConstNew { id, chans: 1, initial: vec![0.5] });
        engine.free_id(id);
        engine.collect_garbage();
        let reused = engine.alloc_id().unwrap();
        assert_eq!(reused, id);
    }

    #[test]
    fn dropped_messages_on_a_full_queue_do_not_panic() {
        let backend = Box::new(StubBackend { processor: None, chans: 1 });
        let mut engine = Engine::start(backend, Box::new(LoggingControlService)).unwrap();
        for _ in 0..(MESSAGE_QUEUE_CAPACITY + 10) {
            engine.send(Message::Reset);
        }
    }
}
