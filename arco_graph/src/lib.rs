//! # Arco Graph
//!
//! The audio-thread half of the Arco engine (C3, C4, C7, C8, C9, C11): the
//! ugen table and ID allocator, parameter/rate adaptation's control-message
//! consumer, the control-message inbox, the output/run sets, the audio I/O
//! state machine, the fixed-block cross-thread queue, and the file-I/O
//! worker's audio-thread side.
//!
//! `arco_core` owns what a ugen *is*; this crate owns how a graph of ugens
//! gets built, torn down, and driven one block at a time from a real audio
//! device, mirroring the split between `knaster_core` and `knaster_graph`.

pub mod audio_backend;
pub mod blockqueue;
pub mod clock;
pub mod control_service;
pub mod error;
pub mod fileio_worker;
pub mod inbox;
pub mod message;
pub mod sets;
pub mod table;

pub use audio_backend::{AudioBackend, AudioProcessor, AudioState};
pub use blockqueue::BlockQueue;
pub use clock::SharedClock;
pub use control_service::{ControlService, LoggingControlService};
pub use error::ArcoError;
pub use fileio_worker::FileIoHub;
pub use inbox::Inbox;
pub use message::Message;
pub use sets::{OutputSet, RunSet};
pub use table::{UgenId, UgenTable};
