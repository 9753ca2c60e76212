//! # Arco
//!
//! Public facade over the Arco engine: re-exports the audio-thread
//! runtime (`arco_graph`, which itself builds on `arco_core`'s ugen
//! library) and adds the two things that only make sense on the
//! control-client side of the process split — the id allocator
//! (`spec.md` §3's "Ugen ID lifecycle") and preferences (C13) — plus
//! [`Engine`], the thin owning wrapper that ties a backend, a table, and
//! an id allocator together into one running instance, the way
//! `knaster`'s facade crate re-exports `knaster_graph` and adds nothing
//! but prelude modules.

pub mod engine;
pub mod ids;
pub mod prefs;

pub use engine::Engine;
pub use ids::IdAllocator;
pub use prefs::Prefs;

pub use arco_graph::{ArcoError, AudioBackend, AudioState, ControlService, LoggingControlService, Message, UgenId};

#[cfg(feature = "cpal")]
pub use arco_graph::audio_backend::cpal::{CpalBackend, CpalBackendOptions};
