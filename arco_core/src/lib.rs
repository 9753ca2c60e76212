//! # Arco Core
//!
//! Contains the ugen contract (construction, reference counting, per-block
//! pull evaluation, termination), the rate/channel adaptation machinery
//! that lets any ugen be bound as the input of any other, and the set of
//! representative ugens that exercise those contracts: delay lines, a
//! wavetable oscillator, an overlap-add pitch shifter, a granular
//! streamer, record/play buffers, and the audio-side half of file
//! streaming I/O.
//!
//! This crate is deliberately ignorant of *where* ugens live (that's
//! `arco_graph::table::UgenTable`) and of the audio device (that's
//! `arco_graph::audio_backend`). It only knows how to compute one ugen's
//! output for one block given its inputs.

pub mod audioblock;
pub mod dsp;
pub mod rate_adapt;
pub mod ringbuf;
pub mod ugen;
pub mod ugens;

pub use rate_adapt::{Stride, bind_stride};
pub use ugen::{Rate, Ugen, UgenBase, UgenFlags};
