//! The representative ugens (C10): together they exercise every contract
//! `arco_core::ugen` and `arco_core::rate_adapt` expose — ring buffers,
//! ramped parameters, fan-in/fan-out mixing, termination, and cross-thread
//! block handoff (file I/O).

pub mod constzero;
pub mod delay;
pub mod fileio;
pub mod granstream;
pub mod math;
pub mod mix;
pub mod olapitchshift;
pub mod probes;
pub mod recplay;
pub mod tableosc;
pub mod thru;

pub use constzero::{Const, Zero};
pub use delay::{Allpass, Delay};
pub use fileio::{FileBlock, FileIoPort, FileIoReply, FileIoRequest, FileRec, StrPlay};
pub use granstream::Granstream;
pub use math::{MathBinary, MathOp, MathUnary, UnaryOp};
pub use mix::{Mix, Sum};
pub use olapitchshift::OlaPitchShift;
pub use probes::{Onset, Probe, ProbeReport, SpectralCentroid, SpectralRolloff, Vu};
pub use recplay::RecPlay;
pub use tableosc::Tableosc;
pub use thru::Thru;
