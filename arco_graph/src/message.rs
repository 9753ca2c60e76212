//! The control-message wire type (C6/C7).
//!
//! Grounded on `spec.md` §6's address list. The original dispatches an
//! OSC-style `(address, type string, args...)` triple through a per-class
//! handler table built at static-init time; here the message is already a
//! typed Rust value by the time it reaches the inbox; there is no address
//! string or type tag to parse, so `Inbox::drain` replaces the handler
//! table with one `match`. That simplification, and the resulting
//! flattening of per-class handlers into this one enum, is recorded in
//! `DESIGN.md`.
//!
//! Envelope messages (`start`/`decay`/`stop`/`set` on piecewise-linear
//! envelopes, per §6) are intentionally absent: no envelope ugen appears
//! among the representative ugens this crate implements, so there is
//! nothing on the receiving end for those variants to name.

use crate::table::UgenId;

/// Identifies which bound input (or constant-backed slot) a parameter
/// message targets, since `repl_<param>`/`set_<param>` in the original are
/// distinct per-class methods rather than one indexed setter. Resolved to
/// a concrete ugen method by `Inbox::drain` after a `classname()` check
/// and an `as_any_mut` downcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSlot {
    Input,
    Dur,
    Fb,
    Gain,
    Freq,
    Amp,
    X1,
    X2,
    Max,
}

#[derive(Debug, Clone)]
pub enum Message {
    // --- graph lifecycle --------------------------------------------
    /// `/arco/reset`: tear down every installed ugen and reinstall the
    /// sentinels.
    Reset,
    /// `/arco/prtree`: dump the output/run sets and table occupancy to
    /// the log.
    PrintTree,
    /// `/arco/free`: variadic; each id is queued via `UgenTable::free`.
    Free(Vec<UgenId>),
    /// `/arco/open`.
    Open {
        in_dev: Option<String>,
        out_dev: Option<String>,
        latency_ms: f32,
        buf_size: u32,
        ctrl_service: String,
    },
    /// `/arco/close`.
    Close,
    /// `/arco/output`: add `id` to the output set.
    AddToOutput(UgenId),
    /// Not a separate address in §6, but the inverse of `AddToOutput`;
    /// fired when a ugen bound into the output set is replaced or freed.
    RemoveFromOutput(UgenId),
    /// `/arco/mute`: drop `id` from the output set without freeing it.
    Mute(UgenId),

    // --- const ---------------------------------------------------------
    /// `/arco/const/new` and `/arco/const/newf` (a single value is just a
    /// one-element `initial`).
    ConstNew { id: UgenId, chans: usize, initial: Vec<f32> },
    /// `/arco/const/set`.
    ConstSet { id: UgenId, chan: usize, value: f32 },

    // --- parameter editing ----------------------------------------------
    /// `repl_<param>`: rebind an input edge without touching any other
    /// slot on the target ugen.
    ReplInput { id: UgenId, param: ParamSlot, source: UgenId },
    /// `set_<param>`: write one channel of a constant-backed input,
    /// leaving the edge itself untouched.
    SetConst { id: UgenId, param: ParamSlot, chan: usize, value: f32 },

    // --- table building (tableosc) --------------------------------------
    TableCreateTtd { id: UgenId, index: usize, samples: Vec<f32> },
    TableCreateTas { id: UgenId, index: usize, amps: Vec<f32>, table_len: usize },
    TableCreateTcs { id: UgenId, index: usize, amps: Vec<f32>, phases: Vec<f32>, table_len: usize },
    TableoscSelect { id: UgenId, index: usize },

    // --- mix/sum contributor lists ---------------------------------------
    MixAddInput { id: UgenId, source: UgenId, gain: UgenId },
    MixRemoveInput { id: UgenId, source: UgenId },
    SumAddInput { id: UgenId, source: UgenId },
    SumRemoveInput { id: UgenId, source: UgenId },

    // --- recplay ---------------------------------------------------------
    RecPlayRecord { id: UgenId, on: bool },
    RecPlayPlay { id: UgenId, start_time_secs: f64 },
    RecPlayStop { id: UgenId },
    RecPlaySetLoop { id: UgenId, looping: bool },
    RecPlaySetSpeed { id: UgenId, speed: f32 },
    RecPlaySetFade { id: UgenId, secs: f32 },

    // --- probes ------------------------------------------------------------
    /// Starts a `Vu`/`SpectralCentroid`/`SpectralRolloff` probe's periodic
    /// reports; which concrete ugen is addressed is resolved by table
    /// lookup, not by this message.
    ProbeStart { id: UgenId, reply_addr: String, period_secs: f32 },
    ProbeThresh { id: UgenId, threshold: f32, direction: i32, max_wait_secs: f32 },
    ProbeSample { id: UgenId, period_secs: f32, frames: i32, chan: usize, nchans: usize, stride: usize },
    ProbeStop { id: UgenId },

    // --- streaming file I/O -------------------------------------------------
    /// `/fileio/strplay/new`: construct a `StrPlay` ugen at `id`. The
    /// handle the audio- and file-side threads use to address this
    /// stream is `id` itself, cast to `u64` — ids already are the
    /// system's stable small-integer identity, so there is no need for
    /// the pointer-address handle the original derives.
    StrplayNew {
        id: UgenId,
        chans: usize,
        filename: String,
        start: f32,
        end: f32,
        cycle: bool,
        mix: bool,
        expand: bool,
    },
    /// `/fileio/strplay/play`.
    StrplayPlay { id: UgenId, play: bool },
    /// `/fileio/strplay/quit`: stop and free in one message.
    StrplayQuit { id: UgenId },
    /// `/fileio/filerec/new`: construct a `FileRec` ugen at `id` recording
    /// from `input`.
    FilerecNew { id: UgenId, chans: usize, filename: String, input: UgenId },
    FilerecRecord { id: UgenId, on: bool },
    FilerecStop { id: UgenId },
}
