//! `ArcoError` (C4, C8, C11, C13): the error taxonomy from `spec.md` §7 —
//! kinds, not a type per failure site. Every fallible, non-realtime-path
//! operation in this crate (table lookup, device open, file open) returns
//! `Result<_, ArcoError>`; the audio callback itself stays infallible per
//! the propagation policy and only logs.
//!
//! Grounded on `knaster_graph::audio_backend::AudioBackendError`'s shape:
//! a flat enum of `#[error(...)]` variants, several wrapping a library
//! error via `#[error(transparent)] ... #[from]`. Unified into a single
//! enum here rather than split across a `GraphError`/`AudioBackendError`
//! pair the way the teacher does, since `spec.md` §7 itself describes one
//! flat taxonomy rather than per-subsystem error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArcoError {
    #[error("no ugen at id {0}")]
    LookupFailure(i32),
    #[error("ugen {id} is not a {expected} (found {found})")]
    ClassMismatch { id: i32, found: &'static str, expected: &'static str },
    #[error("id {0} is out of range for a table of size {1}")]
    IdOutOfRange(i32, usize),
    #[error("rate/channel mismatch binding ugen {0}")]
    RateMismatch(i32),
    #[error("you tried to start a backend that was already running")]
    BackendAlreadyRunning,
    #[error("you tried to stop a backend that was already stopped")]
    BackendNotRunning,
    #[error("failed to open audio device: {0}")]
    DeviceOpenFailure(String),
    #[error("streaming protocol desynchronized: {0}")]
    ProtocolDesync(String),
    #[error("malformed preferences entry: {0}")]
    PrefsParse(String),

    #[cfg(feature = "cpal")]
    #[error(transparent)]
    CpalDevices(#[from] ::cpal::DevicesError),
    #[cfg(feature = "cpal")]
    #[error(transparent)]
    CpalDeviceName(#[from] ::cpal::DeviceNameError),
    #[cfg(feature = "cpal")]
    #[error(transparent)]
    CpalBuildStream(#[from] ::cpal::BuildStreamError),
    #[cfg(feature = "cpal")]
    #[error(transparent)]
    CpalPlayStream(#[from] ::cpal::PlayStreamError),
    #[cfg(feature = "cpal")]
    #[error(transparent)]
    CpalDefaultStreamConfig(#[from] ::cpal::DefaultStreamConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wav(#[from] hound::Error),
}
