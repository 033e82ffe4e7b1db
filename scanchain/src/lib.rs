//! Host-side access to JTAG scan chains.
//!
//! The crate is layered the way the hardware is:
//!
//! * [`adapter`] — the transport contract a programming adapter has to
//!   satisfy ([`adapter::JtagAdapter`]), together with an in-process
//!   [emulated adapter](adapter::emulated) and a TCP client for a remote
//!   `jtagd` instance ([`adapter::network`]).
//! * [`chain`] — the state-level engine: TAP navigation, chain discovery,
//!   IR/DR scans with deferred and split variants.
//! * [`device`] — IDCODE decoding and the per-family device drivers.
//! * [`image`] — the `.bit` and `.jed` firmware image codecs.
//! * [`flash`] — indirect SPI flash programming through a bounce bitstream.
//!
//! All public operations start and end in Run-Test-Idle; intermediate TAP
//! transitions are local to one call.

pub mod adapter;
pub mod bits;
pub mod chain;
pub mod device;
mod error;
pub mod flash;
pub mod image;
pub mod tap;

pub use error::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
