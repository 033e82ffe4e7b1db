//! Server cores for the scanchain daemons.
//!
//! The binaries in this crate are thin argument-parsing wrappers; the
//! network-facing logic lives here so the integration tests can run a
//! daemon in-process against an emulated adapter.

pub mod jtagd;
