//! Host-side access to the on-chip network.
//!
//! The NoC multiplexes two message classes over one transport: 128-bit RPC
//! frames and variable-length DMA frames ([`frame`]). A single hardware
//! bridge is shared between many TCP clients by the switch ([`switch`]),
//! which hands every client its own ephemeral endpoint address.
//! [`client`] is the matching connection type with the blocking
//! receive-with-timeout helpers.
//!
//! The switch knows nothing about JTAG; it moves frames.

pub mod client;
pub mod frame;
pub mod switch;

mod error;

pub use error::NocError;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, NocError>;
