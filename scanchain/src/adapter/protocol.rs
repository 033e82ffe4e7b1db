//! The `jtagd` wire protocol.
//!
//! Opcode-dispatched request/response over TCP. All multi-byte integers are
//! little-endian; this is the one deliberate exception to the big-endian
//! NoC wire rule and has to stay that way for compatibility. Strings travel
//! Pascal-style: a `u16` length followed by that many bytes.
//!
//! Requests are a one-byte opcode plus opcode-specific arguments; response
//! framing is opcode-specific (a status byte, a length-prefixed string, or
//! a raw byte block). `COMMIT` is acknowledged with a single zero byte so
//! clients can synchronize with deferred operations.

/// Default TCP port of a `jtagd` instance.
pub const DEFAULT_PORT: u16 = 50123;

pub const OP_GET_NAME: u8 = 0x00;
pub const OP_GET_SERIAL: u8 = 0x01;
pub const OP_GET_USERID: u8 = 0x02;
pub const OP_GET_FREQ: u8 = 0x03;

/// `last_tms: u8, count: u32, data` — responds with the TDO capture.
pub const OP_SHIFT_DATA: u8 = 0x04;
/// Same arguments, no response.
pub const OP_SHIFT_DATA_WO: u8 = 0x05;
/// `last_tms: u8, count: u32, want_response: u8, data` — responds with a
/// status byte, then the capture if the status is [`STATUS_DONE`].
pub const OP_SHIFT_DATA_WRITE_ONLY: u8 = 0x06;
/// `count: u32` — responds with a status byte, then the capture if the
/// status is [`STATUS_DEFERRED`].
pub const OP_SHIFT_DATA_READ_ONLY: u8 = 0x07;

/// `count: u32`, committed immediately.
pub const OP_DUMMY_CLOCK: u8 = 0x08;
/// `count: u32`, queued behind earlier deferred writes.
pub const OP_DUMMY_CLOCK_DEFERRED: u8 = 0x09;

pub const OP_TLR: u8 = 0x0A;
pub const OP_ENTER_SIR: u8 = 0x0B;
pub const OP_LEAVE_E1IR: u8 = 0x0C;
pub const OP_ENTER_SDR: u8 = 0x0D;
pub const OP_LEAVE_E1DR: u8 = 0x0E;
pub const OP_RESET_IDLE: u8 = 0x0F;

/// Flushes server-side deferred writes; acknowledged with one zero byte.
pub const OP_COMMIT: u8 = 0x10;

pub const OP_SPLIT_SUPPORTED: u8 = 0x11;

pub const OP_HAS_GPIO: u8 = 0x12;
pub const OP_GET_GPIO_PIN_COUNT: u8 = 0x13;
pub const OP_READ_GPIO_STATE: u8 = 0x14;
pub const OP_WRITE_GPIO_STATE: u8 = 0x15;

/// Performance counters, each answered with a `u64`.
pub const OP_PERF_SHIFT: u8 = 0x16;
pub const OP_PERF_RECOV: u8 = 0x17;
pub const OP_PERF_DATA: u8 = 0x18;
pub const OP_PERF_MODE: u8 = 0x19;
pub const OP_PERF_DUMMY: u8 = 0x1A;

/// Client is done; the server drops the connection.
pub const OP_QUIT: u8 = 0x1B;

/// Split-scan status: the operation completed, data follows if requested.
pub const STATUS_DONE: u8 = 0;
/// Split-scan status: the read half was deferred.
pub const STATUS_DEFERRED: u8 = 1;
/// Split-scan status: the operation failed server-side.
pub const STATUS_FAILED: u8 = 0xFF;
