/// The overarching error type which contains all possible errors as variants.
///
/// Every failure surfaced by this crate is one of these kinds; the kind tells
/// the caller whether the session can continue (`Gigo`, `Timeout`) or has to
/// be torn down (`Adapter`, `BoardFault`).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A lower-level adapter or driver failure. The session must be torn
    /// down; the adapter state is unknown.
    #[error("adapter failure: {0}")]
    Adapter(String),

    /// An electrical fault on the board: TDO stuck, DONE never asserted,
    /// or a programming verify mismatch.
    #[error("board fault: {0}")]
    BoardFault(String),

    /// A malformed firmware image or wire frame.
    #[error("framing error: {0}")]
    Framing(String),

    /// A caller argument was invalid (index out of range, bad length).
    #[error("invalid argument: {0}")]
    Gigo(String),

    /// The operation is acknowledged by the design but not built.
    #[error("not implemented: {0}")]
    Unimplemented(String),

    /// The target reported an error over the NoC.
    #[error("firmware error: {0}")]
    Firmware(String),

    /// TCP I/O failed.
    #[error("network error")]
    Network(#[from] std::io::Error),

    /// A blocking receive exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),
}

impl Error {
    pub(crate) fn gigo(msg: impl Into<String>) -> Self {
        Error::Gigo(msg.into())
    }

    pub(crate) fn framing(msg: impl Into<String>) -> Self {
        Error::Framing(msg.into())
    }

    pub(crate) fn board_fault(msg: impl Into<String>) -> Self {
        Error::BoardFault(msg.into())
    }
}
