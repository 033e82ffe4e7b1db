/// Errors surfaced by the NoC crate.
#[derive(thiserror::Error, Debug)]
pub enum NocError {
    /// A malformed wire frame.
    #[error("framing error: {0}")]
    Framing(String),

    /// TCP I/O failed.
    #[error("network error")]
    Network(#[from] std::io::Error),

    /// A blocking receive exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The target reported an error (RETURN_FAIL or a fault interrupt).
    #[error("firmware error: {0}")]
    Firmware(String),

    /// A caller argument was invalid.
    #[error("invalid argument: {0}")]
    Gigo(String),
}

impl NocError {
    pub(crate) fn framing(msg: impl Into<String>) -> Self {
        NocError::Framing(msg.into())
    }
}
