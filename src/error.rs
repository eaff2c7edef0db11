//! Error kinds surfaced by the reader core.

use crate::iso7816::StatusWord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Context establishment or reader enumeration failed.
    #[error("reader initialization failed: {0}")]
    ReaderInit(String),

    /// Card detection timed out or was cancelled.
    #[error("card not present: {0}")]
    CardNotPresent(String),

    /// The transport failed below the APDU layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The chip answered with a non-success status word.
    #[error("card returned status {0}")]
    CardStatus(StatusWord),

    /// EXTERNAL AUTHENTICATE was refused or its response failed verification.
    #[error("basic access control authentication failed")]
    BacAuth,

    /// Response MAC mismatch, malformed protected response, or SSC overflow.
    #[error("secure messaging failed: {0}")]
    SecureMessaging(&'static str),

    /// EF.COM, DG1 or DG2 contents did not have the expected BER-TLV shape.
    #[error("data group parse error: {0}")]
    DataGroupParse(&'static str),

    /// The image sink failed.
    #[error("image sink error")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable process exit code used by the command-line frontend.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::ReaderInit(_) => 1,
            Error::CardNotPresent(_) => 2,
            Error::Transport(_) => 3,
            Error::CardStatus(_) => 4,
            Error::BacAuth => 5,
            Error::SecureMessaging(_) => 6,
            Error::DataGroupParse(_) => 7,
            Error::Io(_) => 8,
        }
    }
}
