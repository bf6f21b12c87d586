//! Protocol error types.

use thiserror::Error;

/// Errors raised while parsing or assembling DNS messages.
#[derive(Error, Debug)]
pub enum Error {
    #[error("buffer too short: need {needed} bytes, have {available}")]
    BufferTooShort { needed: usize, available: usize },

    #[error("label too long: {0} bytes (max 63)")]
    LabelTooLong(usize),

    #[error("name too long: {0} bytes (max 255)")]
    NameTooLong(usize),

    #[error("invalid label: {0:?}")]
    InvalidLabel(String),

    #[error("compression pointer loop")]
    PointerLoop,

    #[error("invalid opcode: {0}")]
    InvalidOpCode(u8),

    #[error("invalid response code: {0}")]
    InvalidResponseCode(u8),

    #[error("unknown record type mnemonic: {0:?}")]
    UnknownRecordType(String),

    #[error("rdata text for {rtype} is malformed: {message}")]
    RdataText { rtype: String, message: String },

    #[error("rdata for {rtype} cannot be rendered to wire format")]
    RdataNotEncodable { rtype: String },
}

impl Error {
    /// Convenience constructor for truncated-buffer errors.
    pub fn buffer_too_short(needed: usize, available: usize) -> Self {
        Self::BufferTooShort { needed, available }
    }

    /// Convenience constructor for malformed rdata text.
    pub fn rdata_text(rtype: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RdataText {
            rtype: rtype.into(),
            message: message.into(),
        }
    }
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;
