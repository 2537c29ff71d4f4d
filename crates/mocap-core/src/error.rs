//! Error types for the mocap core

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid magic byte in frame header
    #[error("invalid magic byte: expected 0x4d, got 0x{0:02x}")]
    InvalidMagic(u8),

    /// Frame written by an incompatible encoder
    #[error("unsupported wire version: {0}")]
    UnsupportedVersion(u8),

    /// Frame buffer too small
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// MessagePack encoding error
    #[error("encode error: {0}")]
    EncodeError(String),

    /// MessagePack decoding error
    #[error("decode error: {0}")]
    DecodeError(String),

    /// No routable origin could be derived from a frame
    #[error("unaddressable frame: {0}")]
    Unaddressable(String),

    /// Session file could not be parsed
    #[error("invalid session: {0}")]
    InvalidSession(String),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::EncodeError(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::DecodeError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidSession(e.to_string())
    }
}

/// Rejected replay operations. Rejections never change playback state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("session '{0}' contains no frames")]
    EmptySession(String),

    #[error("no session loaded")]
    NoSession,

    #[error("cannot jump to {requested} ms, session spans {start}..={end} ms")]
    JumpOutOfRange { requested: u64, start: u64, end: u64 },
}
