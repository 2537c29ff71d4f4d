//! Router error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("replay rejected: {0}")]
    Replay(#[from] mocap_core::ReplayError),

    #[error("transport error: {0}")]
    Transport(#[from] mocap_transport::TransportError),

    #[error("core protocol error: {0}")]
    Core(#[from] mocap_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
