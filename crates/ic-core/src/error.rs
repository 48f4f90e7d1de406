//! Error taxonomy for the interconnection handshake.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Wire-visible negotiation outcome code.
///
/// Carried in every `Header` and compared for equality across the wire, so
/// its numeric representation must stay stable.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    HandshakeRefused = 1,
    InvalidRequest = 2,
    UnsupportedArgument = 3,
}

impl ErrorCode {
    pub fn is_ok(self) -> bool {
        matches!(self, ErrorCode::Ok)
    }
}

/// Negotiation-level error: becomes a `Header { code, message }` on the
/// aggregator's response rather than propagating as a Rust panic or process
/// abort.
#[derive(Debug, Clone, Error)]
pub enum NegotiationError {
    #[error("{0}")]
    HandshakeRefused(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    UnsupportedArgument(String),
}

impl NegotiationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            NegotiationError::HandshakeRefused(_) => ErrorCode::HandshakeRefused,
            NegotiationError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            NegotiationError::UnsupportedArgument(_) => ErrorCode::UnsupportedArgument,
        }
    }

    pub fn message(&self) -> String {
        match self {
            NegotiationError::HandshakeRefused(m)
            | NegotiationError::InvalidRequest(m)
            | NegotiationError::UnsupportedArgument(m) => m.clone(),
        }
    }
}

/// Unrecoverable codec-level error: a parse failure or a version this crate
/// does not implement. Logged and turned into process exit code -1; never
/// placed on the wire. Transport failures, negotiation outcomes,
/// configuration errors, and dataset/engine errors each have their own error
/// type one layer up (`ic-transport::TransportError`,
/// `ic-core::error::NegotiationError`, `ic-node::config::ConfigError`, etc.)
/// rather than folding into this one.
#[derive(Debug, Error)]
pub enum Error {
    #[error("envelope codec error: {0}")]
    Codec(#[from] postcard::Error),

    #[error("envelope version {0} is unsupported (minimum supported is 2)")]
    UnsupportedVersion(u32),
}
