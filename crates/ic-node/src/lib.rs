//! ic-node - interconnection handshake and negotiated algorithm runtime
//!
//! This daemon provides:
//! - The Configuration Resolver (CLI flags, env overrides, enum resolution)
//! - Algorithm handlers for ECDH-PSI and SS-LR handshake negotiation
//! - The Role State Machine driving a handshake to a negotiated Context
//! - A Runtime Shim that executes the negotiated algorithm and persists output

pub mod config;
pub mod csv_io;
pub mod handlers;
pub mod kernels;
pub mod runtime;
pub mod state_machine;

pub use config::Config;
pub use state_machine::{run_handshake, AlgoHandler, NegotiatedContext, RunError};
