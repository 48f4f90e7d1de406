//! Algorithm handlers.
//!
//! Each handler expresses the algorithm-specific proposal/response/
//! validation rules on top of the Role State Machine: `BuildRequest`,
//! `Negotiate`, `BuildResponse`, `ProcessResponse`, `PrepareDataset`, `Run`.
//! Modeled as a sum type over the two concrete handlers rather than a trait
//! object — there are exactly two algorithms and each handler's negotiated
//! `Context` type differs, so a closed enum is simpler than a `dyn` boundary.

pub mod lr;
pub mod psi;
