//! Mesh transport for the interconnection runtime
//!
//! Provides:
//! - Length-prefixed tagged framing
//! - The `MeshTransport` adapter trait (send / send_async / recv by tag)
//! - A TCP-backed implementation and an in-process one for tests/simulation

pub mod framing;
pub mod transport;

pub use framing::{Frame, FrameCodec, FrameError};
pub use transport::{InMemoryMesh, InMemoryTransport, MeshTransport, TcpMeshTransport, TransportError};
