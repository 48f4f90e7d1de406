//! Reliable point-to-point mesh transport.
//!
//! The core never dials a socket: it only calls `send`/`send_async`/`recv`
//! against whatever `MeshTransport` the runtime wires up, and assumes the
//! adapter already completed a mesh-connect handshake. `recv` blocks (awaits)
//! until a message tagged for `(src, tag)` arrives; delivery is FIFO per
//! `(src, dst, tag)`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::framing::{Frame, FrameCodec, FrameError};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("no route to rank {0}")]
    UnknownPeer(i32),
    #[error("connection to rank {0} is closed")]
    ConnectionClosed(i32),
}

/// Abstract reliable point-to-point channel between ranks.
///
/// Boxed with `#[async_trait]` rather than native `async fn` in trait so the
/// core can hold a `&dyn MeshTransport` instead of committing to a concrete
/// transport type at every call site.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    fn local_rank(&self) -> i32;

    /// Ordered reliable send (ordered per `(src, dst, tag)`).
    async fn send(&self, dst: i32, tag: &str, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Fire-and-forget send; must still deliver in order.
    async fn send_async(&self, dst: i32, tag: &str, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Blocks until a matching message is received.
    async fn recv(&self, src: i32, tag: &str) -> Result<Vec<u8>, TransportError>;
}

/// Per-(src, tag) mailbox. Backed by `mpsc` so waiting on an empty mailbox
/// never races with a concurrent delivery the way a hand-rolled
/// check-then-`Notify` loop would.
struct Mailbox {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl Mailbox {
    fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self { tx, rx: Mutex::new(rx) })
    }
}

struct Inbox {
    mailboxes: Mutex<HashMap<(i32, String), Arc<Mailbox>>>,
}

impl Inbox {
    fn new() -> Self {
        Self { mailboxes: Mutex::new(HashMap::new()) }
    }

    async fn mailbox_for(&self, key: (i32, String)) -> Arc<Mailbox> {
        let mut map = self.mailboxes.lock().await;
        map.entry(key).or_insert_with(Mailbox::new).clone()
    }

    async fn deliver(&self, src: i32, tag: String, payload: Vec<u8>) {
        let mailbox = self.mailbox_for((src, tag)).await;
        // Receiver side is dropped only together with the whole transport.
        let _ = mailbox.tx.send(payload);
    }

    async fn recv(&self, src: i32, tag: &str) -> Option<Vec<u8>> {
        let mailbox = self.mailbox_for((src, tag.to_string())).await;
        let mut rx = mailbox.rx.lock().await;
        rx.recv().await
    }
}

/// In-process mesh for tests and single-machine simulation runs. Every rank
/// shares one `InMemoryMesh`; `party(rank)` hands out the per-rank handle.
pub struct InMemoryMesh {
    inboxes: Vec<Arc<Inbox>>,
}

impl InMemoryMesh {
    pub fn new(world_size: i32) -> Arc<Self> {
        Arc::new(Self {
            inboxes: (0..world_size).map(|_| Arc::new(Inbox::new())).collect(),
        })
    }

    pub fn party(self: &Arc<Self>, rank: i32) -> InMemoryTransport {
        InMemoryTransport { mesh: Arc::clone(self), local_rank: rank }
    }

    pub fn world_size(&self) -> i32 {
        self.inboxes.len() as i32
    }
}

pub struct InMemoryTransport {
    mesh: Arc<InMemoryMesh>,
    local_rank: i32,
}

#[async_trait]
impl MeshTransport for InMemoryTransport {
    fn local_rank(&self) -> i32 {
        self.local_rank
    }

    async fn send(&self, dst: i32, tag: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        let inbox = self
            .mesh
            .inboxes
            .get(dst as usize)
            .ok_or(TransportError::UnknownPeer(dst))?;
        inbox.deliver(self.local_rank, tag.to_string(), bytes).await;
        Ok(())
    }

    async fn send_async(&self, dst: i32, tag: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.send(dst, tag, bytes).await
    }

    async fn recv(&self, src: i32, tag: &str) -> Result<Vec<u8>, TransportError> {
        let inbox = self
            .mesh
            .inboxes
            .get(self.local_rank as usize)
            .ok_or(TransportError::UnknownPeer(self.local_rank))?;
        inbox
            .recv(src, tag)
            .await
            .ok_or(TransportError::ConnectionClosed(src))
    }
}

/// TCP-backed mesh. Bootstraps a full mesh out of a rank→address map: ranks
/// with a lower number listen, ranks with a higher number dial out, so each
/// unordered pair connects exactly once.
pub struct TcpMeshTransport {
    local_rank: i32,
    peers: HashMap<i32, mpsc::UnboundedSender<Frame>>,
    inbox: Arc<Inbox>,
}

impl TcpMeshTransport {
    pub async fn connect(
        local_rank: i32,
        addrs: &HashMap<i32, SocketAddr>,
    ) -> Result<Arc<Self>, TransportError> {
        let world_size = addrs.len() as i32;
        let inbox = Arc::new(Inbox::new());
        let mut peers = HashMap::new();

        let listen_addr = *addrs.get(&local_rank).ok_or(TransportError::UnknownPeer(local_rank))?;
        let listener = TcpListener::bind(listen_addr).await?;
        debug!(rank = local_rank, addr = %listen_addr, "mesh transport listening");

        let expected_incoming = world_size - local_rank - 1;
        for _ in 0..expected_incoming {
            let (stream, peer_addr) = listener.accept().await?;
            let mut rank_buf = [0u8; 4];
            let (read_half, write_half) = stream.into_split();
            let mut read_half = read_half;
            read_half.read_exact(&mut rank_buf).await?;
            let peer_rank = i32::from_be_bytes(rank_buf);
            debug!(rank = local_rank, peer_rank, %peer_addr, "accepted mesh peer");
            let tx = spawn_peer_tasks(peer_rank, read_half, write_half, Arc::clone(&inbox));
            peers.insert(peer_rank, tx);
        }

        for peer_rank in 0..local_rank {
            let addr = *addrs.get(&peer_rank).ok_or(TransportError::UnknownPeer(peer_rank))?;
            let stream = TcpStream::connect(addr).await?;
            let (read_half, mut write_half) = stream.into_split();
            write_half.write_all(&local_rank.to_be_bytes()).await?;
            debug!(rank = local_rank, peer_rank, %addr, "dialed mesh peer");
            let tx = spawn_peer_tasks(peer_rank, read_half, write_half, Arc::clone(&inbox));
            peers.insert(peer_rank, tx);
        }

        Ok(Arc::new(Self { local_rank, peers, inbox }))
    }
}

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

fn spawn_peer_tasks(
    peer_rank: i32,
    mut read_half: OwnedReadHalf,
    mut write_half: OwnedWriteHalf,
    inbox: Arc<Inbox>,
) -> mpsc::UnboundedSender<Frame> {
    tokio::spawn(async move {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::with_capacity(8 * 1024);
        loop {
            match read_half.read_buf(&mut buf).await {
                Ok(0) => {
                    debug!(peer_rank, "mesh peer connection closed");
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(peer_rank, %err, "mesh peer read failed");
                    return;
                }
            }
            loop {
                match codec.decode(&mut buf) {
                    Ok(Some(frame)) => inbox.deliver(peer_rank, frame.tag, frame.payload).await,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(peer_rank, %err, "mesh peer frame decode failed");
                        return;
                    }
                }
            }
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    tokio::spawn(async move {
        let mut codec = FrameCodec::new();
        while let Some(frame) = rx.recv().await {
            let mut out = BytesMut::new();
            if let Err(err) = codec.encode(frame, &mut out) {
                warn!(peer_rank, %err, "mesh peer frame encode failed");
                continue;
            }
            if let Err(err) = write_half.write_all(&out).await {
                warn!(peer_rank, %err, "mesh peer write failed");
                return;
            }
        }
    });
    tx
}

#[async_trait]
impl MeshTransport for TcpMeshTransport {
    fn local_rank(&self) -> i32 {
        self.local_rank
    }

    async fn send(&self, dst: i32, tag: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.peers.get(&dst).ok_or(TransportError::UnknownPeer(dst))?;
        tx.send(Frame::new(tag, bytes))
            .map_err(|_| TransportError::ConnectionClosed(dst))
    }

    async fn send_async(&self, dst: i32, tag: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.send(dst, tag, bytes).await
    }

    async fn recv(&self, src: i32, tag: &str) -> Result<Vec<u8>, TransportError> {
        self.inbox.recv(src, tag).await.ok_or(TransportError::ConnectionClosed(src))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_mesh_delivers_in_order() {
        let mesh = InMemoryMesh::new(2);
        let a = mesh.party(0);
        let b = mesh.party(1);

        a.send(1, "Handshake", b"first".to_vec()).await.unwrap();
        a.send(1, "Handshake", b"second".to_vec()).await.unwrap();

        assert_eq!(b.recv(0, "Handshake").await.unwrap(), b"first");
        assert_eq!(b.recv(0, "Handshake").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn in_memory_mesh_separates_tags() {
        let mesh = InMemoryMesh::new(2);
        let a = mesh.party(0);
        let b = mesh.party(1);

        a.send(1, "Handshake", b"request".to_vec()).await.unwrap();
        a.send(1, "Handshake_response", b"response".to_vec()).await.unwrap();

        assert_eq!(b.recv(0, "Handshake_response").await.unwrap(), b"response");
        assert_eq!(b.recv(0, "Handshake").await.unwrap(), b"request");
    }

    #[tokio::test]
    async fn tcp_mesh_roundtrips_three_parties() {
        use std::net::Ipv4Addr;

        let mut addrs = HashMap::new();
        let mut listeners = Vec::new();
        for rank in 0..3i32 {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
            addrs.insert(rank, listener.local_addr().unwrap());
            listeners.push(listener);
        }
        drop(listeners); // free the ports; connect() below rebinds them

        let mut handles = Vec::new();
        for rank in 0..3i32 {
            let addrs = addrs.clone();
            handles.push(tokio::spawn(async move { TcpMeshTransport::connect(rank, &addrs).await }));
        }

        let mut parties = Vec::new();
        for handle in handles {
            parties.push(handle.await.unwrap().unwrap());
        }

        parties[0].send(2, "Handshake", b"hello".to_vec()).await.unwrap();
        let got = parties[2].recv(0, "Handshake").await.unwrap();
        assert_eq!(got, b"hello");
    }
}
