//! Transport seam between the field engine and connected sessions.
//!
//! Socket I/O lives outside this crate. A session hands the engine an
//! `Arc<dyn PacketSink>`; everything the engine wants a client to see goes
//! through `send_packet`. Per-sink ordering is whatever order the calls
//! complete in, nothing is promised across sinks.

pub mod packet;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use packet::{OutPacket, PacketWriter, SendOp};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait PacketSink: Send + Sync {
    async fn send_packet(&self, packet: OutPacket) -> Result<(), SendError>;
}

/// Sink that forwards packets to a per-connection writer task over a
/// bounded channel. A dropped receiver means the connection is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<OutPacket>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<OutPacket>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end for the writer task.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<OutPacket>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PacketSink for ChannelSink {
    async fn send_packet(&self, packet: OutPacket) -> Result<(), SendError> {
        self.tx.send(packet).await.map_err(|_| SendError::Closed)
    }
}
