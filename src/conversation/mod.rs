//! Request/reply rendezvous for scripted NPC dialogue.
//!
//! A script calls `ConversationSession::send` and is suspended until the
//! client answers (the connection's dispatch path calls `deliver`) or the
//! session's `CancelToken` fires. Only one request may be outstanding.

pub mod message;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::network::{PacketSink, SendError};

pub use message::{DialogAction, MessageKind, ScriptMessage, ScriptReply};

#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("conversation cancelled")]
    Cancelled,

    #[error("invalid response to {expected:?}: {got:?}")]
    InvalidResponse { expected: MessageKind, got: ScriptReply },

    #[error("a request is already outstanding")]
    Busy,

    #[error("conversation is no longer usable")]
    Unusable,

    #[error("send failed: {0}")]
    Send(#[from] SendError),
}

/// Cloneable cancellation flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ConversationSession {
    socket: Arc<dyn PacketSink>,
    token: CancelToken,
    previous: Mutex<Option<ScriptMessage>>,
    replies_tx: mpsc::UnboundedSender<ScriptReply>,
    replies: tokio::sync::Mutex<mpsc::UnboundedReceiver<ScriptReply>>,
    closed: AtomicBool,
    unusable: AtomicBool,
    exchanges: AtomicU32,
}

impl ConversationSession {
    pub fn new(socket: Arc<dyn PacketSink>) -> Self {
        Self::with_token(socket, CancelToken::new())
    }

    pub fn with_token(socket: Arc<dyn PacketSink>, token: CancelToken) -> Self {
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        Self {
            socket,
            token,
            previous: Mutex::new(None),
            replies_tx,
            replies: tokio::sync::Mutex::new(replies_rx),
            closed: AtomicBool::new(false),
            unusable: AtomicBool::new(false),
            exchanges: AtomicU32::new(0),
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// The last message handed to `send`.
    pub fn previous_message(&self) -> Option<ScriptMessage> {
        self.previous.lock().clone()
    }

    /// Number of requests answered with a valid reply.
    pub fn exchanges(&self) -> u32 {
        self.exchanges.load(Ordering::Acquire)
    }

    pub fn is_usable(&self) -> bool {
        !self.unusable.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    /// Send `message` to the client and wait for its reply.
    pub async fn send(&self, message: ScriptMessage) -> Result<ScriptReply, ConversationError> {
        if self.token.is_cancelled() || self.closed.load(Ordering::Acquire) {
            return Err(ConversationError::Cancelled);
        }
        if self.unusable.load(Ordering::Acquire) {
            return Err(ConversationError::Unusable);
        }
        let mut replies = self.replies.try_lock().map_err(|_| ConversationError::Busy)?;

        // Anything queued now arrived while nothing was asked.
        while let Ok(stale) = replies.try_recv() {
            tracing::debug!("[conversation] [stale_reply] dropped {:?}", stale);
        }

        *self.previous.lock() = Some(message.clone());
        self.socket.send_packet(message.encode()).await?;

        let reply = tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                tracing::debug!("[conversation] [cancelled] while waiting on {:?}", message.kind());
                return Err(ConversationError::Cancelled);
            }
            reply = replies.recv() => match reply {
                Some(reply) => reply,
                None => return Err(ConversationError::Cancelled),
            },
        };

        if !message.validate(&reply) {
            tracing::warn!("[conversation] [invalid_reply] kind={:?} reply={:?}", message.kind(), reply);
            self.unusable.store(true, Ordering::Release);
            return Err(ConversationError::InvalidResponse { expected: message.kind(), got: reply });
        }

        self.exchanges.fetch_add(1, Ordering::AcqRel);
        Ok(reply)
    }

    /// Hand a client reply to the waiting script. Returns `false` once the
    /// session has been disposed.
    pub fn deliver(&self, reply: ScriptReply) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.replies_tx.send(reply).is_ok()
    }

    /// Cancel any waiter and refuse further deliveries. Safe to call more
    /// than once.
    pub fn dispose(&self) {
        self.token.cancel();
        self.closed.store(true, Ordering::Release);
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.dispose();
    }
}
