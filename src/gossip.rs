//! The network collaborator: broadcasts signed messages to peers and
//! delivers messages peers broadcast to this node. Kept as a trait so the
//! consensus core stays agnostic to whatever transport and peer discovery
//! scheme a deployment picks.

use {crate::consensus::Message, async_trait::async_trait};

#[async_trait]
pub trait Gossip: Send + Sync {
  async fn broadcast(&self, message: Message) -> Result<(), anyhow::Error>;

  /// Explicitly asks peers to replay a message this node has been missing
  /// for too long, used by [`crate::consensus::Orphans::sweep`]'s output.
  async fn request_replay(&self, hash: crate::primitives::Hash) -> Result<(), anyhow::Error>;
}

/// Bounded mpsc-backed gossip used in tests and single-node tooling: every
/// broadcast message loops back as an inbound message instead of reaching
/// a network.
pub struct LoopbackGossip {
  sender: tokio::sync::mpsc::Sender<Message>,
}

impl LoopbackGossip {
  pub fn new(capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<Message>) {
    let (sender, receiver) = tokio::sync::mpsc::channel(capacity);
    (Self { sender }, receiver)
  }
}

#[async_trait]
impl Gossip for LoopbackGossip {
  async fn broadcast(&self, message: Message) -> Result<(), anyhow::Error> {
    self.sender.send(message).await.map_err(|e| anyhow::anyhow!(e.to_string()))
  }

  async fn request_replay(&self, _hash: crate::primitives::Hash) -> Result<(), anyhow::Error> {
    Ok(())
  }
}
