//! The DAG node type. Every message a validator signs — whether it carries
//! deploys (a [`Block`]) or is a pure vote (a [`Ballot`]) — shares the same
//! header shape described in the data model: a sequence number and previous
//! hash that place it in its author's swimlane, an ordered list of parents,
//! a justification set naming the latest message the author had seen from
//! every other validator, and the two rank counters used throughout the
//! consensus core to order and bound traversals.

use {
  crate::primitives::{verify, Hash, Keypair, Pubkey, Signature},
  serde::{Deserialize, Serialize},
  std::collections::BTreeSet,
  thiserror::Error,
};

/// Named in a justification set: "the latest message I had seen from this
/// validator at the time I created mine".
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Justification {
  pub validator: Pubkey,
  pub latest_message: Hash,
}

/// Fields common to both variants of [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
  pub validator_id: Pubkey,
  pub validator_msg_seq_num: u64,
  pub validator_prev_message_hash: Hash,
  /// Ordered; the first entry is the main parent. Empty only for Genesis.
  pub parents: Vec<Hash>,
  pub justifications: BTreeSet<Justification>,
  pub j_rank: u64,
  pub main_rank: u64,
  /// Hash of the era's key block. Empty (`Hash::ZERO`) outside highway mode.
  pub era_id: Hash,
  /// Highway round tick; unused (0) in classical mode.
  pub round_id: u64,
  /// Milliseconds since the Unix epoch, as claimed by the author.
  pub timestamp: i64,
  pub signature: Signature,
}

/// The payload specific to a block: executed deploys and the resulting
/// on-chain state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockBody {
  pub deploys: Vec<Hash>,
  pub post_state_hash: Hash,
  pub bonds: Vec<(Pubkey, u128)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageBody {
  Block(BlockBody),
  Ballot,
}

/// A signed node of the block-DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
  pub header: MessageHeader,
  pub body: MessageBody,
}

#[derive(Debug, Error)]
pub enum MessageError {
  #[error("signature verification failed: {0}")]
  BadSignature(#[from] ed25519_dalek::SignatureError),
  #[error("message has no parents and is not Genesis")]
  MissingMainParent,
}

impl Message {
  /// Bytes that get signed and hashed: everything except the signature
  /// itself, so that the signature cannot be forged by replaying another
  /// message's bytes.
  fn signing_bytes(&self) -> Vec<u8> {
    #[derive(Serialize)]
    struct Signable<'a> {
      validator_id: &'a Pubkey,
      validator_msg_seq_num: u64,
      validator_prev_message_hash: &'a Hash,
      parents: &'a [Hash],
      justifications: &'a BTreeSet<Justification>,
      j_rank: u64,
      main_rank: u64,
      era_id: &'a Hash,
      round_id: u64,
      timestamp: i64,
      body: &'a MessageBody,
    }
    bincode::serialize(&Signable {
      validator_id: &self.header.validator_id,
      validator_msg_seq_num: self.header.validator_msg_seq_num,
      validator_prev_message_hash: &self.header.validator_prev_message_hash,
      parents: &self.header.parents,
      justifications: &self.header.justifications,
      j_rank: self.header.j_rank,
      main_rank: self.header.main_rank,
      era_id: &self.header.era_id,
      round_id: self.header.round_id,
      timestamp: self.header.timestamp,
      body: &self.body,
    })
    .expect("in-memory serialization never fails")
  }

  /// Blake2b-256 hash of the signed payload; this is `messageHash`.
  pub fn hash(&self) -> Hash {
    let mut bytes = self.signing_bytes();
    bytes.extend_from_slice(self.header.signature.bytes.to_bytes().as_ref());
    Hash::digest(&bytes)
  }

  pub fn verify_signature(&self) -> Result<(), MessageError> {
    let bytes = self.signing_bytes();
    verify(&self.header.validator_id, &bytes, &self.header.signature)
      .map_err(MessageError::BadSignature)
  }

  pub fn is_genesis(&self) -> bool {
    self.header.parents.is_empty()
  }

  pub fn is_block(&self) -> bool {
    matches!(self.body, MessageBody::Block(_))
  }

  pub fn is_ballot(&self) -> bool {
    matches!(self.body, MessageBody::Ballot)
  }

  pub fn main_parent(&self) -> Option<Hash> {
    self.header.parents.first().copied()
  }

  pub fn secondary_parents(&self) -> &[Hash] {
    self.header.parents.get(1..).unwrap_or(&[])
  }

  pub fn block_body(&self) -> Option<&BlockBody> {
    match &self.body {
      MessageBody::Block(b) => Some(b),
      MessageBody::Ballot => None,
    }
  }

  /// Builds and signs a new message. `j_rank`/`main_rank` must already be
  /// computed by the caller (see [`crate::consensus::dag::compute_ranks`])
  /// since they depend on the parent/justification set which only the
  /// caller (fork choice, producer) has resolved against the DAG.
  #[allow(clippy::too_many_arguments)]
  pub fn sign(
    keypair: &Keypair,
    validator_msg_seq_num: u64,
    validator_prev_message_hash: Hash,
    parents: Vec<Hash>,
    justifications: BTreeSet<Justification>,
    j_rank: u64,
    main_rank: u64,
    era_id: Hash,
    round_id: u64,
    timestamp: i64,
    body: MessageBody,
  ) -> Self {
    let mut header = MessageHeader {
      validator_id: keypair.public(),
      validator_msg_seq_num,
      validator_prev_message_hash,
      parents,
      justifications,
      j_rank,
      main_rank,
      era_id,
      round_id,
      timestamp,
      // placeholder, replaced below once signing bytes are known
      signature: Signature {
        algorithm: crate::primitives::SignatureAlgorithm::Ed25519,
        bytes: ed25519_dalek::Signature::from_bytes(&[0u8; 64]).unwrap(),
      },
    };
    let unsigned = Message { header: header.clone(), body };
    let signature = keypair.sign(&unsigned.signing_bytes());
    header.signature = signature;
    Message { header, body: unsigned.body }
  }
}
