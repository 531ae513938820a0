//! Crate-wide error taxonomy.
//!
//! Every failure the consensus core can produce sorts into exactly one of
//! four buckets, because the executor's reaction to a failure depends
//! entirely on which bucket it is in:
//!
//! - [`ConsensusError::Validation`] — the message is malformed or its
//!   claims don't check out (bad signature, rank mismatch, unknown
//!   parent). The message is rejected and never touches the DAG.
//! - [`ConsensusError::Drop`] — the message is well-formed but no longer
//!   relevant (it targets an orphaned branch, or a sequence number already
//!   superseded). Silently discarded, no peer penalty.
//! - [`ConsensusError::Transient`] — a dependency the executor can retry
//!   against is temporarily unavailable (storage contention, execution
//!   engine busy). The message is requeued.
//! - [`ConsensusError::Fatal`] — a violated invariant that must stop the
//!   node rather than risk corrupting consensus state (self-equivocation,
//!   storage corruption).
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
  #[error("validation failed: {0}")]
  Validation(String),

  #[error("dropped: {0}")]
  Drop(String),

  #[error("transient failure, retry: {0}")]
  Transient(#[source] anyhow::Error),

  #[error("fatal: {0}")]
  Fatal(String),
}

impl ConsensusError {
  pub fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }

  pub fn drop(msg: impl Into<String>) -> Self {
    Self::Drop(msg.into())
  }

  pub fn fatal(msg: impl Into<String>) -> Self {
    Self::Fatal(msg.into())
  }

  pub fn is_fatal(&self) -> bool {
    matches!(self, ConsensusError::Fatal(_))
  }

  pub fn is_transient(&self) -> bool {
    matches!(self, ConsensusError::Transient(_))
  }
}

pub type ConsensusResult<T> = Result<T, ConsensusError>;
