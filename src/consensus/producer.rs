//! Builds and signs this node's own messages.
//!
//! Every call first acquires the calling validator's producer permit, so a
//! node running several validator keys can never let two of them sign
//! concurrently and accidentally equivocate against themselves — the one
//! equivocation class the permit system exists to make structurally
//! impossible rather than merely detected after the fact.

use {
  super::{
    dag::{DagView, InMemoryDag},
    fork_choice::ForkChoice,
    message::{BlockBody, Justification, Message, MessageBody},
    permit::ProducerPermits,
    validator::Validator,
  },
  crate::primitives::{Hash, Keypair},
  std::collections::BTreeSet,
};

pub struct MessageProducer {
  permits: ProducerPermits,
  /// When `false`, every produced message cites only its main parent —
  /// the spec's "secondary parents may be disabled by configuration"
  /// escape hatch, for deployments that would rather trade DAG-merge
  /// throughput for simpler, single-parent-chain-shaped blocks.
  secondary_parents_enabled: bool,
}

impl MessageProducer {
  pub fn new(permits: ProducerPermits) -> Self {
    Self { permits, secondary_parents_enabled: true }
  }

  pub fn with_secondary_parents_enabled(mut self, enabled: bool) -> Self {
    self.secondary_parents_enabled = enabled;
    self
  }

  fn justifications(
    &self,
    dag: &InMemoryDag,
    validators: &[Validator],
  ) -> BTreeSet<Justification> {
    validators
      .iter()
      .flat_map(|v| {
        dag
          .latest_messages(&v.pubkey)
          .into_iter()
          .map(move |latest_message| Justification { validator: v.pubkey, latest_message })
      })
      .collect()
  }

  /// This validator's own current tip, used to seed the next message's
  /// sequence number and `prev_hash`. A node only ever equivocates against
  /// itself by way of a bug — [`super::permit::ProducerPermits`] exists
  /// precisely to rule that out — so picking any one element of the tip
  /// set when more than one exists is a reasonable, deterministic
  /// fallback rather than a case this code needs to reason hard about.
  fn own_tip(&self, dag: &InMemoryDag, keypair: &Keypair) -> Option<Hash> {
    let mut tips = dag.latest_messages(&keypair.public());
    tips.sort();
    tips.into_iter().next()
  }

  fn next_seq_num(&self, dag: &InMemoryDag, keypair: &Keypair) -> u64 {
    self
      .own_tip(dag, keypair)
      .map(|h| {
        dag
          .lookup(&h)
          .map(|m| m.header.validator_msg_seq_num + 1)
          .unwrap_or(0)
      })
      .unwrap_or(0)
  }

  fn prev_hash(&self, dag: &InMemoryDag, keypair: &Keypair) -> Hash {
    self.own_tip(dag, keypair).unwrap_or(Hash::ZERO)
  }

  /// Genesis — the very first message in the chain — has no parents. Every
  /// later message asks fork choice where to attach.
  fn parents(
    &self,
    dag: &InMemoryDag,
    fork_choice: &ForkChoice<'_>,
    from: Hash,
  ) -> Vec<Hash> {
    if dag.validators().is_empty() {
      return vec![];
    }
    if self.secondary_parents_enabled {
      fork_choice.find_parents(dag, from)
    } else {
      vec![fork_choice.find_main_parent(dag, from)]
    }
  }

  /// Signs a ballot: a pure vote, carrying no deploys, used both to
  /// justify a block a validator has seen and, in highway mode, as the
  /// omega message every non-leader sends each round.
  pub async fn ballot(
    &self,
    dag: &InMemoryDag,
    fork_choice: &ForkChoice<'_>,
    validators: &[Validator],
    keypair: &Keypair,
    era_id: Hash,
    round_id: u64,
    timestamp: i64,
  ) -> Message {
    let _permit = self.permits.acquire(keypair.public()).await;
    let from = self.own_tip(dag, keypair).unwrap_or(Hash::ZERO);
    let parents = self.parents(dag, fork_choice, from);
    let justifications = self.justifications(dag, validators);
    let (j_rank, main_rank) = dag.compute_ranks(&parents, &justifications);

    Message::sign(
      keypair,
      self.next_seq_num(dag, keypair),
      self.prev_hash(dag, keypair),
      parents,
      justifications,
      j_rank,
      main_rank,
      era_id,
      round_id,
      timestamp,
      MessageBody::Ballot,
    )
  }

  /// Signs a block carrying `deploys`; the caller is responsible for
  /// having already executed them and computed `post_state_hash` through
  /// the same [`super::executor::ExecutionEngine`] the executor will use
  /// to replay and re-verify it.
  #[allow(clippy::too_many_arguments)]
  pub async fn block(
    &self,
    dag: &InMemoryDag,
    fork_choice: &ForkChoice<'_>,
    validators: &[Validator],
    keypair: &Keypair,
    era_id: Hash,
    round_id: u64,
    timestamp: i64,
    deploys: Vec<Hash>,
    post_state_hash: Hash,
    bonds: Vec<(crate::primitives::Pubkey, u128)>,
  ) -> Message {
    let _permit = self.permits.acquire(keypair.public()).await;
    let from = self.own_tip(dag, keypair).unwrap_or(Hash::ZERO);
    let parents = self.parents(dag, fork_choice, from);
    let justifications = self.justifications(dag, validators);
    let (j_rank, main_rank) = dag.compute_ranks(&parents, &justifications);

    Message::sign(
      keypair,
      self.next_seq_num(dag, keypair),
      self.prev_hash(dag, keypair),
      parents,
      justifications,
      j_rank,
      main_rank,
      era_id,
      round_id,
      timestamp,
      MessageBody::Block(BlockBody { deploys, post_state_hash, bonds }),
    )
  }
}
