//! The message executor: the single state machine every incoming message —
//! gossiped in from a peer, or freshly signed by a local producer — passes
//! through before it is considered part of this node's view of the DAG.
//!
//! Steps, gated end to end by the [`MessageAddingPermit`](super::permit::MessageAddingPermit)
//! so no two messages are ever mid-pipeline at once:
//!
//! 1. structural validation — parents non-empty unless Genesis, no
//!    duplicate parents, j_rank/main_rank present.
//! 2. signature verification.
//! 3. dependency check — every parent and justification target must
//!    already be in the DAG, or the message is parked in
//!    [`super::orphans::Orphans`] and the pipeline stops here.
//! 4. rank recomputation — claimed `j_rank`/`main_rank` must match what
//!    the DAG would compute from the (now known-present) parents and
//!    justifications.
//! 5. equivocation check — tip-cardinality via [`super::dag::InMemoryDag::insert`],
//!    then justification-visibility via [`EquivocationDetector`](super::equivocation::EquivocationDetector).
//! 6. execution — block messages hand their deploys to the
//!    [`ExecutionEngine`] collaborator; ballots skip this step.
//! 7. insertion — the message is filed into the DAG and its swimlane. Any
//!    orphan waiting on it is pulled back out of [`super::orphans::Orphans`]
//!    and fed through this same numbered sequence, not inserted directly —
//!    an orphan is just a message whose dependency arrived late, and it
//!    earns no shortcut around validation, rank checks or execution once
//!    that dependency shows up.
//! 8. finality detection — for every direct child of the current
//!    last-finalized block, build a voting matrix and check whether its
//!    committee has reached quorum (§4.4: a separate matrix per direct
//!    child of L, not a single matrix seeded from the GHOST fork-choice
//!    tip); newly finalized blocks and freshly orphaned branches are both
//!    reported.
//! 9. emission — the caller receives the full list of
//!    [`ExecutorEvent`]s produced by this message and everything it
//!    transitively released from the orphan pool.

use {
  super::{
    dag::{DagView, FinalityStatus, InMemoryDag, InsertOutcome},
    equivocation::EquivocationDetector,
    finality::{FinalityDetector, FinalityOutcome},
    message::Message,
    orphans::Orphans,
    permit::MessageAddingPermit,
    validator::Validator,
  },
  crate::{
    errors::{ConsensusError, ConsensusResult},
    metrics::{Metrics, TracingMetrics},
    primitives::Hash,
  },
  async_trait::async_trait,
  std::sync::Mutex,
  tracing::{info, warn},
};

/// External collaborator that actually runs a block's deploys against
/// state and returns the resulting post-state hash. Kept as a trait so the
/// consensus core never depends on a specific virtual machine.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
  async fn execute(
    &self,
    pre_state_hash: Hash,
    deploys: &[Hash],
  ) -> Result<Hash, anyhow::Error>;
}

/// A no-op engine for classical-mode test fixtures and tooling that only
/// cares about DAG/finality semantics, not real execution.
pub struct NullExecutionEngine;

#[async_trait]
impl ExecutionEngine for NullExecutionEngine {
  async fn execute(
    &self,
    pre_state_hash: Hash,
    _deploys: &[Hash],
  ) -> Result<Hash, anyhow::Error> {
    Ok(pre_state_hash)
  }
}

#[derive(Debug, Clone)]
pub enum ExecutorEvent {
  Inserted(Hash),
  Orphaned(Hash),
  Equivocation { validator: crate::primitives::Pubkey, prior: Hash, new: Hash },
  /// The local validator key signed two equivocating messages. Per the
  /// spec this is fatal: the caller must terminate the process rather
  /// than continue operating with a corrupted local swimlane.
  SelfEquivocation { prior: Hash, new: Hash },
  Finalized { block: Hash, fault_tolerance: f64 },
  IndirectlyFinalized(Vec<Hash>),
  MarkedOrphan(Vec<Hash>),
}

pub struct MessageExecutor {
  dag: InMemoryDag,
  equivocation: Mutex<EquivocationDetector>,
  finality: FinalityDetector,
  engine: Box<dyn ExecutionEngine>,
  orphans: Mutex<Orphans>,
  permit: MessageAddingPermit,
  last_finalized: Mutex<Hash>,
  /// This node's own validator identity, if it produces messages. Used
  /// only to recognize the fatal case of self-equivocation; absent in
  /// listen-only nodes, which can observe any number of equivocations
  /// without ever hitting it.
  local_validator: Option<crate::primitives::Pubkey>,
  metrics: Box<dyn Metrics>,
}

impl MessageExecutor {
  pub fn new(
    relative_fault_tolerance: f64,
    engine: Box<dyn ExecutionEngine>,
    missing_after: std::time::Duration,
  ) -> Self {
    Self {
      dag: InMemoryDag::new(),
      equivocation: Mutex::new(EquivocationDetector::new()),
      finality: FinalityDetector::new(relative_fault_tolerance),
      engine,
      orphans: Mutex::new(Orphans::new(missing_after)),
      permit: MessageAddingPermit::new(),
      last_finalized: Mutex::new(Hash::ZERO),
      local_validator: None,
      metrics: Box::new(TracingMetrics),
    }
  }

  /// Marks `validator` as this node's own signing identity, enabling the
  /// self-equivocation fatal check in [`Self::execute`].
  pub fn with_local_validator(mut self, validator: crate::primitives::Pubkey) -> Self {
    self.local_validator = Some(validator);
    self
  }

  /// Swaps in a non-default metrics collaborator, e.g. a Prometheus
  /// exporter wired up by the binary crate.
  pub fn with_metrics(mut self, metrics: Box<dyn Metrics>) -> Self {
    self.metrics = metrics;
    self
  }

  pub fn dag(&self) -> &InMemoryDag {
    &self.dag
  }

  fn validate_structure(&self, message: &Message) -> ConsensusResult<()> {
    if !message.is_genesis() && message.header.parents.is_empty() {
      return Err(ConsensusError::validation("non-genesis message has no parents"));
    }
    let mut seen = std::collections::HashSet::new();
    for parent in &message.header.parents {
      if !seen.insert(*parent) {
        return Err(ConsensusError::validation("duplicate parent in message"));
      }
    }
    Ok(())
  }

  fn dependencies_present(&self, message: &Message) -> bool {
    message.header.parents.iter().all(|p| self.dag.contains(p))
      && message
        .header
        .justifications
        .iter()
        .all(|j| self.dag.contains(&j.latest_message))
  }

  /// Runs a message, and every orphan it transitively unblocks, through
  /// the full pipeline. Must be called with exclusive access to the
  /// executor (the caller holds the message-adding permit) for the
  /// duration of the call.
  pub async fn execute(
    &self,
    message: Message,
    validators: &[Validator],
  ) -> ConsensusResult<Vec<ExecutorEvent>> {
    let _permit = self.permit.acquire().await;
    let mut events = Vec::new();
    let mut queue: std::collections::VecDeque<Message> = std::collections::VecDeque::new();
    queue.push_back(message);

    while let Some(next) = queue.pop_front() {
      self.process_one(next, validators, &mut events, &mut queue).await?;
      if matches!(events.last(), Some(ExecutorEvent::SelfEquivocation { .. })) {
        break;
      }
    }

    Ok(events)
  }

  /// Steps 1–8 of the module doc for a single message. Appends any orphan
  /// this message's insertion releases onto `queue` instead of recursing,
  /// so a long chain of previously-parked messages replays iteratively.
  async fn process_one(
    &self,
    message: Message,
    validators: &[Validator],
    events: &mut Vec<ExecutorEvent>,
    queue: &mut std::collections::VecDeque<Message>,
  ) -> ConsensusResult<()> {
    // 1. structural validation
    self.validate_structure(&message)?;

    // 2. signature verification
    message
      .verify_signature()
      .map_err(|e| ConsensusError::validation(format!("bad signature: {e}")))?;

    // 3. dependency check
    if !message.is_genesis() && !self.dependencies_present(&message) {
      let hash = message.hash();
      self.orphans.lock().unwrap().add(message);
      events.push(ExecutorEvent::Orphaned(hash));
      self.metrics.orphan_parked();
      return Ok(());
    }

    // 4. rank recomputation
    if !message.is_genesis() {
      let (j_rank, main_rank) =
        self.dag.compute_ranks(&message.header.parents, &message.header.justifications);
      if j_rank != message.header.j_rank || main_rank != message.header.main_rank {
        return Err(ConsensusError::validation(
          "claimed rank does not match recomputed rank",
        ));
      }
    }

    // 6. execution, ahead of insertion so a failing deploy never pollutes
    //    the DAG with a half-applied block.
    if let Some(body) = message.block_body() {
      let pre_state = message
        .main_parent()
        .and_then(|h| self.dag.lookup(&h))
        .and_then(|m| m.block_body().map(|b| b.post_state_hash))
        .unwrap_or(Hash::ZERO);
      let post_state = self
        .engine
        .execute(pre_state, &body.deploys)
        .await
        .map_err(ConsensusError::Transient)?;
      if post_state != body.post_state_hash {
        return Err(ConsensusError::validation(
          "claimed post-state hash does not match execution result",
        ));
      }
    }

    // 5. equivocation check + 7. insertion
    let hash = message.hash();
    let validator = message.header.validator_id;
    let is_genesis = message.is_genesis();
    match self.dag.insert(message) {
      InsertOutcome::Inserted => {
        events.push(ExecutorEvent::Inserted(hash));
        self.metrics.message_inserted();
        // Genesis has no parents, so it can never be reached by
        // descending from a sentinel hash; seed the last-finalized
        // pointer with it directly so fork choice has a real root to
        // walk from.
        if is_genesis {
          let mut last_finalized = self.last_finalized.lock().unwrap();
          if last_finalized.is_zero() {
            *last_finalized = hash;
          }
        }
        if let Some(released) = self.orphans.lock().unwrap().release(&hash) {
          queue.extend(released);
        }
        self.run_finality(validators, events);
      }
      InsertOutcome::Equivocation { prior } => {
        self.equivocation.lock().unwrap().record(validator, prior, hash);
        if self.local_validator == Some(validator) {
          events.push(ExecutorEvent::SelfEquivocation { prior, new: hash });
          return Ok(());
        }
        events.push(ExecutorEvent::Equivocation { validator, prior, new: hash });
        self.metrics.equivocation_detected();
        warn!(validator = %validator, "equivocation detected");
      }
    }

    Ok(())
  }

  /// Step 8: checks every direct child of the last-finalized block L as
  /// its own finality candidate (§4.4 keeps one voting matrix per direct
  /// child of L, not one seeded from the GHOST fork-choice tip — a
  /// candidate several blocks past L can only be reached by first
  /// committing the direct child in between). At most one candidate can
  /// reach quorum at a time, since two committees both holding a strict
  /// majority of stake is impossible; the first (and only) match wins and
  /// the rest are left for the next call once the DAG has grown further.
  fn run_finality(&self, validators: &[Validator], events: &mut Vec<ExecutorEvent>) {
    let fork_choice = super::fork_choice::ForkChoice::new(validators);
    let last_finalized = *self.last_finalized.lock().unwrap();
    let head = fork_choice.find_main_parent(&self.dag, last_finalized);
    if head == last_finalized {
      return;
    }

    for candidate in self.dag.children(&last_finalized) {
      let FinalityOutcome::Finalized { fault_tolerance, .. } =
        self.finality.check(&self.dag, candidate, validators)
      else {
        continue;
      };

      let indirect = FinalityDetector::indirect_ancestors(&self.dag, candidate, last_finalized);
      for &ancestor in &indirect {
        self.dag.set_finality_status(ancestor, FinalityStatus::FinalizedIndirectly);
      }
      if !indirect.is_empty() {
        events.push(ExecutorEvent::IndirectlyFinalized(indirect.clone()));
      }
      let orphaned = FinalityDetector::mark_orphans(&self.dag, last_finalized, &{
        let mut chain = indirect;
        chain.push(candidate);
        chain
      });
      if !orphaned.is_empty() {
        for &orphan in &orphaned {
          self.dag.set_finality_status(orphan, FinalityStatus::Orphaned);
        }
        self.metrics.orphan_pruned(orphaned.len());
        events.push(ExecutorEvent::MarkedOrphan(orphaned));
      }
      self.dag.set_finality_status(candidate, FinalityStatus::FinalizedDirectly);
      *self.last_finalized.lock().unwrap() = candidate;
      info!(block = %candidate, fault_tolerance, "block finalized");
      self.metrics.block_finalized(fault_tolerance);
      events.push(ExecutorEvent::Finalized { block: candidate, fault_tolerance });
      return;
    }
  }

  pub fn last_finalized(&self) -> Hash {
    *self.last_finalized.lock().unwrap()
  }
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    crate::{consensus::message::MessageBody, primitives::Keypair},
    ed25519_dalek::SecretKey,
    std::collections::BTreeSet,
  };

  fn kp(seed: u8) -> Keypair {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    let secret = SecretKey::from_bytes(&bytes).unwrap();
    let public: ed25519_dalek::PublicKey = (&secret).into();
    ed25519_dalek::Keypair { secret, public }.into()
  }

  fn genesis(author: &Keypair) -> Message {
    Message::sign(
      author,
      0,
      Hash::ZERO,
      vec![],
      BTreeSet::new(),
      0,
      0,
      Hash::ZERO,
      0,
      0,
      MessageBody::Ballot,
    )
  }

  fn ballot_on(
    dag: &InMemoryDag,
    author: &Keypair,
    seq: u64,
    parent: Hash,
    nonce: i64,
  ) -> Message {
    let parents = vec![parent];
    let (j_rank, main_rank) = dag.compute_ranks(&parents, &BTreeSet::new());
    Message::sign(
      author,
      seq,
      Hash::ZERO,
      parents,
      BTreeSet::new(),
      j_rank,
      main_rank,
      Hash::ZERO,
      0,
      nonce,
      MessageBody::Ballot,
    )
  }

  /// A validator signing two messages at the same sequence number is
  /// reported as an equivocator, without taking down the node.
  #[tokio::test]
  async fn equivocating_message_is_reported_not_fatal() {
    let executor =
      MessageExecutor::new(0.0, Box::new(NullExecutionEngine), std::time::Duration::from_secs(5));
    let genesis_author = kp(9);
    let v1 = kp(1);
    let validators = vec![Validator::new(v1.public(), 100)];

    let g = genesis(&genesis_author);
    executor.execute(g.clone(), &validators).await.unwrap();

    let a = ballot_on(executor.dag(), &v1, 0, g.hash(), 1);
    let events = executor.execute(a.clone(), &validators).await.unwrap();
    assert!(matches!(events[0], ExecutorEvent::Inserted(_)));

    let b = ballot_on(executor.dag(), &v1, 0, g.hash(), 2);
    let events = executor.execute(b, &validators).await.unwrap();
    assert!(events.iter().any(|e| matches!(
      e,
      ExecutorEvent::Equivocation { validator, .. } if *validator == v1.public()
    )));
  }

  /// When the *local* validator key is the one that equivocated, the
  /// executor reports it as a distinct, fatal event instead of the
  /// ordinary equivocation event a remote validator's fork produces.
  #[tokio::test]
  async fn local_validator_equivocation_is_reported_as_fatal() {
    let v1 = kp(1);
    let executor = MessageExecutor::new(
      0.0,
      Box::new(NullExecutionEngine),
      std::time::Duration::from_secs(5),
    )
    .with_local_validator(v1.public());
    let genesis_author = kp(9);
    let validators = vec![Validator::new(v1.public(), 100)];

    let g = genesis(&genesis_author);
    executor.execute(g.clone(), &validators).await.unwrap();

    let a = ballot_on(executor.dag(), &v1, 0, g.hash(), 1);
    executor.execute(a, &validators).await.unwrap();

    let b = ballot_on(executor.dag(), &v1, 0, g.hash(), 2);
    let events = executor.execute(b, &validators).await.unwrap();
    assert!(matches!(events[0], ExecutorEvent::SelfEquivocation { .. }));
  }

  /// A single bonded validator is its own one-validator quorum: once it
  /// has produced a message beyond genesis, that message finalizes
  /// immediately (mirrors `finality::tests::no_votes_never_finalizes`,
  /// exercised here through the full executor pipeline instead of the
  /// detector directly).
  #[tokio::test]
  async fn sole_validator_message_finalizes_through_executor() {
    let executor = MessageExecutor::new(
      0.0,
      Box::new(NullExecutionEngine),
      std::time::Duration::from_secs(5),
    );
    let genesis_author = kp(9);
    let v1 = kp(1);
    let validators = vec![Validator::new(v1.public(), 100)];

    let g = genesis(&genesis_author);
    executor.execute(g.clone(), &validators).await.unwrap();

    let b1 = ballot_on(executor.dag(), &v1, 0, g.hash(), 1);
    let events = executor.execute(b1.clone(), &validators).await.unwrap();
    assert!(events
      .iter()
      .any(|e| matches!(e, ExecutorEvent::Finalized { .. })));
    assert_eq!(executor.last_finalized(), b1.hash());
    assert_eq!(executor.dag().finality_status(&g.hash()), FinalityStatus::FinalizedDirectly);
    assert_eq!(executor.dag().finality_status(&b1.hash()), FinalityStatus::FinalizedDirectly);
  }

  /// A block that never gets finalized or orphaned stays `Undecided`
  /// forever, matching the lifecycle in the data model: terminal states
  /// are reached, never assumed by default.
  #[tokio::test]
  async fn unreferenced_message_stays_undecided() {
    let executor = MessageExecutor::new(
      0.0,
      Box::new(NullExecutionEngine),
      std::time::Duration::from_secs(5),
    );
    let genesis_author = kp(9);
    let g = genesis(&genesis_author);
    executor.execute(g.clone(), &[]).await.unwrap();
    assert_eq!(executor.dag().finality_status(&g.hash()), FinalityStatus::Undecided);
  }

  /// Reproduces the spec's two-validator agreement scenario through the
  /// real executor pipeline end to end (genesis, two competing direct
  /// children of genesis, a chain built on top of one of them) rather
  /// than by handing `FinalityDetector::check` a hand-picked candidate:
  /// V1 builds b1 on G; V2 builds b2 on G; V1 builds b3 on b1, justifying
  /// b2; V2 builds b4 on b3; V1 builds b5 on b4. b1 — the direct child of
  /// G that the rest of the chain actually builds on — finalizes, while
  /// b2, the competing direct child nobody extended, is orphaned.
  #[tokio::test]
  async fn two_validator_agreement_finalizes_through_the_real_pipeline() {
    let executor = MessageExecutor::new(
      0.0,
      Box::new(NullExecutionEngine),
      std::time::Duration::from_secs(5),
    );
    let genesis_author = kp(9);
    let v1 = kp(1);
    let v2 = kp(2);
    let validators =
      vec![Validator::new(v1.public(), 10), Validator::new(v2.public(), 10)];

    let g = genesis(&genesis_author);
    executor.execute(g.clone(), &validators).await.unwrap();

    let b1 = ballot_on(executor.dag(), &v1, 0, g.hash(), 1);
    executor.execute(b1.clone(), &validators).await.unwrap();

    let b2 = ballot_on(executor.dag(), &v2, 0, g.hash(), 2);
    executor.execute(b2.clone(), &validators).await.unwrap();

    let b3 = {
      let parents = vec![b1.hash()];
      let mut justifications = std::collections::BTreeSet::new();
      justifications.insert(crate::consensus::message::Justification {
        validator: v2.public(),
        latest_message: b2.hash(),
      });
      let (j_rank, main_rank) = executor.dag().compute_ranks(&parents, &justifications);
      Message::sign(
        &v1, 1, b1.hash(), parents, justifications, j_rank, main_rank, Hash::ZERO, 0, 3,
        MessageBody::Ballot,
      )
    };
    executor.execute(b3.clone(), &validators).await.unwrap();

    let b4 = ballot_on(executor.dag(), &v2, 1, b3.hash(), 4);
    executor.execute(b4.clone(), &validators).await.unwrap();

    let b5 = ballot_on(executor.dag(), &v1, 2, b4.hash(), 5);
    let events = executor.execute(b5.clone(), &validators).await.unwrap();

    assert!(events.iter().any(
      |e| matches!(e, ExecutorEvent::Finalized { block, .. } if *block == b1.hash())
    ));
    assert_eq!(executor.last_finalized(), b1.hash());
    assert!(events.iter().any(
      |e| matches!(e, ExecutorEvent::MarkedOrphan(orphans) if orphans.contains(&b2.hash()))
    ));
    assert_eq!(executor.dag().finality_status(&b2.hash()), FinalityStatus::Orphaned);
  }

  /// Before the orphan-release fix, a message released from the orphan
  /// pool was filed straight into the DAG with `self.dag.insert`,
  /// skipping the rank-recomputation check every freshly-arrived message
  /// goes through. Once released orphans replay through the same
  /// pipeline, a bad claimed rank is caught no matter which order its
  /// dependency and itself arrive in.
  #[tokio::test]
  async fn released_orphan_is_revalidated_not_inserted_blindly() {
    let executor = MessageExecutor::new(
      0.0,
      Box::new(NullExecutionEngine),
      std::time::Duration::from_secs(5),
    );
    let genesis_author = kp(9);
    let v1 = kp(1);
    let validators = vec![Validator::new(v1.public(), 100)];

    let g = genesis(&genesis_author);
    executor.execute(g.clone(), &validators).await.unwrap();

    // Built against a scratch DAG that already has `p`, the way the real
    // author's local view would have looked; `p` itself never reaches
    // this executor until after `bad`.
    let scratch = InMemoryDag::new();
    scratch.insert(g.clone());
    let p = ballot_on(&scratch, &v1, 0, g.hash(), 1);
    scratch.insert(p.clone());

    let bad = Message::sign(
      &v1,
      1,
      p.hash(),
      vec![p.hash()],
      std::collections::BTreeSet::new(),
      999,
      999,
      Hash::ZERO,
      0,
      2,
      MessageBody::Ballot,
    );

    let events = executor.execute(bad.clone(), &validators).await.unwrap();
    assert!(matches!(events[0], ExecutorEvent::Orphaned(_)));

    let result = executor.execute(p.clone(), &validators).await;
    assert!(
      result.is_err(),
      "a released orphan with a claimed rank that doesn't match the DAG must fail validation"
    );
  }
}
