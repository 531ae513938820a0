//! The block-DAG itself: storage, indexing and the handful of read-only
//! traversal queries every other consensus module builds on.

use {
  super::{
    message::{Justification, Message},
    swimlane::SwimlaneIndex,
  },
  crate::primitives::{Hash, Pubkey},
  dashmap::{DashMap, DashSet},
  std::collections::{BTreeSet, HashSet, VecDeque},
};

/// A block's position in the finality lifecycle. Every message starts
/// `Undecided` and transitions to exactly one terminal state; ballots never
/// leave `Undecided` since only blocks are finalized or orphaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinalityStatus {
  Undecided,
  FinalizedDirectly,
  FinalizedIndirectly,
  Orphaned,
}

/// Read access to the DAG, implemented here by [`InMemoryDag`] and backed
/// by [`crate::storage::BlockStorage`] for anything that outlives a
/// process. Kept as a trait so the finality detector and fork choice can
/// be exercised in tests against a small hand-built DAG instead of the
/// concurrent default.
pub trait DagView {
  fn lookup(&self, hash: &Hash) -> Option<Message>;
  fn contains(&self, hash: &Hash) -> bool;
  fn children(&self, hash: &Hash) -> Vec<Hash>;
  /// The validator's current set of latest messages: size 1 normally,
  /// size ≥2 if the validator has equivocated and none of the resulting
  /// forks dominates (i.e. the validator hasn't since built past the
  /// point where it forked).
  fn latest_messages(&self, validator: &Pubkey) -> Vec<Hash>;
  fn validators(&self) -> Vec<Pubkey>;
  fn equivocators(&self) -> HashSet<Pubkey>;
  fn finality_status(&self, hash: &Hash) -> FinalityStatus;
  /// Every message currently stored with an empty parent list. Normally a
  /// single Genesis, but fork choice treats the whole set as the DAG's
  /// virtual origin so a validator producing its very first message (and
  /// therefore citing no message of its own to descend fork choice from)
  /// still finds the real heaviest tip instead of an empty sentinel hash.
  fn roots(&self) -> Vec<Hash>;
  /// Every message with `j_rank` in `[start_rank, end_rank)`, in j-rank
  /// order (ties broken by hash for determinism).
  fn topo_sort(&self, start_rank: u64, end_rank: u64) -> Vec<Message>;
  /// Scoped equivalent of [`Self::latest_messages`]: the validator's
  /// latest messages whose `era_id` is `era`, ignoring any message it has
  /// produced in a different era.
  fn latest_in_era(&self, era: &Hash, validator: &Pubkey) -> Vec<Hash>;
  /// Validators who signed two distinct messages at the same
  /// `validator_msg_seq_num` within `era`. A subset of [`Self::equivocators`]
  /// scoped to a single era, used by era bookkeeping that must not let a
  /// fault committed in era N disqualify a validator's bond in era N+1.
  fn equivocators_in_era(&self, era: &Hash) -> HashSet<Pubkey>;
}

/// The default, process-local DAG store. Indexes are `dashmap`-backed so
/// concurrent readers (fork choice, the finality detector, RPC queries)
/// never block on each other or on the single writer serialized behind
/// the message-adding permit.
#[derive(Debug, Default)]
pub struct InMemoryDag {
  messages: DashMap<Hash, Message>,
  children: DashMap<Hash, Vec<Hash>>,
  swimlanes: SwimlaneIndex,
  equivocators: DashSet<Pubkey>,
  finality: DashMap<Hash, FinalityStatus>,
  roots: DashSet<Hash>,
}

/// Returned by [`InMemoryDag::insert`] so the executor can react to a
/// freshly detected equivocation without re-deriving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
  Inserted,
  /// The validator already has a different message at this sequence
  /// number; `hash` is the prior message's hash.
  Equivocation { prior: Hash },
}

impl InMemoryDag {
  pub fn new() -> Self {
    Self::default()
  }

  /// Files a validated message into the DAG. The tip-cardinality check —
  /// does this validator already have a message at this seq_num — is the
  /// cheap half of equivocation detection and lives here, at the single
  /// point where messages are actually filed; the expensive half (was an
  /// equivocating validator's message visible in my justification set)
  /// lives in [`super::equivocation::EquivocationDetector`].
  ///
  /// An equivocating message is still structurally filed (messages index,
  /// children index, swimlane fork set) rather than discarded: per §4.1 a
  /// validator's "latest message" is the *set* of its undominated tips,
  /// which only makes sense if both forks remain lookup-able.
  pub fn insert(&self, message: Message) -> InsertOutcome {
    let hash = message.hash();
    let validator = message.header.validator_id;
    let seq_num = message.header.validator_msg_seq_num;

    let outcome = match self.swimlanes.at(&validator, seq_num) {
      Some(prior) if prior != hash => {
        self.equivocators.insert(validator);
        InsertOutcome::Equivocation { prior }
      }
      _ => InsertOutcome::Inserted,
    };

    if !self.messages.contains_key(&hash) {
      if message.header.parents.is_empty() {
        self.roots.insert(hash);
      }
      for parent in &message.header.parents {
        self.children.entry(*parent).or_default().push(hash);
      }
      self.swimlanes.record(validator, seq_num, hash);
      self.messages.insert(hash, message);
    }

    outcome
  }

  pub fn justifications_of(&self, hash: &Hash) -> BTreeSet<Justification> {
    self
      .lookup(hash)
      .map(|m| m.header.justifications)
      .unwrap_or_default()
  }

  /// Breadth-first walk of the j-DAG (parents and justifications) from
  /// `from`, stopping at nodes whose `j_rank` is below `min_rank`. This is
  /// the bounded j-past-cone traversal used by equivocation detection to
  /// decide whether an equivocating validator's fork was visible to a
  /// later message, and by the finality detector's panorama update.
  pub fn j_past_cone(&self, from: &Hash, min_rank: u64) -> HashSet<Hash> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(*from);
    while let Some(hash) = queue.pop_front() {
      if !seen.insert(hash) {
        continue;
      }
      let Some(message) = self.lookup(&hash) else { continue };
      if message.header.j_rank < min_rank {
        continue;
      }
      for parent in &message.header.parents {
        queue.push_back(*parent);
      }
      for j in &message.header.justifications {
        queue.push_back(j.latest_message);
      }
    }
    seen
  }

  /// `j_rank = 1 + max(j_rank over parents ∪ justifications)`, 0 for
  /// Genesis. `main_rank = 1 + main_rank(main_parent)`, 0 for Genesis.
  pub fn compute_ranks(
    &self,
    parents: &[Hash],
    justifications: &BTreeSet<Justification>,
  ) -> (u64, u64) {
    let j_rank = parents
      .iter()
      .chain(justifications.iter().map(|j| &j.latest_message))
      .filter_map(|h| self.lookup(h))
      .map(|m| m.header.j_rank)
      .max()
      .map(|r| r + 1)
      .unwrap_or(0);

    let main_rank = parents
      .first()
      .and_then(|h| self.lookup(h))
      .map(|m| m.header.main_rank + 1)
      .unwrap_or(0);

    (j_rank, main_rank)
  }

  /// Moves `hash` into a terminal finality state. Finalization is
  /// monotonic (Testable Property 2): once a hash has a terminal status it
  /// must never be overwritten, so this is a no-op if one is already set.
  pub fn set_finality_status(&self, hash: Hash, status: FinalityStatus) {
    self.finality.entry(hash).or_insert(status);
  }
}

impl DagView for InMemoryDag {
  fn lookup(&self, hash: &Hash) -> Option<Message> {
    self.messages.get(hash).map(|r| r.clone())
  }

  fn contains(&self, hash: &Hash) -> bool {
    self.messages.contains_key(hash)
  }

  fn children(&self, hash: &Hash) -> Vec<Hash> {
    self.children.get(hash).map(|r| r.clone()).unwrap_or_default()
  }

  fn latest_messages(&self, validator: &Pubkey) -> Vec<Hash> {
    self.swimlanes.latest(validator)
  }

  fn validators(&self) -> Vec<Pubkey> {
    self.swimlanes.validators()
  }

  fn equivocators(&self) -> HashSet<Pubkey> {
    self.equivocators.iter().map(|r| *r).collect()
  }

  fn finality_status(&self, hash: &Hash) -> FinalityStatus {
    self.finality.get(hash).map(|r| *r).unwrap_or(FinalityStatus::Undecided)
  }

  fn roots(&self) -> Vec<Hash> {
    self.roots.iter().map(|r| *r).collect()
  }

  fn topo_sort(&self, start_rank: u64, end_rank: u64) -> Vec<Message> {
    let mut out: Vec<Message> = self
      .messages
      .iter()
      .map(|r| r.value().clone())
      .filter(|m| m.header.j_rank >= start_rank && m.header.j_rank < end_rank)
      .collect();
    out.sort_by(|a, b| {
      a.header
        .j_rank
        .cmp(&b.header.j_rank)
        .then_with(|| a.hash().cmp(&b.hash()))
    });
    out
  }

  fn latest_in_era(&self, era: &Hash, validator: &Pubkey) -> Vec<Hash> {
    let mut max_seq: Option<u64> = None;
    let mut hashes: Vec<Hash> = Vec::new();
    for entry in self.messages.iter() {
      let message = entry.value();
      if message.header.validator_id != *validator || message.header.era_id != *era {
        continue;
      }
      let seq = message.header.validator_msg_seq_num;
      match max_seq {
        Some(max) if seq > max => {
          max_seq = Some(seq);
          hashes = vec![*entry.key()];
        }
        Some(max) if seq == max => hashes.push(*entry.key()),
        None => {
          max_seq = Some(seq);
          hashes = vec![*entry.key()];
        }
        _ => {}
      }
    }
    hashes.sort();
    hashes
  }

  fn equivocators_in_era(&self, era: &Hash) -> HashSet<Pubkey> {
    let mut first_seen: std::collections::HashMap<(Pubkey, u64), Hash> =
      std::collections::HashMap::new();
    let mut out = HashSet::new();
    for entry in self.messages.iter() {
      let message = entry.value();
      if message.header.era_id != *era {
        continue;
      }
      let key = (message.header.validator_id, message.header.validator_msg_seq_num);
      match first_seen.get(&key) {
        Some(prior) if *prior != *entry.key() => {
          out.insert(message.header.validator_id);
        }
        None => {
          first_seen.insert(key, *entry.key());
        }
        _ => {}
      }
    }
    out
  }
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    crate::{
      consensus::message::MessageBody,
      primitives::Keypair,
    },
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

  fn ballot(kp: &Keypair, seq: u64, parent: Hash) -> Message {
    Message::sign(
      kp,
      seq,
      Hash::ZERO,
      if parent.is_zero() { vec![] } else { vec![parent] },
      BTreeSet::new(),
      seq,
      seq,
      Hash::ZERO,
      0,
      0,
      MessageBody::Ballot,
    )
  }

  #[test]
  fn detects_equivocation_on_same_seq_num() {
    let dag = InMemoryDag::new();
    let validator = kp(9);
    let genesis = ballot(&validator, 0, Hash::ZERO);
    assert_eq!(dag.insert(genesis.clone()), InsertOutcome::Inserted);

    let a = ballot(&validator, 1, genesis.hash());
    // distinct content (different timestamp), same (validator, seq_num)
    let b = Message::sign(
      &validator,
      1,
      Hash::ZERO,
      vec![genesis.hash()],
      BTreeSet::new(),
      1,
      1,
      Hash::ZERO,
      0,
      1,
      MessageBody::Ballot,
    );

    assert_eq!(dag.insert(a.clone()), InsertOutcome::Inserted);
    assert_eq!(
      dag.insert(b),
      InsertOutcome::Equivocation { prior: a.hash() }
    );
    assert!(dag.equivocators().contains(&validator.public()));
  }

  #[test]
  fn ranks_increase_along_parents() {
    let dag = InMemoryDag::new();
    let v = kp(1);
    let genesis = ballot(&v, 0, Hash::ZERO);
    dag.insert(genesis.clone());
    let (j, m) = dag.compute_ranks(&[genesis.hash()], &BTreeSet::new());
    assert_eq!(j, 1);
    assert_eq!(m, 1);
  }

  /// An equivocating message is still filed into the DAG's structural
  /// indexes, so both forks remain reachable tips rather than one of
  /// them silently vanishing.
  #[test]
  fn equivocating_message_remains_lookup_able_and_a_tip() {
    let dag = InMemoryDag::new();
    let validator = kp(10);
    let genesis = ballot(&validator, 0, Hash::ZERO);
    dag.insert(genesis.clone());

    let a = ballot(&validator, 1, genesis.hash());
    let b = Message::sign(
      &validator,
      1,
      Hash::ZERO,
      vec![genesis.hash()],
      BTreeSet::new(),
      1,
      1,
      Hash::ZERO,
      0,
      1,
      MessageBody::Ballot,
    );
    dag.insert(a.clone());
    assert_eq!(dag.insert(b.clone()), InsertOutcome::Equivocation { prior: a.hash() });

    assert!(dag.contains(&b.hash()));
    let mut tips = dag.latest_messages(&validator.public());
    tips.sort();
    let mut expected = vec![a.hash(), b.hash()];
    expected.sort();
    assert_eq!(tips, expected);
  }

  #[test]
  fn topo_sort_orders_by_j_rank_within_range() {
    let dag = InMemoryDag::new();
    let v = kp(11);
    let genesis = ballot(&v, 0, Hash::ZERO);
    dag.insert(genesis.clone());
    let b1 = ballot(&v, 1, genesis.hash());
    dag.insert(b1.clone());
    let b2 = ballot(&v, 2, b1.hash());
    dag.insert(b2.clone());

    let sorted = dag.topo_sort(1, 3);
    assert_eq!(sorted.iter().map(|m| m.hash()).collect::<Vec<_>>(), vec![b1.hash(), b2.hash()]);
  }

  #[test]
  fn latest_in_era_is_scoped_to_the_named_era() {
    let dag = InMemoryDag::new();
    let v = kp(12);
    let era_a = Hash::digest(b"era-a");
    let era_b = Hash::digest(b"era-b");

    let in_a = Message::sign(
      &v, 0, Hash::ZERO, vec![], BTreeSet::new(), 0, 0, era_a, 0, 0, MessageBody::Ballot,
    );
    dag.insert(in_a.clone());
    let in_b = Message::sign(
      &v,
      1,
      in_a.hash(),
      vec![in_a.hash()],
      BTreeSet::new(),
      1,
      1,
      era_b,
      0,
      0,
      MessageBody::Ballot,
    );
    dag.insert(in_b.clone());

    assert_eq!(dag.latest_in_era(&era_a, &v.public()), vec![in_a.hash()]);
    assert_eq!(dag.latest_in_era(&era_b, &v.public()), vec![in_b.hash()]);
  }

  #[test]
  fn equivocators_in_era_ignores_forks_in_other_eras() {
    let dag = InMemoryDag::new();
    let v = kp(13);
    let era_a = Hash::digest(b"era-a");
    let era_b = Hash::digest(b"era-b");

    let a1 = Message::sign(
      &v, 0, Hash::ZERO, vec![], BTreeSet::new(), 0, 0, era_a, 0, 0, MessageBody::Ballot,
    );
    let a2 = Message::sign(
      &v, 0, Hash::ZERO, vec![], BTreeSet::new(), 0, 0, era_a, 0, 1, MessageBody::Ballot,
    );
    dag.insert(a1);
    dag.insert(a2);

    assert!(dag.equivocators_in_era(&era_a).contains(&v.public()));
    assert!(dag.equivocators_in_era(&era_b).is_empty());
  }
}
