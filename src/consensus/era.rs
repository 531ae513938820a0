//! A single highway era: a fixed validator set, leader schedule seed and
//! window of the chain over which they apply, plus the bookkeeping that
//! only matters while the era is still live — candidates waiting on
//! dependencies, and validators accused or already slashed for
//! equivocating.

use {
  super::{message::Message, validator::Validator},
  crate::primitives::{Hash, Pubkey},
  std::collections::{BTreeMap, HashSet},
};

/// Identifies an era by the hash of its key block: the block, within the
/// booking window of the era before, whose descendant at the end of the
/// entropy window fixes this era's leader-schedule seed.
pub type EraId = Hash;

/// A proposed block still waiting on one or more dependencies — unresolved
/// accusations against the validators it cites as equivocators, or pending
/// deploy execution — before it can be added to the era's DAG view.
pub struct PendingCandidate {
  pub message: Message,
  pub missing_evidence: Vec<Pubkey>,
  pub executed: bool,
}

impl PendingCandidate {
  fn new(message: Message, missing_evidence: Vec<Pubkey>) -> Self {
    Self { message, missing_evidence, executed: false }
  }

  fn is_complete(&self) -> bool {
    self.executed && self.missing_evidence.is_empty()
  }
}

pub struct Era {
  pub id: EraId,
  pub start_height: u64,
  pub seed: [u8; 32],
  pub validators: BTreeMap<Pubkey, u128>,

  candidates: Vec<PendingCandidate>,

  /// Validators slashed for equivocating during this era specifically.
  pub newly_slashed: Vec<Pubkey>,
  /// Every validator slashed in this era or any era still within the
  /// bonded-eras window, carried forward era to era.
  pub slashed: HashSet<Pubkey>,
  /// Accusations raised by finalized blocks in this era, pending evidence.
  accusations: HashSet<Pubkey>,
}

impl Era {
  pub fn new(
    id: EraId,
    start_height: u64,
    seed: [u8; 32],
    validators: BTreeMap<Pubkey, u128>,
    newly_slashed: Vec<Pubkey>,
    slashed: HashSet<Pubkey>,
  ) -> Self {
    Self {
      id,
      start_height,
      seed,
      validators,
      candidates: Vec::new(),
      newly_slashed,
      slashed,
      accusations: HashSet::new(),
    }
  }

  pub fn validator_list(&self) -> Vec<Validator> {
    self
      .validators
      .iter()
      .map(|(pubkey, stake)| Validator::new(*pubkey, *stake))
      .collect()
  }

  pub fn add_candidate(&mut self, message: Message, missing_evidence: Vec<Pubkey>) {
    self.candidates.push(PendingCandidate::new(message, missing_evidence));
  }

  /// Evidence against `validator` has arrived; clears that dependency from
  /// every pending candidate and returns the ones now fully resolved.
  pub fn resolve_evidence(&mut self, validator: &Pubkey) -> Vec<Message> {
    for pc in &mut self.candidates {
      pc.missing_evidence.retain(|pk| pk != validator);
    }
    self.remove_complete_candidates()
  }

  /// The deploys of `hash` finished executing; marks the matching
  /// candidate (if still pending) as ready and returns newly resolved
  /// candidates.
  pub fn resolve_execution(&mut self, hash: Hash) -> Vec<Message> {
    for pc in &mut self.candidates {
      if pc.message.hash() == hash {
        pc.executed = true;
      }
    }
    self.remove_complete_candidates()
  }

  fn remove_complete_candidates(&mut self) -> Vec<Message> {
    let (complete, rest): (Vec<_>, Vec<_>) =
      self.candidates.drain(..).partition(PendingCandidate::is_complete);
    self.candidates = rest;
    complete.into_iter().map(|pc| pc.message).collect()
  }

  pub fn add_accusations(&mut self, accused: &[Pubkey]) {
    for pubkey in accused {
      if !self.slashed.contains(pubkey) {
        self.accusations.insert(*pubkey);
      }
    }
  }

  pub fn accusations(&self) -> Vec<Pubkey> {
    let mut out: Vec<Pubkey> = self.accusations.iter().copied().collect();
    out.sort();
    out
  }

  pub fn total_weight(&self) -> u128 {
    self.validators.values().sum()
  }
}
