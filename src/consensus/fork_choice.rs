//! GHOST fork choice: picks the main parent for a new message by
//! recursively descending into the child with the greatest weight of
//! honest (non-equivocating) latest messages in its subtree, then fills in
//! secondary parents from every other tip so the new message merges as
//! much of the known DAG as possible.

use {
  super::{dag::DagView, validator::Validator},
  crate::primitives::{Hash, Pubkey},
  std::collections::{HashMap, HashSet},
};

pub struct ForkChoice<'a> {
  validators: &'a [Validator],
}

impl<'a> ForkChoice<'a> {
  pub fn new(validators: &'a [Validator]) -> Self {
    Self { validators }
  }

  /// Weight of stake voting, directly or transitively, for `block`: the
  /// stake of every validator whose latest honest message has `block` as
  /// an ancestor.
  fn subtree_weight<D: DagView>(
    &self,
    dag: &D,
    block: &Hash,
    equivocators: &HashSet<Pubkey>,
  ) -> u128 {
    let descendants = self.reachable_from(dag, block);
    self
      .validators
      .iter()
      .filter(|v| !equivocators.contains(&v.pubkey))
      .filter(|v| {
        dag
          .latest_messages(&v.pubkey)
          .iter()
          .any(|h| descendants.contains(h) || h == block)
      })
      .map(|v| v.stake)
      .sum()
  }

  /// All messages reachable from `block` by following the structural
  /// DAG downward (children), used to decide whether a validator's latest
  /// message counts as a vote for `block`.
  fn reachable_from<D: DagView>(&self, dag: &D, block: &Hash) -> HashSet<Hash> {
    let mut seen = HashSet::new();
    let mut queue = vec![*block];
    while let Some(hash) = queue.pop() {
      for child in dag.children(&hash) {
        if seen.insert(child) {
          queue.push(child);
        }
      }
    }
    seen
  }

  /// Descends from `from` picking, at each step, the child subtree with
  /// the greatest honest weight; ties break on the lexicographically
  /// smallest child hash so that every honest validator computes the
  /// identical result.
  ///
  /// `from` doubles as a sentinel: the zero hash means "no known parent of
  /// my own to descend from", used when a validator produces its very
  /// first message into an already non-empty DAG. In that case the
  /// descent starts from the DAG's own root set ([`DagView::roots`])
  /// rather than from a hash nothing in the DAG actually cites, so the
  /// result is still the real heaviest tip instead of the sentinel itself.
  pub fn find_main_parent<D: DagView>(&self, dag: &D, from: Hash) -> Hash {
    let equivocators = dag.equivocators();
    let mut current = from;
    loop {
      let children = if current.is_zero() { dag.roots() } else { dag.children(&current) };
      if children.is_empty() {
        return current;
      }
      let mut best: Option<(Hash, u128)> = None;
      for child in children {
        let weight = self.subtree_weight(dag, &child, &equivocators);
        best = Some(match best {
          None => (child, weight),
          Some((best_hash, best_weight)) => {
            if weight > best_weight
              || (weight == best_weight && child < best_hash)
            {
              (child, weight)
            } else {
              (best_hash, best_weight)
            }
          }
        });
      }
      match best {
        Some((child, _)) => current = child,
        None => return current,
      }
    }
  }

  /// Secondary parents: every other validator's current tip not already
  /// an ancestor of the chosen main parent, so the new message merges the
  /// widest possible view of the DAG. Capped implicitly by the number of
  /// validators; order is deterministic (by validator pubkey) so replays
  /// produce byte-identical messages.
  pub fn find_secondary_parents<D: DagView>(
    &self,
    dag: &D,
    main_parent: Hash,
  ) -> Vec<Hash> {
    let ancestors = self.ancestors_of(dag, &main_parent);
    let mut tips: Vec<Hash> = self
      .validators
      .iter()
      .flat_map(|v| dag.latest_messages(&v.pubkey))
      .filter(|h| *h != main_parent && !ancestors.contains(h))
      .collect();
    tips.sort();
    tips.dedup();
    tips
  }

  fn ancestors_of<D: DagView>(&self, dag: &D, from: &Hash) -> HashSet<Hash> {
    let mut seen = HashSet::new();
    let mut queue = vec![*from];
    while let Some(hash) = queue.pop() {
      if !seen.insert(hash) {
        continue;
      }
      if let Some(message) = dag.lookup(&hash) {
        for parent in &message.header.parents {
          queue.push(*parent);
        }
      }
    }
    seen
  }

  /// Builds the full parent list for a new message: main parent first,
  /// secondary parents following.
  pub fn find_parents<D: DagView>(&self, dag: &D, from: Hash) -> Vec<Hash> {
    let main = self.find_main_parent(dag, from);
    let mut parents = vec![main];
    parents.extend(self.find_secondary_parents(dag, main));
    parents
  }

  /// Weighted vote tally grouped by immediate child of `from`, exposed for
  /// diagnostics/metrics.
  pub fn child_weights<D: DagView>(
    &self,
    dag: &D,
    from: &Hash,
  ) -> HashMap<Hash, u128> {
    let equivocators = dag.equivocators();
    dag
      .children(from)
      .into_iter()
      .map(|child| {
        let w = self.subtree_weight(dag, &child, &equivocators);
        (child, w)
      })
      .collect()
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

  fn ballot(
    kp: &crate::primitives::Keypair,
    seq: u64,
    parent: Hash,
    nonce: i64,
  ) -> Message {
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
      nonce,
      MessageBody::Ballot,
    )
  }

  #[test]
  fn picks_heavier_subtree() {
    let dag = InMemoryDag::new();
    let heavy = kp(1);
    let light = kp(2);
    let validators = vec![
      Validator::new(heavy.public(), 90),
      Validator::new(light.public(), 10),
    ];

    let genesis = ballot(&heavy, 0, Hash::ZERO, 0);
    dag.insert(genesis.clone());

    let branch_a = ballot(&heavy, 1, genesis.hash(), 1);
    let branch_b = ballot(&light, 0, genesis.hash(), 2);
    dag.insert(branch_a.clone());
    dag.insert(branch_b.clone());

    let fc = ForkChoice::new(&validators);
    let chosen = fc.find_main_parent(&dag, genesis.hash());
    assert_eq!(chosen, branch_a.hash());
  }

  /// Descending from the zero sentinel (no message of my own to start
  /// from yet) must resolve through the DAG's root set, not return the
  /// sentinel itself.
  #[test]
  fn zero_sentinel_resolves_through_roots() {
    let dag = InMemoryDag::new();
    let v1 = kp(1);
    let validators = vec![Validator::new(v1.public(), 100)];

    let genesis = ballot(&v1, 0, Hash::ZERO, 0);
    dag.insert(genesis.clone());

    let fc = ForkChoice::new(&validators);
    let chosen = fc.find_main_parent(&dag, Hash::ZERO);
    assert_eq!(chosen, genesis.hash());
  }
}
