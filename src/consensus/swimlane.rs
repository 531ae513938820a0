//! Per-validator append-only message sequence, a.k.a. a swimlane.
//!
//! Every honest validator signs at most one message per sequence number.
//! Indexing messages by `(validator, seq_num)` is what makes equivocation
//! detection a lookup rather than a DAG walk: two distinct message hashes
//! filed under the same key are a direct proof of equivocation.

use {
  crate::primitives::{Hash, Pubkey},
  dashmap::DashMap,
};

#[derive(Debug, Default)]
pub struct SwimlaneIndex {
  /// (validator, seq_num) -> first message hash filed under that key. A
  /// `DashMap` rather than a nested map since validators and sequence
  /// numbers are both independently sharded across threads by the
  /// message-adding permit's callers (readers never block on a writer
  /// touching a different key). Only ever holds the first hash seen for a
  /// key — later, equivocating hashes are tracked in `forks` instead —
  /// so this alone answers the equivocation detector's O(1) "does this
  /// validator already have a message at this seq_num" check.
  by_seq: DashMap<(Pubkey, u64), Hash>,

  /// (validator, seq_num) -> every distinct hash filed under that key.
  /// Usually a single entry; more than one means the validator
  /// equivocated at that sequence number, and both forks remain tips
  /// until the validator's chain advances past them.
  forks: DashMap<(Pubkey, u64), Vec<Hash>>,

  /// validator -> highest seq_num filed so far, used to find the set of
  /// current tips in `forks` without scanning every sequence number.
  max_seq: DashMap<Pubkey, u64>,
}

impl SwimlaneIndex {
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the hash already filed for `(validator, seq_num)`, if any.
  /// A `Some` result for a *different* hash than the one about to be
  /// inserted is the equivocation signal.
  pub fn at(&self, validator: &Pubkey, seq_num: u64) -> Option<Hash> {
    self.by_seq.get(&(*validator, seq_num)).map(|r| *r)
  }

  /// Records a message in its author's swimlane. Safe to call for both
  /// the first message at a given `(validator, seq_num)` and for every
  /// equivocating one that follows it: `by_seq` keeps only the first,
  /// `forks` accumulates every distinct hash seen at that key.
  pub fn record(&self, validator: Pubkey, seq_num: u64, hash: Hash) {
    self.by_seq.entry((validator, seq_num)).or_insert(hash);

    let mut forks = self.forks.entry((validator, seq_num)).or_default();
    if !forks.contains(&hash) {
      forks.push(hash);
    }
    drop(forks);

    self
      .max_seq
      .entry(validator)
      .and_modify(|s| {
        if seq_num > *s {
          *s = seq_num;
        }
      })
      .or_insert(seq_num);
  }

  /// The validator's current set of latest messages: every hash filed at
  /// its highest known sequence number. Size 1 normally; size ≥2 when
  /// the validator equivocated at that sequence number and has not since
  /// advanced past it (advancing to a later sequence number makes
  /// `max_seq` move on, so only the fork that was actually built upon
  /// keeps showing up here).
  pub fn latest(&self, validator: &Pubkey) -> Vec<Hash> {
    let Some(max) = self.max_seq.get(validator).map(|r| *r) else {
      return vec![];
    };
    self.forks.get(&(*validator, max)).map(|r| r.clone()).unwrap_or_default()
  }

  pub fn validators(&self) -> Vec<Pubkey> {
    self.max_seq.iter().map(|r| *r.key()).collect()
  }
}
