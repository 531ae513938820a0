//! Messages whose parents have not arrived yet.
//!
//! Gossip delivery has no ordering guarantee, so a message can reach this
//! node before one of the parents it names. Rather than reject it, it is
//! parked here, indexed by the missing parent's hash, until that parent is
//! inserted into the DAG — at which point every message waiting on it (and
//! transitively, everything waiting on those) is released in an order that
//! lets each one find its parent already present.

use {
  super::message::Message,
  crate::primitives::{Hash, ToBase58String},
  std::{
    collections::{hash_map::Entry, HashMap, VecDeque},
    time::{Duration, Instant},
  },
  tracing::warn,
};

struct Node {
  at: Instant,
  message: Message,
  children: HashMap<Hash, Node>,
}

impl Node {
  fn new(message: Message) -> Self {
    Self { message, at: Instant::now(), children: HashMap::new() }
  }

  fn rank(&self) -> u64 {
    self.message.header.j_rank
  }

  fn max_rank(&self) -> u64 {
    fn traverse(n: &Node, sofar: u64) -> u64 {
      n.children.values().fold(sofar.max(n.rank()), |acc, c| {
        traverse(c, acc)
      })
    }
    traverse(self, self.rank())
  }

  /// Attempts to insert a message into an orphan tree rooted at a message
  /// this one is (transitively) waiting on. Consumes the message on
  /// success, hands it back on failure so the caller can try the next
  /// tree or start a new one.
  fn insert(&mut self, new: Message) -> Result<(), Message> {
    if new.header.j_rank <= self.rank() {
      return Err(new);
    }
    let new_hash = new.hash();
    let self_hash = self.message.hash();

    if new.header.parents.contains(&self_hash) {
      if let Entry::Vacant(e) = self.children.entry(new_hash) {
        e.insert(Node::new(new));
      }
      return Ok(());
    }

    let mut pending = Some(new);
    for child in self.children.values_mut() {
      match child.insert(pending.take().unwrap()) {
        Ok(()) => return Ok(()),
        Err(message) => pending = Some(message),
      }
    }
    Err(pending.take().unwrap())
  }

  fn since(&self) -> Duration {
    Instant::now().duration_since(self.at)
  }

  fn reset_timer(&mut self) {
    self.at = Instant::now();
  }

  /// Flattens the tree breadth-first, so replaying messages in this order
  /// always finds each one's parent already inserted.
  fn flatten(self) -> Vec<Message> {
    let mut output = vec![];
    let mut queue = VecDeque::new();
    queue.push_back(self);
    while let Some(node) = queue.pop_front() {
      output.push(node.message);
      for child in node.children.into_values() {
        queue.push_back(child);
      }
    }
    output
  }
}

/// Indexes parentless messages by the hash of the missing parent they are
/// each (transitively) rooted at.
pub struct Orphans {
  missing_after: Duration,
  trees: HashMap<Hash, Node>,
}

impl Orphans {
  pub fn new(missing_after: Duration) -> Self {
    Self { missing_after, trees: HashMap::new() }
  }

  /// Records a message whose main parent is not yet present in the DAG.
  pub fn add(&mut self, message: Message) {
    let mut pending = Some(message);
    for root in self.trees.values_mut() {
      match root.insert(pending.take().unwrap()) {
        Ok(()) => return,
        Err(message) => pending = Some(message),
      }
    }
    let message = pending.take().unwrap();
    let Some(missing_parent) = message.main_parent() else {
      warn!("dropping parentless non-genesis message with no main parent");
      return;
    };
    let label = message.hash().to_b58();
    self.trees.insert(missing_parent, Node::new(message));
    warn!(
      parent = %missing_parent.to_b58(),
      message = %label,
      "parent not found yet, parking as orphan",
    );
  }

  /// Releases every message that was (transitively) waiting on
  /// `parent_hash`, in an order safe to re-insert into the DAG.
  pub fn release(&mut self, parent_hash: &Hash) -> Option<Vec<Message>> {
    self.trees.remove(parent_hash).map(Node::flatten)
  }

  /// Orphan subtrees whose highest rank is already below the last
  /// finalized rank can never be reattached to the canonical chain and are
  /// pruned; subtrees that have been missing their parent for too long are
  /// surfaced so the caller can ask peers to replay the missing message.
  pub fn sweep(&mut self, min_relevant_rank: u64) -> Vec<Hash> {
    let mut stale = Vec::new();
    let mut irrelevant = Vec::new();
    for (hash, tree) in self.trees.iter_mut() {
      if tree.max_rank() <= min_relevant_rank {
        irrelevant.push(*hash);
      } else if tree.since() >= self.missing_after {
        tree.reset_timer();
        stale.push(*hash);
      }
    }
    for hash in irrelevant {
      self.trees.remove(&hash);
    }
    stale
  }
}
