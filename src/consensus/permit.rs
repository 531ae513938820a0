//! Concurrency gates for the consensus core.
//!
//! Two independent semaphores bound the two places where unsynchronized
//! access would corrupt consensus state:
//!
//! - the *message-adding permit* serializes validate -> execute -> persist
//!   -> finalize -> emit for every incoming message, so the DAG, the
//!   finality detector's last-finalized pointer and storage never observe
//!   two messages being applied out of order;
//! - the *producer permit*, one per validator key this node holds, stops a
//!   node from signing two messages for the same validator concurrently,
//!   which would itself be a self-inflicted equivocation.

use {
  crate::primitives::Pubkey,
  dashmap::DashMap,
  std::sync::Arc,
  tokio::sync::{Semaphore, SemaphorePermit},
};

/// Serializes the executor's apply pipeline. A single permit, held for the
/// duration of one message's validate/execute/persist/finalize/emit cycle.
#[derive(Clone)]
pub struct MessageAddingPermit {
  semaphore: Arc<Semaphore>,
}

impl MessageAddingPermit {
  pub fn new() -> Self {
    Self { semaphore: Arc::new(Semaphore::new(1)) }
  }

  pub async fn acquire(&self) -> SemaphorePermit<'_> {
    self
      .semaphore
      .acquire()
      .await
      .expect("message-adding semaphore is never closed")
  }
}

impl Default for MessageAddingPermit {
  fn default() -> Self {
    Self::new()
  }
}

/// One single-slot semaphore per locally-held validator key, so a node
/// running several validators never lets two of them race to sign at once,
/// while validators remain free to produce concurrently with each other.
#[derive(Clone, Default)]
pub struct ProducerPermits {
  permits: Arc<DashMap<Pubkey, Arc<Semaphore>>>,
}

impl ProducerPermits {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn acquire(&self, validator: Pubkey) -> OwnedProducerPermit {
    let semaphore = self
      .permits
      .entry(validator)
      .or_insert_with(|| Arc::new(Semaphore::new(1)))
      .clone();
    let permit = semaphore
      .clone()
      .acquire_owned()
      .await
      .expect("producer semaphore is never closed");
    OwnedProducerPermit { _permit: permit }
  }
}

pub struct OwnedProducerPermit {
  _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn producer_permits_serialize_per_validator() {
    let permits = ProducerPermits::new();
    let v = Pubkey::EMPTY;
    let _first = permits.acquire(v).await;
    let second = tokio::time::timeout(
      std::time::Duration::from_millis(20),
      permits.acquire(v),
    )
    .await;
    assert!(second.is_err(), "second acquire should not complete while first is held");
  }

  #[tokio::test]
  async fn producer_permits_independent_across_validators() {
    let permits = ProducerPermits::new();
    let mut a = [0u8; 32];
    a[0] = 1;
    let mut b = [0u8; 32];
    b[0] = 2;
    let va: Pubkey = {
      use ed25519_dalek::SecretKey;
      let secret = SecretKey::from_bytes(&a).unwrap();
      let public: ed25519_dalek::PublicKey = (&secret).into();
      public.into()
    };
    let vb: Pubkey = {
      use ed25519_dalek::SecretKey;
      let secret = SecretKey::from_bytes(&b).unwrap();
      let public: ed25519_dalek::PublicKey = (&secret).into();
      public.into()
    };
    let _first = permits.acquire(va).await;
    let second = tokio::time::timeout(
      std::time::Duration::from_millis(20),
      permits.acquire(vb),
    )
    .await;
    assert!(second.is_ok());
  }
}
