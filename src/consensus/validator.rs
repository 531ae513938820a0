use crate::primitives::Pubkey;

/// A bonded participant in consensus, identified by public key and weighted
/// by stake. Stake determines quorum thresholds in the finality detector and
/// sampling weight in the leader schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
  pub pubkey: Pubkey,
  pub stake: u128,
}

impl Validator {
  pub fn new(pubkey: Pubkey, stake: u128) -> Self {
    Self { pubkey, stake }
  }
}
