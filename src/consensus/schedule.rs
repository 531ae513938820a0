use super::validator::Validator;
use rand::{
  distributions::{WeightedError, WeightedIndex},
  prelude::Distribution,
  SeedableRng,
};
use rand_chacha::ChaCha20Rng;

/// Creates a stake-weighted validator schedule iterator based on
/// a predefined seed value. This iterator will iterate forever
/// returning the next expected validator deterministically for a
/// given seed on all validator instances.
///
/// In highway mode the seed is the era seed (derived from the booking
/// block hash and the key block's entropy); every validator computes the
/// same schedule independently and the position in the sequence is the
/// round number, so round robin leader selection never needs a network
/// round to agree on.
///
/// ```
/// let seed = [5u8; 32];
/// let validators = Vec::<Validator>::new(); // validators with stakes
/// let schedule = ValidatorSchedule::new(seed, &validators)?;
///
/// let era_leaders = schedule.take(64);
/// ```
#[derive(Debug)]
pub struct ValidatorSchedule<'a> {
  rng: ChaCha20Rng,
  dist: WeightedIndex<u128>,
  validators: &'a [Validator],
}

impl<'a> ValidatorSchedule<'a> {
  pub fn new(
    seed: [u8; 32],
    validators: &'a [Validator],
  ) -> Result<Self, WeightedError> {
    Ok(Self {
      rng: ChaCha20Rng::from_seed(seed),
      dist: WeightedIndex::new(validators.iter().map(|v| v.stake))?,
      validators,
    })
  }
}

impl<'a> Iterator for ValidatorSchedule<'a> {
  type Item = &'a Validator;
  fn next(&mut self) -> Option<Self::Item> {
    Some(&self.validators[self.dist.sample(&mut self.rng)])
  }
}
