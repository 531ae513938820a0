use {
  super::validator::Validator,
  chrono::{DateTime, Utc},
  serde::{Deserialize, Serialize},
  std::time::Duration,
};

/// The genesis message of the chain.
///
/// Fixes the validator set, the relative fault-tolerance threshold used by
/// the finality detector, and — when running in highway mode — the era
/// timing parameters that govern booking blocks, the entropy window and
/// round length. In classical mode the highway fields are ignored and
/// `round_exponent`/era fields on produced messages stay zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genesis {
  /// Globally unique string identifying this chain, so that independently
  /// deployed instances of this software never cross-accept each other's
  /// messages.
  pub chain_id: String,

  /// UTC timestamp at which validators are expected to come online and
  /// begin participating.
  pub genesis_time: DateTime<Utc>,

  /// The bonded validator set and their stakes, effective from genesis
  /// until the first switch block changes it.
  pub validators: Vec<Validator>,

  /// Relative fault-tolerance threshold used by the finality detector:
  /// the fraction of total stake that must be Byzantine before a
  /// finality claim could be violated. Expressed as a fraction in (0, 1).
  pub relative_fault_tolerance: f64,

  /// Selects which of the two producer/executor timing disciplines is
  /// active. Classical mode ignores every field below.
  pub consensus_mode: ConsensusMode,

  /// Highway era timing parameters. `None` in classical mode.
  pub highway: Option<HighwayParams>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsensusMode {
  Classical,
  Highway,
}

/// Era timing, named after the booking-block / switch-block bookkeeping in
/// the Highway protocol: an era is a window of the chain over which the
/// validator set and leader schedule are fixed, derived from entropy
/// collected during the era before it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighwayParams {
  /// Wall-clock length of one era.
  #[serde(with = "humantime_serde")]
  pub era_duration: Duration,

  /// How long before an era's end the booking block height is fixed,
  /// i.e. how many eras back the booking block is taken from
  /// (`AUCTION_DELAY` in the booking-height formula).
  pub auction_delay: u64,

  /// Length of the window, counted from the start of the era, during
  /// which the booking block for some future era may still appear.
  #[serde(with = "humantime_serde")]
  pub booking_duration: Duration,

  /// Length of the window after the booking block during which entropy
  /// (the key block's seed) is collected for the era it unlocks.
  #[serde(with = "humantime_serde")]
  pub entropy_duration: Duration,

  /// Length of one highway voting round, before doubling/halving via the
  /// round-exponent adjustment.
  #[serde(with = "humantime_serde")]
  pub voting_period_duration: Duration,

  /// Summit level a round-trip of ballots must reach before the round
  /// length is allowed to double; gates round length only, not finality.
  pub voting_period_summit_level: u32,

  /// Initial round exponent: round length is `2^init_round_exponent`
  /// ticks (milliseconds), before any later per-round doubling/halving.
  pub init_round_exponent: u8,

  /// Start of the omega-message window, as a fraction of the round
  /// length measured from the round's start tick.
  pub omega_message_time_start: f64,

  /// End of the omega-message window, as a fraction of the round length
  /// measured from the round's start tick. Must be greater than
  /// `omega_message_time_start`.
  pub omega_message_time_end: f64,
}
