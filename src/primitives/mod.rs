mod b58;
mod hash;
mod keys;

pub use {
  b58::ToBase58String,
  hash::{Hash, HashParseError},
  keys::{verify, Keypair, KeypairError, Pubkey, Signature, SignatureAlgorithm},
};
