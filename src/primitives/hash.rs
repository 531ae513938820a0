use {
  super::b58::ToBase58String,
  blake2::{digest::consts::U32, Blake2b, Digest},
  serde::{de, Deserialize, Deserializer, Serialize, Serializer},
  std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
  },
  thiserror::Error,
};

type Blake2b256 = Blake2b<U32>;

/// A content-addressed, opaque 32-byte identifier.
///
/// Every [`crate::consensus::message::Message`] is keyed by the Blake2b-256
/// digest of its signed payload bytes. Hashes are never interpreted except
/// by equality and ordering, matching the "opaque identifier" language in
/// the data model.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; 32]);

impl Hash {
  pub const ZERO: Hash = Hash([0u8; 32]);

  pub fn digest(bytes: &[u8]) -> Self {
    let mut hasher = Blake2b256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    Hash(buf)
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }

  pub fn is_zero(&self) -> bool {
    self.0 == [0u8; 32]
  }
}

impl AsRef<[u8]> for Hash {
  fn as_ref(&self) -> &[u8] {
    &self.0
  }
}

impl From<[u8; 32]> for Hash {
  fn from(bytes: [u8; 32]) -> Self {
    Hash(bytes)
  }
}

impl ToBase58String for Hash {
  fn to_b58(&self) -> String {
    bs58::encode(self.0).into_string()
  }
}

impl Display for Hash {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_b58())
  }
}

impl Debug for Hash {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(f, "Hash({})", self.to_b58())
  }
}

#[derive(Debug, Error)]
pub enum HashParseError {
  #[error("invalid base58 hash: {0:?}")]
  Base58(bs58::decode::Error),
  #[error("hash must be exactly 32 bytes, got {0}")]
  WrongLength(usize),
}

impl FromStr for Hash {
  type Err = HashParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let decoded = bs58::decode(s)
      .into_vec()
      .map_err(HashParseError::Base58)?;
    if decoded.len() != 32 {
      return Err(HashParseError::WrongLength(decoded.len()));
    }
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&decoded);
    Ok(Hash(buf))
  }
}

impl Serialize for Hash {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(&self.to_b58())
  }
}

impl<'de> Deserialize<'de> for Hash {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    let s = String::deserialize(deserializer)?;
    Hash::from_str(&s).map_err(|e| de::Error::custom(format!("{e}")))
  }
}
