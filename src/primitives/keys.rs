use {
  super::b58::ToBase58String,
  ed25519_dalek::{PublicKey, SecretKey, Signer, Verifier},
  serde::{
    de::{self, Visitor},
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
  },
  std::{
    fmt::{Debug, Display, Formatter},
    marker::PhantomData,
    ops::Deref,
    str::FromStr,
  },
  thiserror::Error,
};

/// The public key of a validator. Possibly empty for the Genesis message,
/// per the data model.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey([u8; 32]);

impl Pubkey {
  pub const EMPTY: Pubkey = Pubkey([0u8; 32]);

  pub fn is_empty(&self) -> bool {
    self.0 == [0u8; 32]
  }
}

impl Deref for Pubkey {
  type Target = [u8];
  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl Display for Pubkey {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", bs58::encode(self.0).into_string())
  }
}

impl Debug for Pubkey {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "Pubkey({})", bs58::encode(self.0).into_string())
  }
}

impl From<PublicKey> for Pubkey {
  fn from(p: PublicKey) -> Self {
    Self(*p.as_bytes())
  }
}

impl FromStr for Pubkey {
  type Err = bs58::decode::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut bytes = [0u8; 32];
    bs58::decode(s).into(&mut bytes)?;
    Ok(Self(bytes))
  }
}

impl Serialize for Pubkey {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_str(&bs58::encode(self.0).into_string())
  }
}

impl<'de> Deserialize<'de> for Pubkey {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    struct StringVisitor(PhantomData<Pubkey>);

    impl<'de> Visitor<'de> for StringVisitor {
      type Value = Pubkey;

      fn expecting(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str("a base58-encoded public key")
      }

      fn visit_str<E>(self, value: &str) -> Result<Pubkey, E>
      where
        E: de::Error,
      {
        Pubkey::from_str(value).map_err(|e| de::Error::custom(format!("{e:?}")))
      }
    }

    deserializer.deserialize_str(StringVisitor(PhantomData))
  }
}

/// Signature algorithms supported by the wire format. Ed25519 is the
/// default; the tagged representation leaves room for others without
/// changing the `Message` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
  Ed25519,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
  pub algorithm: SignatureAlgorithm,
  #[serde(with = "serde_signature_bytes")]
  pub bytes: ed25519_dalek::Signature,
}

impl Debug for Signature {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Signature")
      .field("algorithm", &self.algorithm)
      .field("bytes", &bs58::encode(self.bytes.to_bytes()).into_string())
      .finish()
  }
}

mod serde_signature_bytes {
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S>(
    sig: &ed25519_dalek::Signature,
    serializer: S,
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    serializer.serialize_bytes(&sig.to_bytes())
  }

  pub fn deserialize<'de, D>(
    deserializer: D,
  ) -> Result<ed25519_dalek::Signature, D::Error>
  where
    D: Deserializer<'de>,
  {
    let bytes = <Vec<u8>>::deserialize(deserializer)?;
    ed25519_dalek::Signature::from_bytes(&bytes)
      .map_err(|e| serde::de::Error::custom(format!("{e}")))
  }
}

/// A validator's keypair, used to sign blocks, ballots and votes.
pub struct Keypair(ed25519_dalek::Keypair);

impl Keypair {
  pub fn public(&self) -> Pubkey {
    self.0.public.into()
  }

  pub fn sign(&self, message: &[u8]) -> Signature {
    Signature {
      algorithm: SignatureAlgorithm::Ed25519,
      bytes: self.0.sign(message),
    }
  }
}

/// Verifies a signature against a message and the claimed signer.
pub fn verify(
  pubkey: &Pubkey,
  message: &[u8],
  signature: &Signature,
) -> Result<(), ed25519_dalek::SignatureError> {
  let SignatureAlgorithm::Ed25519 = signature.algorithm;
  PublicKey::from_bytes(pubkey)?.verify(message, &signature.bytes)
}

impl Clone for Keypair {
  fn clone(&self) -> Self {
    Self(ed25519_dalek::Keypair::from_bytes(&self.0.to_bytes()).unwrap())
  }
}

impl Deref for Keypair {
  type Target = ed25519_dalek::Keypair;
  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl Debug for Keypair {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("Keypair").field(&self.0.public).finish()
  }
}

impl Display for Keypair {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "Keypair({})", bs58::encode(self.0.public.as_bytes()).into_string())
  }
}

impl From<ed25519_dalek::Keypair> for Keypair {
  fn from(k: ed25519_dalek::Keypair) -> Self {
    Self(k)
  }
}

#[derive(Debug, Error)]
pub enum KeypairError {
  #[error("failed parsing base58 secret key: {0:?}")]
  Base58ParseError(bs58::decode::Error),

  #[error("{0}")]
  Ed25519Error(#[from] ed25519_dalek::ed25519::Error),
}

impl FromStr for Keypair {
  type Err = KeypairError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    let mut secret = [0u8; 32];
    bs58::decode(value)
      .into(&mut secret)
      .map_err(KeypairError::Base58ParseError)?;
    let secret = SecretKey::from_bytes(&secret)?;
    let public = (&secret).into();
    Ok(Keypair(ed25519_dalek::Keypair { secret, public }))
  }
}

impl ToBase58String for Signature {
  fn to_b58(&self) -> String {
    bs58::encode(self.bytes.to_bytes()).into_string()
  }
}
