//! Persistent storage for messages and era state, so a restarted node
//! rebuilds its DAG view instead of replaying the whole chain from peers.

use {
  crate::{
    consensus::Message,
    primitives::Hash,
  },
  serde::{Deserialize, Serialize},
  std::path::Path,
  thiserror::Error,
};

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("serialization error: {0}")]
  Serialization(#[from] bincode::Error),

  #[error("storage engine error: {0}")]
  Engine(#[from] sled::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Durable message log, keyed by message hash. Used by the executor to
/// persist every message it inserts into the DAG and to reload the DAG on
/// startup.
pub trait BlockStorage: Send + Sync {
  fn put(&self, message: &Message) -> StorageResult<()>;
  fn get(&self, hash: &Hash) -> StorageResult<Option<Message>>;
  fn set_last_finalized(&self, hash: Hash) -> StorageResult<()>;
  fn last_finalized(&self) -> StorageResult<Option<Hash>>;
  fn all(&self) -> StorageResult<Vec<Message>>;
}

/// `sled`-backed implementation, the default for a running node.
pub struct SledBlockStorage {
  messages: sled::Tree,
  meta: sled::Tree,
}

const LAST_FINALIZED_KEY: &[u8] = b"last_finalized";

impl SledBlockStorage {
  pub fn open(directory: impl AsRef<Path>) -> StorageResult<Self> {
    let db = sled::Config::new()
      .path(directory.as_ref())
      .use_compression(true)
      .open()?;
    Ok(Self { messages: db.open_tree("messages")?, meta: db.open_tree("meta")? })
  }
}

impl BlockStorage for SledBlockStorage {
  fn put(&self, message: &Message) -> StorageResult<()> {
    let hash = message.hash();
    self.messages.insert(hash.as_bytes(), bincode::serialize(message)?)?;
    Ok(())
  }

  fn get(&self, hash: &Hash) -> StorageResult<Option<Message>> {
    match self.messages.get(hash.as_bytes())? {
      Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
      None => Ok(None),
    }
  }

  fn set_last_finalized(&self, hash: Hash) -> StorageResult<()> {
    self.meta.insert(LAST_FINALIZED_KEY, hash.as_bytes())?;
    Ok(())
  }

  fn last_finalized(&self) -> StorageResult<Option<Hash>> {
    match self.meta.get(LAST_FINALIZED_KEY)? {
      Some(bytes) => {
        let mut buf = [0u8; 32];
        buf.copy_from_slice(&bytes);
        Ok(Some(Hash::from(buf)))
      }
      None => Ok(None),
    }
  }

  fn all(&self) -> StorageResult<Vec<Message>> {
    self
      .messages
      .iter()
      .values()
      .map(|r| r.map_err(StorageError::from).and_then(|bytes| {
        bincode::deserialize(&bytes).map_err(StorageError::from)
      }))
      .collect()
  }
}

/// In-memory implementation for tests and short-lived tooling.
#[derive(Default)]
pub struct MemoryBlockStorage {
  messages: dashmap::DashMap<Hash, Message>,
  last_finalized: std::sync::Mutex<Option<Hash>>,
}

impl MemoryBlockStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl BlockStorage for MemoryBlockStorage {
  fn put(&self, message: &Message) -> StorageResult<()> {
    self.messages.insert(message.hash(), message.clone());
    Ok(())
  }

  fn get(&self, hash: &Hash) -> StorageResult<Option<Message>> {
    Ok(self.messages.get(hash).map(|r| r.clone()))
  }

  fn set_last_finalized(&self, hash: Hash) -> StorageResult<()> {
    *self.last_finalized.lock().unwrap() = Some(hash);
    Ok(())
  }

  fn last_finalized(&self) -> StorageResult<Option<Hash>> {
    Ok(*self.last_finalized.lock().unwrap())
  }

  fn all(&self) -> StorageResult<Vec<Message>> {
    Ok(self.messages.iter().map(|r| r.clone()).collect())
  }
}

/// Durable record of one era's place in the era DAG: its own id, the era
/// it branched off of, and the height its key block sits at. The era's
/// live bookkeeping (leader schedule, pending candidates, bonds) stays in
/// [`crate::consensus::era_supervisor::EraSupervisor`]'s in-process
/// state; this is only what `era add/get/children` (§6) need to persist
/// across a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraRecord {
  pub era_id: Hash,
  pub parent_era_id: Hash,
  pub start_height: u64,
}

/// Durable era log, keyed by era id, with a secondary index from parent
/// era to children so `latestInEra`-style callers can walk forward
/// through the era DAG without scanning every record.
pub trait EraStorage: Send + Sync {
  fn put(&self, era: EraRecord) -> StorageResult<()>;
  fn get(&self, era_id: &Hash) -> StorageResult<Option<EraRecord>>;
  fn children(&self, era_id: &Hash) -> StorageResult<Vec<Hash>>;
}

/// `sled`-backed implementation, mirroring [`SledBlockStorage`]'s shape:
/// one tree for era records, keyed by era id, plus a small children index
/// tree so `children` doesn't require a full scan.
pub struct SledEraStorage {
  eras: sled::Tree,
  children: sled::Tree,
}

impl SledEraStorage {
  pub fn open(directory: impl AsRef<Path>) -> StorageResult<Self> {
    let db = sled::Config::new()
      .path(directory.as_ref())
      .use_compression(true)
      .open()?;
    Ok(Self { eras: db.open_tree("eras")?, children: db.open_tree("era_children")? })
  }
}

impl EraStorage for SledEraStorage {
  fn put(&self, era: EraRecord) -> StorageResult<()> {
    self.eras.insert(era.era_id.as_bytes(), bincode::serialize(&era)?)?;
    let mut siblings = match self.children.get(era.parent_era_id.as_bytes())? {
      Some(bytes) => bincode::deserialize::<Vec<Hash>>(&bytes)?,
      None => Vec::new(),
    };
    if !siblings.contains(&era.era_id) {
      siblings.push(era.era_id);
      self
        .children
        .insert(era.parent_era_id.as_bytes(), bincode::serialize(&siblings)?)?;
    }
    Ok(())
  }

  fn get(&self, era_id: &Hash) -> StorageResult<Option<EraRecord>> {
    match self.eras.get(era_id.as_bytes())? {
      Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
      None => Ok(None),
    }
  }

  fn children(&self, era_id: &Hash) -> StorageResult<Vec<Hash>> {
    match self.children.get(era_id.as_bytes())? {
      Some(bytes) => Ok(bincode::deserialize(&bytes)?),
      None => Ok(Vec::new()),
    }
  }
}

/// In-memory implementation for tests and short-lived tooling.
#[derive(Default)]
pub struct MemoryEraStorage {
  eras: dashmap::DashMap<Hash, EraRecord>,
  children: dashmap::DashMap<Hash, Vec<Hash>>,
}

impl MemoryEraStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl EraStorage for MemoryEraStorage {
  fn put(&self, era: EraRecord) -> StorageResult<()> {
    self.children.entry(era.parent_era_id).or_default().push(era.era_id);
    self.eras.insert(era.era_id, era);
    Ok(())
  }

  fn get(&self, era_id: &Hash) -> StorageResult<Option<EraRecord>> {
    Ok(self.eras.get(era_id).map(|r| r.clone()))
  }

  fn children(&self, era_id: &Hash) -> StorageResult<Vec<Hash>> {
    Ok(self.children.get(era_id).map(|r| r.clone()).unwrap_or_default())
  }
}
