use crate::config::CorruptPolicy;
use crate::identity::{check_collection, Identity};
use facereg_vision::Descriptor;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key under which the whole identity collection is persisted.
pub const USERS_KEY: &str = "users";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage i/o: {0}")]
    Io(#[from] io::Error),
    #[error("stored identities are corrupt: {0}")]
    Corrupt(String),
    #[error("encoding identities: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable string key-value slots.
pub trait Storage: Send {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    /// Replace the value; readers never observe a partial write.
    fn set(&mut self, key: &str, value: &str) -> io::Result<()>;
    fn remove(&mut self, key: &str) -> io::Result<()>;
}

/// One `<key>.json` file per slot inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        match std::fs::read_to_string(self.slot(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let target = self.slot(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &target)
    }

    fn remove(&mut self, key: &str) -> io::Result<()> {
        match std::fs::remove_file(self.slot(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Process-local storage, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slots: HashMap<String, String>,
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.slots.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> io::Result<()> {
        self.slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> io::Result<()> {
        self.slots.remove(key);
        Ok(())
    }
}

#[derive(Deserialize)]
struct StoredIdentity {
    name: String,
    descriptor: StoredDescriptor,
}

/// Descriptors are written as arrays. Older data serialized typed arrays as
/// objects keyed by index (`{"0": .., "1": ..}`), which is still accepted.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredDescriptor {
    List(Vec<f32>),
    Indexed(HashMap<String, f32>),
}

impl StoredDescriptor {
    fn into_descriptor(self) -> Result<Descriptor, String> {
        match self {
            StoredDescriptor::List(values) => Ok(Descriptor::new(values)),
            StoredDescriptor::Indexed(map) => {
                let mut ordered = BTreeMap::new();
                for (k, v) in map {
                    let idx: usize = k
                        .parse()
                        .map_err(|_| format!("descriptor key {k:?} is not an index"))?;
                    ordered.insert(idx, v);
                }
                if ordered.keys().enumerate().any(|(i, &k)| i != k) {
                    return Err("descriptor indices are not contiguous".to_string());
                }
                Ok(Descriptor::new(ordered.into_values().collect()))
            }
        }
    }
}

/// The persisted identity collection.
pub struct IdentityStore<S> {
    storage: S,
}

impl<S: Storage> IdentityStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn load(&self) -> Result<Vec<Identity>, StoreError> {
        let Some(raw) = self.storage.get(USERS_KEY)? else {
            return Ok(Vec::new());
        };
        let stored: Vec<StoredIdentity> =
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let identities = stored
            .into_iter()
            .map(|s| -> Result<Identity, String> {
                Ok(Identity {
                    name: s.name,
                    descriptor: s.descriptor.into_descriptor()?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Corrupt)?;
        check_collection(&identities).map_err(StoreError::Corrupt)?;
        Ok(identities)
    }

    /// Load, applying `policy` when the stored data is unreadable.
    pub fn load_or_reset(&mut self, policy: CorruptPolicy) -> Result<Vec<Identity>, StoreError> {
        match self.load() {
            Err(StoreError::Corrupt(reason)) if policy == CorruptPolicy::Reset => {
                log::warn!("discarding corrupt identity store: {}", reason);
                self.clear()?;
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Overwrite the persisted collection with `identities`.
    pub fn save(&mut self, identities: &[Identity]) -> Result<(), StoreError> {
        let data = serde_json::to_string(identities)?;
        self.storage.set(USERS_KEY, &data)?;
        log::debug!("persisted {} identities", identities.len());
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.storage.remove(USERS_KEY)?;
        Ok(())
    }
}
