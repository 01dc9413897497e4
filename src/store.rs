//! Persistence contract for configs, plus the sled-backed implementation.
//!
//! The store keeps one document per `(name, env)` pair. Lookups report three
//! distinct outcomes: found (`Ok(Some)`), not found (`Ok(None)`) and failed
//! (`Err`), so callers never have to guess whether an absence is real.
use std::sync::Arc;

use crate::config::{Configuration, Environment};
use crate::revision::Revision;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("a config with this name and environment is already stored")]
    Conflict,
    #[error("no config is stored under this name and environment")]
    Missing,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub trait ConfigStore: Send + Sync {
    /// Insert a new document. Fails with [`StoreError::Conflict`] when one
    /// already holds the same identity.
    fn create(&self, config: &Configuration) -> Result<Configuration, StoreError>;

    /// Replace the full revision list of an existing document.
    fn replace_revisions(
        &self,
        name: &str,
        env: Environment,
        revisions: &[Revision],
    ) -> Result<(), StoreError>;

    fn find_by_identity(
        &self,
        name: &str,
        env: Environment,
    ) -> Result<Option<Configuration>, StoreError>;

    fn list_all(&self) -> Result<Vec<Configuration>, StoreError>;
}

/// Embedded document store over sled. Documents are CBOR-encoded configs keyed
/// by the CBOR of `(name, env)`, which keeps keys unambiguous for any name.
pub struct SledConfigStore {
    db: Arc<sled::Db>,
}

impl SledConfigStore {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self { db }
    }

    fn key(name: &str, env: Environment) -> Result<Vec<u8>, StoreError> {
        minicbor::to_vec((name, env.as_str())).map_err(|err| StoreError::Backend(err.into()))
    }

    fn decode(bytes: &[u8]) -> Result<Configuration, StoreError> {
        minicbor::decode(bytes).map_err(|err| StoreError::Backend(err.into()))
    }
}

impl ConfigStore for SledConfigStore {
    fn create(&self, config: &Configuration) -> Result<Configuration, StoreError> {
        let key = Self::key(&config.name, config.env)?;
        let bytes = minicbor::to_vec(config).map_err(|err| StoreError::Backend(err.into()))?;

        // Compare-and-swap against an absent key, so two racing creates can
        // never both insert.
        match self.db.compare_and_swap(key, None as Option<&[u8]>, Some(bytes)) {
            Ok(Ok(())) => Ok(config.clone()),
            Ok(Err(_)) => Err(StoreError::Conflict),
            Err(err) => Err(StoreError::Backend(err.into())),
        }
    }

    fn replace_revisions(
        &self,
        name: &str,
        env: Environment,
        revisions: &[Revision],
    ) -> Result<(), StoreError> {
        let key = Self::key(name, env)?;
        if self
            .db
            .get(&key)
            .map_err(|err| StoreError::Backend(err.into()))?
            .is_none()
        {
            return Err(StoreError::Missing);
        }

        let document = Configuration {
            name: name.to_string(),
            env,
            revisions: revisions.to_vec(),
        };
        let bytes = minicbor::to_vec(&document).map_err(|err| StoreError::Backend(err.into()))?;
        self.db
            .insert(key, bytes)
            .map_err(|err| StoreError::Backend(err.into()))?;

        Ok(())
    }

    fn find_by_identity(
        &self,
        name: &str,
        env: Environment,
    ) -> Result<Option<Configuration>, StoreError> {
        let key = Self::key(name, env)?;
        match self
            .db
            .get(&key)
            .map_err(|err| StoreError::Backend(err.into()))?
        {
            Some(bytes) => Ok(Some(Self::decode(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn list_all(&self) -> Result<Vec<Configuration>, StoreError> {
        let mut configs = Vec::new();
        for entry in self.db.iter() {
            let (_, bytes) = entry.map_err(|err| StoreError::Backend(err.into()))?;
            configs.push(Self::decode(bytes.as_ref())?);
        }
        Ok(configs)
    }
}
