//! Service layer API for the config revision lifecycle.
//!
//! All collaborators are injected at construction: the document store, the
//! notification transport behind the approval dispatcher, and the
//! per-identity lock that serializes updates.
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{Configuration, Environment};
use crate::error::LifecycleError;
use crate::lock::{IdentityLock, LOCK_RETRIES, LocalLockTable};
use crate::notify::{ApprovalDispatcher, ApprovalEvent};
use crate::publish::Publisher;
use crate::revision::{Revision, RevisionPatch, RevisionState, TimeStamp};
use crate::store::{ConfigStore, StoreError};

/// How a read resolves the revision list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionQuery {
    AllRevisions,
    LatestApproved,
    ById(i64),
}

impl RevisionQuery {
    /// Transport sentinels: -1 selects the whole history, 0 the latest
    /// approved revision, anything else a concrete id.
    pub fn from_raw(id: i64) -> Self {
        match id {
            -1 => RevisionQuery::AllRevisions,
            0 => RevisionQuery::LatestApproved,
            id => RevisionQuery::ById(id),
        }
    }
}

/// What an update should do. Built with chained setters; empty author/value
/// strings count as "not supplied", mirroring the transport contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateRequest {
    revision: i64,
    copy: bool,
    patch: RevisionPatch,
}

impl UpdateRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target a specific revision id. 0, the default, resolves to the latest
    /// unapproved revision (or to a fresh slot for copies).
    pub fn target_revision(mut self, id: i64) -> Self {
        self.revision = id;
        self
    }

    /// Append a new revision seeded from the target instead of editing in
    /// place. The only way to carry an approved revision forward.
    pub fn as_copy(mut self) -> Self {
        self.copy = true;
        self
    }

    pub fn set_state(mut self, state: RevisionState) -> Self {
        self.patch.state = Some(state);
        self
    }

    pub fn set_author(mut self, author: &str) -> Self {
        if !author.is_empty() {
            self.patch.author = Some(author.to_string());
        }
        self
    }

    pub fn set_value(mut self, value: &str) -> Self {
        if !value.is_empty() {
            self.patch.value = Some(value.to_string());
        }
        self
    }

    pub fn revision(&self) -> i64 {
        self.revision
    }

    pub fn is_copy(&self) -> bool {
        self.copy
    }

    pub fn patch(&self) -> &RevisionPatch {
        &self.patch
    }
}

pub struct ConfigService {
    store: Arc<dyn ConfigStore>,
    locks: Arc<dyn IdentityLock>,
    dispatcher: ApprovalDispatcher,
}

impl ConfigService {
    pub fn new(store: Arc<dyn ConfigStore>, publisher: Arc<dyn Publisher>) -> Self {
        Self::with_lock(store, publisher, Arc::new(LocalLockTable::new()))
    }

    /// Swap in a distributed lock when several instances share one store.
    pub fn with_lock(
        store: Arc<dyn ConfigStore>,
        publisher: Arc<dyn Publisher>,
        locks: Arc<dyn IdentityLock>,
    ) -> Self {
        Self {
            store,
            locks,
            dispatcher: ApprovalDispatcher::start(publisher),
        }
    }

    /// Create a config with its seed revision: id 1, unapproved, the caller's
    /// value and author. Fails when the identity is taken; a failed lookup
    /// also rejects the create, it is never attempted blind.
    pub fn create_config(
        &self,
        name: &str,
        env: Environment,
        value: &str,
        author: &str,
    ) -> Result<Configuration, LifecycleError> {
        if self.store.find_by_identity(name, env)?.is_some() {
            return Err(LifecycleError::AlreadyExists {
                name: name.to_string(),
                env,
            });
        }

        let config = Configuration::new(name, env, Revision::seed(value, author));
        let stored = self.store.create(&config).map_err(|err| match err {
            // A racing create may slip between the lookup and the insert; the
            // store's compare-and-swap catches it.
            StoreError::Conflict => LifecycleError::AlreadyExists {
                name: name.to_string(),
                env,
            },
            other => LifecycleError::Storage(other),
        })?;

        info!(config = name, env = %env, "config created");
        Ok(stored)
    }

    /// Mutate one revision, or append a copy. Runs the whole read-modify-write
    /// cycle under the identity lock.
    pub fn update_config(
        &self,
        name: &str,
        env: Environment,
        request: UpdateRequest,
    ) -> Result<Configuration, LifecycleError> {
        let token = self.locks.acquire(&identity_key(name, env), LOCK_RETRIES)?;
        let updated = self.update_under_lock(name, env, request);
        if let Err(err) = self.locks.release(token) {
            warn!(config = name, env = %env, error = %err, "could not release update lock");
        }

        updated
    }

    fn update_under_lock(
        &self,
        name: &str,
        env: Environment,
        request: UpdateRequest,
    ) -> Result<Configuration, LifecycleError> {
        let mut config =
            self.store
                .find_by_identity(name, env)?
                .ok_or_else(|| LifecycleError::NotFound {
                    name: name.to_string(),
                    env,
                })?;

        // Resolve the target id: 0 defaults to the latest unapproved revision,
        // or to a brand-new slot for copies.
        let mut target = request.revision;
        if target == 0 && !request.copy {
            target = config.latest_id_by_state(RevisionState::Unapproved);
            if target == 0 {
                return Err(LifecycleError::NoEditableRevision);
            }
        } else if target == 0 {
            target = config.next_revision_id();
        }

        if request.copy {
            let mut seed = if target != config.next_revision_id() {
                // Copying an id that never existed degrades to a blank seed.
                config
                    .find_revision(target)
                    .cloned()
                    .unwrap_or_else(Revision::empty)
            } else {
                Revision::empty()
            };
            seed.state = RevisionState::Unapproved;
            seed.created_at = TimeStamp::new();
            seed.id = config.next_revision_id();
            target = seed.id;
            config.revisions.push(seed);
        } else {
            let existing = config
                .find_revision(target)
                .ok_or(LifecycleError::InvalidRevision { id: target })?;
            if existing.state == RevisionState::Approved {
                return Err(LifecycleError::EditNotPermitted { id: target });
            }
        }

        match config.find_revision_mut(target) {
            Some(revision) => revision.apply(request.patch()),
            None => return Err(LifecycleError::InvalidRevision { id: target }),
        }

        self.store.replace_revisions(name, env, &config.revisions)?;

        // Queued only once the new revision list is durably stored.
        if request.patch().approves() {
            info!(config = name, env = %env, revision = target, "revision approved");
            self.dispatcher
                .dispatch(ApprovalEvent::new(name, env, target));
        }

        Ok(config)
    }

    /// Fetch a config, optionally narrowed to one resolved revision.
    pub fn get_config(
        &self,
        name: &str,
        env: Environment,
        query: RevisionQuery,
    ) -> Result<Configuration, LifecycleError> {
        let config =
            self.store
                .find_by_identity(name, env)?
                .ok_or_else(|| LifecycleError::NotFound {
                    name: name.to_string(),
                    env,
                })?;

        let id = match query {
            RevisionQuery::AllRevisions => return Ok(config),
            RevisionQuery::LatestApproved => config.latest_id_by_state(RevisionState::Approved),
            RevisionQuery::ById(id) => id,
        };
        let revision = config
            .find_revision(id)
            .ok_or(LifecycleError::InvalidRevision { id })?;

        Ok(config.with_single_revision(revision.clone()))
    }

    /// Every stored config. An empty store is an empty list, not an error.
    pub fn all_configs(&self) -> Result<Vec<Configuration>, LifecycleError> {
        Ok(self.store.list_all()?)
    }
}

fn identity_key(name: &str, env: Environment) -> String {
    format!("{name}@{env}")
}
