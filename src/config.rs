//! Configs: a named, environment-scoped record holding an ordered revision list.
use crate::revision::{Revision, RevisionState};

/// Deployment environment a config belongs to. Part of the config identity.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    minicbor::Encode,
    minicbor::Decode,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    #[n(0)]
    Dev,
    #[n(1)]
    Staging,
    #[n(2)]
    Uat,
    #[n(3)]
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "DEV",
            Environment::Staging => "STAGING",
            Environment::Uat => "UAT",
            Environment::Production => "PRODUCTION",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
#[error("unknown environment '{0}'")]
pub struct UnknownEnvironment(String);

impl std::str::FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEV" => Ok(Environment::Dev),
            "STAGING" => Ok(Environment::Staging),
            "UAT" => Ok(Environment::Uat),
            "PRODUCTION" => Ok(Environment::Production),
            _ => Err(UnknownEnvironment(s.to_string())),
        }
    }
}

/// A config and its full revision history. `(name, env)` is unique across the
/// store; the revision list is only ever appended to or patched in place.
#[derive(
    Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode, serde::Serialize, serde::Deserialize,
)]
pub struct Configuration {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub env: Environment,
    #[n(2)]
    pub revisions: Vec<Revision>,
}

impl Configuration {
    pub fn new(name: &str, env: Environment, seed: Revision) -> Self {
        Self {
            name: name.to_string(),
            env,
            revisions: vec![seed],
        }
    }

    /// First revision carrying this id, in insertion order.
    pub fn find_revision(&self, id: i64) -> Option<&Revision> {
        self.revisions.iter().find(|revision| revision.id == id)
    }

    pub fn find_revision_mut(&mut self, id: i64) -> Option<&mut Revision> {
        self.revisions.iter_mut().find(|revision| revision.id == id)
    }

    /// Largest id present, 0 when the list is empty.
    pub fn max_revision_id(&self) -> i64 {
        self.revisions
            .iter()
            .fold(0, |max, revision| max.max(revision.id))
    }

    /// Largest id among revisions in the given state, 0 when none match.
    pub fn latest_id_by_state(&self, state: RevisionState) -> i64 {
        self.revisions
            .iter()
            .filter(|revision| revision.state == state)
            .fold(0, |max, revision| max.max(revision.id))
    }

    pub fn next_revision_id(&self) -> i64 {
        self.max_revision_id() + 1
    }

    /// The same identity narrowed down to a single revision, for reads that
    /// resolve one id instead of returning the whole history.
    pub fn with_single_revision(&self, revision: Revision) -> Self {
        Self {
            name: self.name.clone(),
            env: self.env,
            revisions: vec![revision],
        }
    }
}
