use crate::config::Environment;
use crate::lock::LockError;
use crate::store::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("config '{name}' already exists for {env}")]
    AlreadyExists { name: String, env: Environment },
    #[error("config '{name}' does not exist for {env}")]
    NotFound { name: String, env: Environment },
    #[error("revision {id} does not exist")]
    InvalidRevision { id: i64 },
    #[error("every revision is approved; request a copy to keep editing")]
    NoEditableRevision,
    #[error("revision {id} is approved and can only be changed through a copy")]
    EditNotPermitted { id: i64 },
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Lock(#[from] LockError),
}
