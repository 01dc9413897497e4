//! Per-config mutual exclusion around the update read-modify-write cycle.
//!
//! Updates load the whole document, mutate it in memory and write it back, so
//! two concurrent writers on the same identity would silently drop each
//! other's revisions. Every update therefore runs under a lock keyed by the
//! config identity: [`LocalLockTable`] for a single process, or
//! [`RedisIdentityLock`] when several instances share the store.
use std::collections::HashSet;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Retry budget the service passes to `acquire`.
pub const LOCK_RETRIES: u32 = 32;

const RETRY_DELAY: Duration = Duration::from_millis(50);
const LOCK_TTL_MS: u64 = 8_000;

// Only the holder that set the value may delete the key.
const RELEASE_SCRIPT: &str = r#"if redis.call("get", KEYS[1]) == ARGV[1] then
  return redis.call("del", KEYS[1])
else
  return 0
end"#;

/// Proof of a held lock. Carries a fencing value so a release can never tear
/// down a lock that expired and was re-acquired elsewhere.
#[derive(Debug)]
pub struct LockToken {
    key: String,
    value: String,
}

impl LockToken {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            value: uuid7::uuid7().to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error("'{key}' is locked by another writer")]
    Contended { key: String },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub trait IdentityLock: Send + Sync {
    /// Claim the key, retrying up to `max_retries` times before giving up
    /// with [`LockError::Contended`].
    fn acquire(&self, key: &str, max_retries: u32) -> Result<LockToken, LockError>;

    /// Give the key back. Returns whether this token still held it.
    fn release(&self, token: LockToken) -> Result<bool, LockError>;
}

/// In-process lock table: a busy-set of held keys with bounded retry.
#[derive(Default)]
pub struct LocalLockTable {
    held: Mutex<HashSet<String>>,
}

impl LocalLockTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityLock for LocalLockTable {
    fn acquire(&self, key: &str, max_retries: u32) -> Result<LockToken, LockError> {
        for attempt in 0..=max_retries {
            {
                let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
                if held.insert(key.to_string()) {
                    return Ok(LockToken::new(key));
                }
            }
            if attempt < max_retries {
                thread::sleep(RETRY_DELAY);
            }
        }

        Err(LockError::Contended {
            key: key.to_string(),
        })
    }

    fn release(&self, token: LockToken) -> Result<bool, LockError> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        Ok(held.remove(&token.key))
    }
}

/// Distributed lock over Redis: `SET key value NX PX ttl` to claim, a
/// check-and-delete script to release. The TTL reclaims locks leaked by a
/// crashed holder.
pub struct RedisIdentityLock {
    client: redis::Client,
}

impl RedisIdentityLock {
    pub fn open(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }

    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

impl IdentityLock for RedisIdentityLock {
    fn acquire(&self, key: &str, max_retries: u32) -> Result<LockToken, LockError> {
        let token = LockToken::new(key);
        let mut conn = self.client.get_connection().map_err(anyhow::Error::from)?;

        for attempt in 0..=max_retries {
            let claimed: Option<String> = redis::cmd("SET")
                .arg(&token.key)
                .arg(&token.value)
                .arg("NX")
                .arg("PX")
                .arg(LOCK_TTL_MS)
                .query(&mut conn)
                .map_err(anyhow::Error::from)?;
            if claimed.is_some() {
                return Ok(token);
            }
            if attempt < max_retries {
                thread::sleep(RETRY_DELAY);
            }
        }

        Err(LockError::Contended {
            key: key.to_string(),
        })
    }

    fn release(&self, token: LockToken) -> Result<bool, LockError> {
        let mut conn = self.client.get_connection().map_err(anyhow::Error::from)?;
        let removed: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&token.key)
            .arg(&token.value)
            .invoke(&mut conn)
            .map_err(anyhow::Error::from)?;

        Ok(removed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_frees_the_key() {
        let locks = LocalLockTable::new();

        let token = locks.acquire("svc@DEV", 0).unwrap();
        assert_eq!(token.key(), "svc@DEV");
        assert!(locks.release(token).unwrap());

        // free again
        let token = locks.acquire("svc@DEV", 0).unwrap();
        assert!(locks.release(token).unwrap());
    }

    #[test]
    fn held_key_is_contended() {
        let locks = LocalLockTable::new();
        let _held = locks.acquire("svc@DEV", 0).unwrap();

        let second = locks.acquire("svc@DEV", 0);
        assert!(matches!(second, Err(LockError::Contended { .. })));
    }

    #[test]
    fn distinct_keys_do_not_contend() {
        let locks = LocalLockTable::new();
        let _dev = locks.acquire("svc@DEV", 0).unwrap();
        let _uat = locks.acquire("svc@UAT", 0).unwrap();
    }

    #[test]
    fn releasing_an_unknown_key_reports_false() {
        let locks = LocalLockTable::new();
        assert!(!locks.release(LockToken::new("never-held")).unwrap());
    }

    #[test]
    fn tokens_carry_unique_fencing_values() {
        let a = LockToken::new("k");
        let b = LockToken::new("k");
        assert_ne!(a.value, b.value);
    }
}
