//! Notification transport: deliver a byte payload to a named channel.
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

#[derive(thiserror::Error, Debug)]
#[error("publish to '{channel}' failed: {source}")]
pub struct PublishError {
    channel: String,
    #[source]
    source: anyhow::Error,
}

impl PublishError {
    pub fn new(channel: &str, source: anyhow::Error) -> Self {
        Self {
            channel: channel.to_string(),
            source,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

pub trait Publisher: Send + Sync {
    fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), PublishError>;
}

/// Redis `PUBLISH` transport. Delivery is at-most-once: subscribers that are
/// not connected at publish time never see the message.
pub struct RedisPublisher {
    client: redis::Client,
}

impl RedisPublisher {
    pub fn open(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }

    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

impl Publisher for RedisPublisher {
    fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|err| PublishError::new(channel, err.into()))?;
        let _receivers: i64 = redis::Commands::publish(&mut conn, channel, payload)
            .map_err(|err| PublishError::new(channel, err.into()))?;

        Ok(())
    }
}

/// Records every publish in memory. Used by the tests and the demo; also handy
/// as a stand-in while wiring a deployment that has no broker yet.
#[derive(Default)]
pub struct MemoryPublisher {
    messages: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Poll until at least `count` messages arrived or the timeout passes.
    /// Returns whether the count was reached.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.published().len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.published().len() >= count
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((channel.to_string(), payload.to_vec()));
        Ok(())
    }
}
