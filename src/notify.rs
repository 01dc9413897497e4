//! Asynchronous fan-out of approval events, decoupled from the caller.
//!
//! Approvals are queued on a bounded channel and drained by a fixed pool of
//! worker threads. The backpressure policy is block-on-full: nothing is ever
//! dropped while the process lives, and a caller only stalls in the
//! pathological case of [`QUEUE_DEPTH`] jobs already waiting. A publish
//! failure is logged and forgotten; the approval it belonged to stands.
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::config::Environment;
use crate::publish::Publisher;

/// Channel every approval event is delivered to.
pub const APPROVAL_CHANNEL: &str = "config-approvals";

const MAX_WORKERS: usize = 64;
const QUEUE_DEPTH: usize = 1024;

/// Wire payload published when a revision is approved.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalEvent {
    pub config_name: String,
    pub env: Environment,
    pub id_revision: i64,
}

impl ApprovalEvent {
    pub fn new(config_name: &str, env: Environment, id_revision: i64) -> Self {
        Self {
            config_name: config_name.to_string(),
            env,
            id_revision,
        }
    }
}

pub struct ApprovalDispatcher {
    queue: Sender<ApprovalEvent>,
    workers: Vec<JoinHandle<()>>,
}

impl ApprovalDispatcher {
    pub fn start(publisher: Arc<dyn Publisher>) -> Self {
        Self::with_capacity(publisher, MAX_WORKERS, QUEUE_DEPTH)
    }

    pub fn with_capacity(
        publisher: Arc<dyn Publisher>,
        workers: usize,
        queue_depth: usize,
    ) -> Self {
        let (queue, jobs) = crossbeam_channel::bounded(queue_depth);
        let workers = (0..workers.max(1))
            .map(|_| {
                let jobs: Receiver<ApprovalEvent> = jobs.clone();
                let publisher = Arc::clone(&publisher);
                thread::spawn(move || {
                    while let Ok(event) = jobs.recv() {
                        publish_approval(publisher.as_ref(), &event);
                    }
                })
            })
            .collect();

        Self { queue, workers }
    }

    /// Fire-and-forget. The event is serialized and published on a worker
    /// thread; the caller never learns whether delivery succeeded.
    pub fn dispatch(&self, event: ApprovalEvent) {
        if self.queue.send(event).is_err() {
            warn!("approval queue is closed; event dropped");
        }
    }
}

fn publish_approval(publisher: &dyn Publisher, event: &ApprovalEvent) {
    let payload = match serde_json::to_vec(event) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(config = %event.config_name, error = %err, "could not encode approval event");
            return;
        }
    };

    match publisher.publish(APPROVAL_CHANNEL, &payload) {
        Ok(()) => debug!(
            config = %event.config_name,
            env = %event.env,
            revision = event.id_revision,
            "approval published"
        ),
        Err(err) => warn!(
            config = %event.config_name,
            env = %event.env,
            revision = event.id_revision,
            error = %err,
            "approval notification dropped"
        ),
    }
}

impl Drop for ApprovalDispatcher {
    fn drop(&mut self) {
        // Swap in a disconnected sender so the workers drain what is queued
        // and exit, then wait for them.
        let (closed, _) = crossbeam_channel::bounded(0);
        drop(std::mem::replace(&mut self.queue, closed));
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::MemoryPublisher;
    use std::time::Duration;

    #[test]
    fn approval_event_wire_shape() {
        let event = ApprovalEvent::new("svc", Environment::Dev, 3);

        let payload = serde_json::to_string(&event).unwrap();
        assert_eq!(payload, r#"{"configName":"svc","env":"DEV","idRevision":3}"#);

        let back: ApprovalEvent = serde_json::from_str(&payload).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn dispatched_events_reach_the_channel() {
        let publisher = Arc::new(MemoryPublisher::new());
        let dispatcher = ApprovalDispatcher::with_capacity(publisher.clone(), 2, 8);

        for id in 1..=5 {
            dispatcher.dispatch(ApprovalEvent::new("svc", Environment::Staging, id));
        }

        assert!(publisher.wait_for(5, Duration::from_secs(1)));
        for (channel, _) in publisher.published() {
            assert_eq!(channel, APPROVAL_CHANNEL);
        }
    }

    #[test]
    fn drop_drains_the_queue() {
        let publisher = Arc::new(MemoryPublisher::new());
        let dispatcher = ApprovalDispatcher::with_capacity(publisher.clone(), 1, 8);

        for id in 1..=3 {
            dispatcher.dispatch(ApprovalEvent::new("svc", Environment::Uat, id));
        }
        drop(dispatcher);

        assert_eq!(publisher.published().len(), 3);
    }
}
