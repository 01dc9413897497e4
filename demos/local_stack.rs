use std::sync::Arc;
use std::time::Duration;

use config_approval::publish::MemoryPublisher;
use config_approval::store::SledConfigStore;
use config_approval::{ConfigService, Environment, RevisionQuery, RevisionState, UpdateRequest};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let db = sled::open("configs-db")?;
    if !db.is_empty() {
        db.clear()?;
    }

    let store = Arc::new(SledConfigStore::new(Arc::new(db)));
    let publisher = Arc::new(MemoryPublisher::new());
    let service = ConfigService::new(store, publisher.clone());

    let config = service.create_config(
        "payments",
        Environment::Dev,
        r#"{"timeout_ms": 250}"#,
        "alice",
    )?;
    println!("created:\n{}", serde_json::to_string_pretty(&config)?);

    // edit the seed revision in place, then approve it
    service.update_config(
        "payments",
        Environment::Dev,
        UpdateRequest::new()
            .set_value(r#"{"timeout_ms": 500}"#)
            .set_author("bob"),
    )?;
    service.update_config(
        "payments",
        Environment::Dev,
        UpdateRequest::new()
            .set_state(RevisionState::Approved)
            .set_author("carol"),
    )?;

    // the approved revision is frozen now; keep editing through a copy
    let config = service.update_config(
        "payments",
        Environment::Dev,
        UpdateRequest::new()
            .as_copy()
            .target_revision(1)
            .set_value(r#"{"timeout_ms": 750}"#),
    )?;
    println!("after copy:\n{}", serde_json::to_string_pretty(&config)?);

    let live = service.get_config("payments", Environment::Dev, RevisionQuery::LatestApproved)?;
    println!("live revision:\n{}", serde_json::to_string_pretty(&live)?);

    publisher.wait_for(1, Duration::from_secs(1));
    for (channel, payload) in publisher.published() {
        println!(
            "published on '{channel}': {}",
            String::from_utf8_lossy(&payload)
        );
    }

    Ok(())
}
