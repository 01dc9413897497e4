//! Concurrent updates must serialize through the identity lock: the store's
//! read-modify-write cycle would otherwise let a later writer silently drop
//! revisions appended by an earlier one.

use std::sync::Arc;
use std::thread;

use tempfile::tempdir;

use config_approval::publish::MemoryPublisher;
use config_approval::store::SledConfigStore;
use config_approval::{ConfigService, Environment, RevisionQuery, UpdateRequest};

fn shared_service(db_name: &str) -> anyhow::Result<(Arc<ConfigService>, tempfile::TempDir)> {
    let temp_dir = tempdir()?;
    let db = Arc::new(sled::open(temp_dir.path().join(db_name))?);
    let store = Arc::new(SledConfigStore::new(db));
    let publisher = Arc::new(MemoryPublisher::new());

    Ok((Arc::new(ConfigService::new(store, publisher)), temp_dir))
}

#[test]
fn parallel_copies_keep_ids_dense() -> anyhow::Result<()> {
    let (service, _guard) = shared_service("parallel_copies.db")?;

    service.create_config("svc", Environment::Dev, "seed", "alice")?;

    let mut writers = Vec::new();
    for n in 0..8 {
        let service = Arc::clone(&service);
        writers.push(thread::spawn(move || {
            service.update_config(
                "svc",
                Environment::Dev,
                UpdateRequest::new().as_copy().set_value(&format!("writer-{n}")),
            )
        }));
    }
    for writer in writers {
        writer.join().expect("writer panicked")?;
    }

    // every append survived: ids 1..=9 with no gaps and no repeats
    let config = service.get_config("svc", Environment::Dev, RevisionQuery::AllRevisions)?;
    let mut ids: Vec<i64> = config.revisions.iter().map(|revision| revision.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=9).collect::<Vec<i64>>());

    Ok(())
}

#[test]
fn distinct_identities_do_not_block_each_other() -> anyhow::Result<()> {
    let (service, _guard) = shared_service("distinct_identities.db")?;

    service.create_config("svc", Environment::Dev, "a", "alice")?;
    service.create_config("svc", Environment::Production, "b", "bob")?;

    let dev = {
        let service = Arc::clone(&service);
        thread::spawn(move || {
            service.update_config(
                "svc",
                Environment::Dev,
                UpdateRequest::new().set_value("a2"),
            )
        })
    };
    let prod = {
        let service = Arc::clone(&service);
        thread::spawn(move || {
            service.update_config(
                "svc",
                Environment::Production,
                UpdateRequest::new().set_value("b2"),
            )
        })
    };

    let dev = dev.join().expect("dev writer panicked")?;
    let prod = prod.join().expect("prod writer panicked")?;

    assert_eq!(dev.revisions[0].value, "a2");
    assert_eq!(prod.revisions[0].value, "b2");

    Ok(())
}
