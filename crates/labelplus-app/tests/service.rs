use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use labelplus_app::{AppError, LabelPlusService, RetryPolicy, ServiceDeps};
use labelplus_config::{ConfigDocument, ConfigPersistence, JsonFileStore, LabelRecord, MemoryStore};
use labelplus_core::CoreError;
use labelplus_events::{Event, EventBus};
use labelplus_telemetry::Metrics;
use labelplus_test_support::FakeHost;
use labelplus_test_support::fixtures::{downloading, torrent};
use serde_json::{Value, json};
use tokio::time::sleep;

fn service_with(
    host: &Arc<FakeHost>,
    store: Arc<dyn ConfigPersistence>,
) -> Result<LabelPlusService> {
    let deps = ServiceDeps::new(host.clone(), EventBus::with_capacity(32), store, Metrics::new()?)
        .with_save_interval(Duration::from_millis(20));
    Ok(LabelPlusService::new(deps))
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    false
}

fn not_initialized(result: &Result<Value, AppError>) -> bool {
    matches!(
        result,
        Err(AppError::Core {
            source: CoreError::CoreNotInitialized,
            ..
        })
    )
}

#[tokio::test]
async fn operations_are_gated_on_initialization() -> Result<()> {
    let host = Arc::new(FakeHost::new());
    let store = Arc::new(MemoryStore::new());
    let service = service_with(&host, store.clone())?;

    assert_eq!(service.call("is_initialized", &Value::Null)?, json!(false));
    assert!(not_initialized(&service.call(
        "add_label",
        &json!({ "parent_id": "", "name": "Early" })
    )));

    service.enable()?;
    assert!(service.is_initialized());
    let id = service.call("add_label", &json!({ "parent_id": "", "name": "Movies" }))?;
    assert_eq!(id, json!("0"));

    service.disable().await?;
    assert!(!service.is_initialized());
    assert!(not_initialized(&service.call("get_label_updates", &Value::Null)));
    let saved = store.snapshot().expect("document saved on disable");
    assert_eq!(saved.labels["0"].name, "Movies");
    Ok(())
}

#[tokio::test]
async fn enabling_before_session_start_waits_for_the_event() -> Result<()> {
    let host = Arc::new(FakeHost::new());
    host.set_session_started(false);
    let service = service_with(&host, Arc::new(MemoryStore::new()))?;

    service.enable()?;
    sleep(Duration::from_millis(30)).await;
    assert!(!service.is_initialized());

    service.events().publish(Event::SessionStarted);
    assert!(eventually(|| service.is_initialized()).await);
    service.disable().await?;
    Ok(())
}

#[tokio::test]
async fn disabling_while_waiting_cancels_initialization() -> Result<()> {
    let host = Arc::new(FakeHost::new());
    host.set_session_started(false);
    let service = service_with(&host, Arc::new(MemoryStore::new()))?;

    service.enable()?;
    service.disable().await?;
    service.events().publish(Event::SessionStarted);
    sleep(Duration::from_millis(50)).await;
    assert!(!service.is_initialized());
    Ok(())
}

#[tokio::test]
async fn torrents_added_right_after_session_start_are_autolabeled() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let first = service_with(&Arc::new(FakeHost::new()), store.clone())?;
    first.enable()?;
    let id = first.call("add_label", &json!({ "parent_id": "", "name": "Linux" }))?;
    first.call(
        "set_label_options",
        &json!({
            "label_id": id,
            "options": {
                "autolabel_settings": true,
                "autolabel_rules": [["Name", "contains", "ignore case", "linux"]]
            }
        }),
    )?;
    first.disable().await?;

    let host = Arc::new(FakeHost::new());
    host.set_session_started(false);
    let service = service_with(&host, store)?;
    service.enable()?;

    host.add_torrent("iso", torrent("arch-linux.iso"));
    service.events().publish(Event::SessionStarted);
    service.events().publish(Event::TorrentAdded {
        torrent_id: "iso".into(),
    });

    let labeled = eventually(|| {
        service
            .call("get_torrent_label", &json!({ "torrent_id": "iso" }))
            .is_ok_and(|label| label == id)
    })
    .await;
    assert!(labeled);
    service.disable().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disable_racing_deferred_initialization_leaves_service_down() -> Result<()> {
    for _ in 0..20 {
        let host = Arc::new(FakeHost::new());
        host.set_session_started(false);
        let service = service_with(&host, Arc::new(MemoryStore::new()))?;
        service.enable()?;

        let publisher = service.clone();
        let start = tokio::spawn(async move {
            publisher.events().publish(Event::SessionStarted);
        });
        service.disable().await?;
        start.await?;

        assert!(!service.is_initialized());
        assert!(not_initialized(&service.call("get_label_updates", &Value::Null)));
    }
    Ok(())
}

#[tokio::test]
async fn host_events_drive_the_engine() -> Result<()> {
    let host = Arc::new(FakeHost::new());
    let service = service_with(&host, Arc::new(MemoryStore::new()))?;
    service.enable()?;

    let id = service.call("add_label", &json!({ "parent_id": "", "name": "Linux" }))?;
    service.call(
        "set_label_options",
        &json!({
            "label_id": id,
            "options": {
                "autolabel_settings": true,
                "autolabel_rules": [["Name", "contains", "ignore case", "linux"]]
            }
        }),
    )?;

    host.add_torrent("iso", torrent("Arch-Linux.iso"));
    service.events().publish(Event::TorrentAdded {
        torrent_id: "iso".into(),
    });
    let labeled = eventually(|| {
        service
            .call("get_torrent_label", &json!({ "torrent_id": "iso" }))
            .is_ok_and(|label| label == id)
    })
    .await;
    assert!(labeled);
    assert_eq!(service.metrics().snapshot().autolabel_matches_total, 1);

    host.remove_torrent("iso");
    service.events().publish(Event::TorrentRemoved {
        torrent_id: "iso".into(),
    });
    let unmapped = eventually(|| {
        service
            .call("get_torrent_label", &json!({ "torrent_id": "iso" }))
            .is_ok_and(|label| label == json!("None"))
    })
    .await;
    assert!(unmapped);
    service.disable().await?;
    Ok(())
}

#[tokio::test]
async fn shared_limits_are_pushed_by_the_background_loop() -> Result<()> {
    let host = Arc::new(FakeHost::new());
    host.add_torrent("a", downloading("a", 80.0));
    host.add_torrent("b", downloading("b", 40.0));
    let mut document = ConfigDocument::default();
    document.prefs.options.shared_limit_interval = 1;
    let mut pool = LabelRecord {
        name: "Pool".into(),
        ..LabelRecord::default()
    };
    pool.options.bandwidth_settings = true;
    pool.options.shared_limit = true;
    pool.options.max_download_speed = 100.0;
    document.labels.insert("0".into(), pool);
    document.mappings.insert("a".into(), "0".into());
    document.mappings.insert("b".into(), "0".into());

    let service = service_with(&host, Arc::new(MemoryStore::with_document(document)))?;
    service.enable()?;
    let redistributed = eventually(|| {
        host.settings("a")
            .max_download_speed
            .is_some_and(|limit| (limit - 66.67).abs() < 0.01)
    })
    .await;
    assert!(redistributed);
    assert!(service.metrics().snapshot().shared_limit_cycles_total >= 1);
    service.disable().await?;
    Ok(())
}

#[tokio::test]
async fn changes_are_saved_periodically() -> Result<()> {
    let host = Arc::new(FakeHost::new());
    let store = Arc::new(MemoryStore::new());
    let service = service_with(&host, store.clone())?;
    service.enable()?;
    let initial = store.save_count();

    service.call("add_label", &json!({ "parent_id": "", "name": "Books" }))?;
    assert!(eventually(|| store.save_count() > initial).await);
    let saved = store.snapshot().expect("periodic save");
    assert_eq!(saved.labels["0"].name, "Books");

    let settled = store.save_count();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(store.save_count(), settled, "unchanged state is not re-saved");
    service.disable().await?;
    Ok(())
}

#[tokio::test]
async fn json_store_survives_a_restart() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let host = Arc::new(FakeHost::new());
    host.add_torrent("t", torrent("t"));
    let store = || -> Arc<dyn ConfigPersistence> {
        Arc::new(JsonFileStore::new(dir.path().join("labelplus.json")))
    };

    let first = service_with(&host, store())?;
    first.enable()?;
    let parent = first.call("add_label", &json!({ "parent_id": "", "name": "TV" }))?;
    let child = first.call("add_label", &json!({ "parent_id": parent, "name": "Drama" }))?;
    first.call(
        "set_torrent_labels",
        &json!({ "label_id": child, "torrent_ids": ["t"] }),
    )?;
    first.disable().await?;

    let second = service_with(&host, store())?;
    second.enable()?;
    let labels = second.call("get_torrent_labels", &json!({ "torrent_ids": ["t"] }))?;
    assert_eq!(labels, json!({ "t": ["0:0", "TV/Drama"] }));
    second.disable().await?;
    Ok(())
}

#[tokio::test]
async fn polling_retries_until_the_engine_is_ready() -> Result<()> {
    let host = Arc::new(FakeHost::new());
    let service = service_with(&host, Arc::new(MemoryStore::new()))?;
    let quick = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(10),
        deadline: Duration::from_secs(2),
    };

    let exhausted = service.poll_label_updates_with_retry(None, quick).await;
    assert!(matches!(
        exhausted,
        Err(AppError::MaxRetriesExceeded { attempts: 3, .. })
    ));

    let slow = RetryPolicy {
        max_attempts: 100,
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(50),
        deadline: Duration::from_millis(120),
    };
    let timed_out = service.poll_label_updates_with_retry(None, slow).await;
    assert!(matches!(timed_out, Err(AppError::TimedOut { .. })));

    let background = service.clone();
    let enabler = tokio::spawn(async move {
        sleep(Duration::from_millis(40)).await;
        background.enable()
    });
    let patient = RetryPolicy {
        max_attempts: 50,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
        deadline: Duration::from_secs(5),
    };
    let update = service
        .poll_label_updates_with_retry(None, patient)
        .await?
        .expect("first poll returns a snapshot");
    assert_eq!(update.data["All"].count, 0);
    enabler.await??;
    service.disable().await?;
    Ok(())
}
