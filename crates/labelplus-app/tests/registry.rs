use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use labelplus_app::{AppError, LabelPlusService, OPERATIONS, ServiceDeps};
use labelplus_config::{ConfigError, MemoryStore};
use labelplus_core::CoreError;
use labelplus_events::EventBus;
use labelplus_telemetry::Metrics;
use labelplus_test_support::FakeHost;
use labelplus_test_support::fixtures::{seeding, torrent};
use serde_json::{Value, json};

fn enabled(host: &Arc<FakeHost>, store: &Arc<MemoryStore>) -> Result<LabelPlusService> {
    let deps = ServiceDeps::new(host.clone(), EventBus::new(), store.clone(), Metrics::new()?)
        .with_save_interval(Duration::from_secs(3600));
    let service = LabelPlusService::new(deps);
    service.enable()?;
    Ok(service)
}

#[tokio::test]
async fn every_registered_operation_is_reachable() -> Result<()> {
    let host = Arc::new(FakeHost::new());
    let service = enabled(&host, &Arc::new(MemoryStore::new()))?;
    for (name, _) in OPERATIONS {
        let result = service.call(name, &Value::Null);
        assert!(
            !matches!(result, Err(AppError::UnknownOperation { .. })),
            "{name} should dispatch"
        );
    }
    assert!(matches!(
        service.call("launch_rockets", &Value::Null),
        Err(AppError::UnknownOperation { .. })
    ));
    service.disable().await?;
    Ok(())
}

#[tokio::test]
async fn label_lifecycle_through_the_registry() -> Result<()> {
    let host = Arc::new(FakeHost::new());
    host.add_torrent("a", seeding("a", 8.0));
    host.add_torrent("b", torrent("b"));
    let service = enabled(&host, &Arc::new(MemoryStore::new()))?;

    let info = service.call("get_daemon_info", &Value::Null)?;
    assert_eq!(info["path_separator"], json!(std::path::MAIN_SEPARATOR_STR));

    let movies = service.call("add_label", &json!({ "parent_id": "", "name": "Movies" }))?;
    let tv = service.call("add_label", &json!({ "parent_id": "", "name": "TV" }))?;
    let moved = service.call(
        "move_label",
        &json!({ "label_id": movies, "dest_parent_id": tv, "dest_name": "Films" }),
    )?;
    assert_eq!(moved, json!("1:0"));
    service.call("rename_label", &json!({ "label_id": tv, "name": "Video" }))?;

    service.call(
        "set_torrent_labels",
        &json!({ "label_id": moved, "torrent_ids": ["a", "b"] }),
    )?;
    let usage = service.call(
        "get_label_bandwidth_usage",
        &json!({ "label_id": tv, "include_descendants": true }),
    )?;
    assert_eq!(usage, json!([0.0, 8192.0]));
    let filtered = service.call(
        "filter_by_label",
        &json!({ "torrent_ids": ["a", "b", "c"], "label_ids": [moved] }),
    )?;
    assert_eq!(filtered, json!(["a", "b"]));

    let updates = service.call("get_label_updates", &Value::Null)?;
    assert_eq!(updates["data"]["1:0"]["full_name"], json!("Video/Films"));
    assert_eq!(updates["data"]["1:0"]["count"], json!(2));
    let token = updates["token"].clone();
    assert_eq!(
        service.call("get_label_updates", &json!({ "since": token }))?,
        Value::Null
    );

    service.call("remove_label", &json!({ "label_id": tv }))?;
    assert_eq!(
        service.call("get_torrent_label", &json!({ "torrent_id": "a" }))?,
        json!("None")
    );
    service.disable().await?;
    Ok(())
}

#[tokio::test]
async fn option_patches_merge_onto_current_values() -> Result<()> {
    let host = Arc::new(FakeHost::new());
    let store = Arc::new(MemoryStore::new());
    let service = enabled(&host, &store)?;
    let id = service.call("add_label", &json!({ "parent_id": "", "name": "Capped" }))?;

    service.call(
        "set_label_options",
        &json!({
            "label_id": id,
            "options": { "bandwidth_settings": true, "max_connections": 20 },
        }),
    )?;
    let options = service.call("get_label_options", &json!({ "label_id": id }))?;
    assert_eq!(options["max_connections"], json!(20));
    assert_eq!(options["max_upload_slots"], json!(-1));

    let paths = service.call("get_path_options", &json!({ "label_id": id }))?;
    assert_eq!(paths["download_location"]["subfolder"], json!("/downloads/Capped"));
    let parent = service.call(
        "get_parent_path",
        &json!({ "label_id": id, "path_kind": "move_completed" }),
    )?;
    assert_eq!(parent, json!("/completed"));

    let saves = store.save_count();
    service.call(
        "set_preferences",
        &json!({ "options": { "move_on_changes": true, "shared_limit_interval": 0 } }),
    )?;
    assert_eq!(store.save_count(), saves + 1);
    let prefs = service.call("get_preferences", &Value::Null)?;
    assert_eq!(prefs["options"]["move_on_changes"], json!(true));
    assert_eq!(prefs["options"]["shared_limit_interval"], json!(1));
    let defaults = service.call("get_label_defaults", &Value::Null)?;
    assert_eq!(defaults["max_connections"], json!(-1));
    service.disable().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_option_patches_do_not_overwrite_each_other() -> Result<()> {
    let host = Arc::new(FakeHost::new());
    let service = enabled(&host, &Arc::new(MemoryStore::new()))?;
    let id = service.call("add_label", &json!({ "parent_id": "", "name": "Shared" }))?;

    let writer = |field: &'static str| {
        let service = service.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            for value in 1..=50 {
                service.call(
                    "set_label_options",
                    &json!({ "label_id": id, "options": { field: value } }),
                )?;
            }
            Ok(())
        })
    };
    let connections = writer("max_connections");
    let slots = writer("max_upload_slots");
    connections.await??;
    slots.await??;

    let options = service.call("get_label_options", &json!({ "label_id": id }))?;
    assert_eq!(options["max_connections"], json!(50));
    assert_eq!(options["max_upload_slots"], json!(50));
    service.disable().await?;
    Ok(())
}

#[tokio::test]
async fn bad_requests_are_rejected_before_touching_state() -> Result<()> {
    let host = Arc::new(FakeHost::new());
    let service = enabled(&host, &Arc::new(MemoryStore::new()))?;
    let id = service.call("add_label", &json!({ "parent_id": "", "name": "Solo" }))?;

    assert!(matches!(
        service.call("add_label", &json!({ "parent_id": "" })),
        Err(AppError::InvalidArguments { operation: "add_label", .. })
    ));
    assert!(matches!(
        service.call("get_parent_path", &json!({ "label_id": id, "path_kind": "sideways" })),
        Err(AppError::Core {
            source: CoreError::InvalidPathKind { .. },
            ..
        })
    ));
    assert!(matches!(
        service.call(
            "set_label_options",
            &json!({ "label_id": id, "options": { "max_connections": "many" } })
        ),
        Err(AppError::Config {
            source: ConfigError::InvalidField { .. },
            ..
        })
    ));
    assert!(matches!(
        service.call(
            "move_label",
            &json!({ "label_id": id, "dest_parent_id": id, "dest_name": "x" }),
        ),
        Err(AppError::Core {
            source: CoreError::InvalidParent { .. },
            ..
        })
    ));
    assert!(matches!(
        service.call("add_label", &json!({ "parent_id": "", "name": "Solo" })),
        Err(AppError::Core {
            source: CoreError::LabelExists { .. },
            ..
        })
    ));
    let updates = service.call("get_label_updates", &Value::Null)?;
    assert_eq!(updates["data"].as_object().map(serde_json::Map::len), Some(3));
    service.disable().await?;
    Ok(())
}
