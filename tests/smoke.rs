// ABOUTME: End-to-end smoke test for the full initiative persistence lifecycle.
// ABOUTME: Tests config-driven setup, record CRUD, backup and restore, export/import, and a turn timer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use initiative_core::RecordKind;
use initiative_store::{BackendKind, SaveConfig, SaveManager};
use initiative_timer::{TimerEvent, TimerOptions, TimerService, TimerStatus};
use serde_json::json;

/// Helper to build a manager from INITIATIVE_* variables rooted at `home`.
async fn manager_at(home: &std::path::Path, vars: &[(&str, &str)]) -> SaveManager {
    let mut env: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    env.insert(
        "INITIATIVE_HOME".to_string(),
        home.to_string_lossy().into_owned(),
    );
    let config = SaveConfig::from_lookup(|var| env.get(var).cloned()).unwrap();
    config.build_manager().await.unwrap()
}

#[tokio::test]
async fn smoke_test_full_lifecycle() {
    // 1. Document-backed manager in a temp home
    let dir = tempfile::TempDir::new().unwrap();
    let home = dir.path().join("home");
    let manager = manager_at(&home, &[]).await;
    assert_eq!(manager.default_backend(), BackendKind::Document);

    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);
    manager.add_listener_fn(move |event| seen.lock().unwrap().push(event.name()));

    // 2. Save, list, and load an encounter
    manager
        .save_encounter(
            "goblin-ambush",
            json!({
                "combatants": [
                    {"name": "Goblin", "hp": 7, "initiative": 14},
                    {"name": "Aria", "hp": 22, "initiative": 17}
                ],
                "round": 1
            }),
        )
        .await
        .unwrap();
    manager
        .save_player("aria", json!({"classes": ["ranger"], "abilities": {"dex": 16}}))
        .await
        .unwrap();

    let encounters = manager.get_all_encounters().await.unwrap();
    assert_eq!(encounters.len(), 1);
    assert_eq!(encounters[0].name, "goblin-ambush");
    let loaded = manager.load_encounter("goblin-ambush").await.unwrap();
    assert_eq!(loaded.payload["combatants"][0]["name"], json!("Goblin"));

    // 3. Back up, delete, and restore
    let backup = manager.create_backup().await.unwrap();
    manager.delete_encounter("goblin-ambush").await.unwrap();
    assert!(manager.load_encounter("goblin-ambush").await.unwrap_err().is_not_found());

    let restored = manager.restore_backup(&backup.meta.name).await.unwrap();
    assert_eq!(restored, 2);
    let again = manager.load_encounter("goblin-ambush").await.unwrap();
    assert_eq!(again.payload_value(), loaded.payload_value());

    // 4. Export from the document store and import into a key-value store
    let exported = manager
        .export_record(RecordKind::Encounter, "goblin-ambush")
        .await
        .unwrap();
    let players = manager.export_collection(RecordKind::Player).await.unwrap();

    let other_home = dir.path().join("other");
    let kv = manager_at(&other_home, &[("INITIATIVE_BACKEND", "keyvalue")]).await;
    let (kind, _) = kv.import_json(&exported).await.unwrap();
    assert_eq!(kind, RecordKind::Encounter);
    assert_eq!(kv.import_collection_json(&players).await.unwrap(), 1);
    assert_eq!(kv.load_player("aria").await.unwrap().payload["abilities"]["dex"], json!(16));
    assert!(other_home.join("keyvalue.json").exists());

    // 5. Listeners saw the lifecycle
    let names = events.lock().unwrap().clone();
    for expected in [
        "encounterSaved",
        "playerSaved",
        "backupCreated",
        "encounterDeleted",
        "encounterLoadFailed",
        "backupRestored",
        "recordExported",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing {expected} in {names:?}");
    }

    // 6. Data survives reopening the same home
    drop(manager);
    let reopened = manager_at(&home, &[]).await;
    assert_eq!(reopened.get_backups().await.unwrap().len(), 1);
    assert!(reopened.load_player("aria").await.is_ok());
}

#[tokio::test]
async fn smoke_test_directory_backend_with_fallback() {
    let dir = tempfile::TempDir::new().unwrap();

    // Without a records directory the directory backend is unavailable
    let fallback = manager_at(
        dir.path(),
        &[
            ("INITIATIVE_BACKEND", "directory"),
            ("INITIATIVE_FALLBACK_BACKEND", "document"),
        ],
    )
    .await;
    assert_eq!(fallback.default_backend(), BackendKind::Document);

    // With one, records land as files
    let records = dir.path().join("records");
    let manager = manager_at(
        dir.path(),
        &[
            ("INITIATIVE_BACKEND", "directory"),
            ("INITIATIVE_RECORDS_DIR", records.to_str().unwrap()),
        ],
    )
    .await;
    manager
        .save_monster("owlbear", json!({"cr": 3, "hp": 59, "ac": 13}))
        .await
        .unwrap();
    assert!(records.join("monster").join("owlbear.json").exists());
    assert_eq!(manager.get_all_monsters().await.unwrap()[0].name, "owlbear");
}

#[tokio::test(start_paused = true)]
async fn smoke_test_turn_timer() {
    let service = TimerService::new();
    let mut rx = service.subscribe();
    let id = service
        .create_timer(
            None,
            TimerOptions::new(Duration::from_secs(3)).warning(Duration::from_secs(1)),
        )
        .unwrap();

    service.start_timer(&id).unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;

    let snapshot = service.get_timer(&id).unwrap();
    assert_eq!(snapshot.status, TimerStatus::Completed);

    let mut completed = false;
    while let Ok(event) = rx.try_recv() {
        if let TimerEvent::Completed(s) = event {
            assert_eq!(s.id, id);
            completed = true;
        }
    }
    assert!(completed);
}
