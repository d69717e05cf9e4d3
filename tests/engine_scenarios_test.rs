//! End-to-end engine scenarios: first run, context edits, overrides, reload.

mod common;

use ballast::settings::{LayerSource, NORMAL_CONTEXT, PREVIEW_CONTEXT};
use ballast::storage::{StorageKey, Tier};
use ballast::{EngineEvent, Error, Lifecycle, PersistenceState, SettingValue, SettingsEngine};
use common::{GatedDriver, MemoryTiers, TEST_DEBOUNCE, TestEnv, last_written, store_json};
use serde_json::json;

#[tokio::test]
async fn test_first_run_effective_equals_base() {
    let tiers = MemoryTiers::new();
    let engine = tiers.engine().await;

    let doc = engine.document();
    let effective = engine.get_effective(NORMAL_CONTEXT).unwrap();

    assert_eq!(effective.len(), doc.base.len());
    for (path, value) in doc.base.iter() {
        assert_eq!(effective.get(path.as_str()), Some(value), "field {}", path);
        assert_eq!(effective.source(path.as_str()), Some(&LayerSource::Base));
    }
    assert!(doc.context(NORMAL_CONTEXT).unwrap().is_empty());
}

#[tokio::test]
async fn test_context_field_scoped_to_its_context() {
    let tiers = MemoryTiers::new();
    let engine = tiers.engine().await;

    engine
        .set_context_field(NORMAL_CONTEXT, "gridSpacing", 10)
        .unwrap();

    let normal = engine.get_effective(NORMAL_CONTEXT).unwrap();
    let preview = engine.get_effective(PREVIEW_CONTEXT).unwrap();
    assert_eq!(normal.get_integer("gridSpacing"), Some(10));
    assert_eq!(
        normal.source("gridSpacing"),
        Some(&LayerSource::Context(NORMAL_CONTEXT.to_string()))
    );
    assert_eq!(preview.get_integer("gridSpacing"), Some(20));
}

#[tokio::test]
async fn test_changes_survive_restart() {
    let env = TestEnv::new();
    {
        let engine = env.open().await;
        engine.set_base_field("units", "in").unwrap();
        engine
            .set_context_field(PREVIEW_CONTEXT, "showGrid", false)
            .unwrap();
        engine.set_session_override("lineWidth", 9.5).unwrap();
        engine.flush().await.unwrap();
    }

    let engine = env.open().await;
    let preview = engine.get_effective(PREVIEW_CONTEXT).unwrap();
    assert_eq!(preview.get_text("units"), Some("in"));
    assert_eq!(preview.get_bool("showGrid"), Some(false));
    // Session overrides do not outlive the session
    assert_eq!(preview.get_float("lineWidth"), Some(1.0));
    assert_eq!(engine.status().storage_tier, Tier::Structured);
}

#[tokio::test]
async fn test_written_document_layout() {
    let tiers = MemoryTiers::new();
    let engine = tiers.engine().await;
    engine
        .set_context_field(PREVIEW_CONTEXT, "gridSpacing", 40)
        .unwrap();
    engine.flush().await.unwrap();

    let written = last_written(&tiers.structured);
    assert_eq!(written["schemaVersion"], 2);
    assert_eq!(written["base"]["gridSpacing"], 20);
    assert_eq!(written["contexts"]["preview"]["gridSpacing"], 40);
    assert!(written["checksum"].as_str().unwrap().starts_with("sha256:"));
    assert!(written["updatedAt"].as_u64().unwrap() > 0);

    let record = tiers
        .structured
        .get(&StorageKey::default())
        .unwrap();
    assert!(record.verify());
    assert_eq!(record.writer.as_deref(), Some(engine.session_id()));
}

#[tokio::test]
async fn test_reload_picks_up_other_writer() {
    let tiers = MemoryTiers::new();
    let first = tiers.engine().await;
    let second = tiers.engine().await;

    first.set_base_field("fontSize", 18.0).unwrap();
    first.flush().await.unwrap();

    assert_eq!(
        second.get_effective(NORMAL_CONTEXT).unwrap().get_float("fontSize"),
        Some(12.0)
    );
    second.reload().await.unwrap();
    assert_eq!(
        second.get_effective(NORMAL_CONTEXT).unwrap().get_float("fontSize"),
        Some(18.0)
    );
}

#[tokio::test]
async fn test_engine_stays_ready_while_reloading() {
    let tiers = MemoryTiers::new();
    let gated = GatedDriver::new(tiers.structured.clone());
    let engine = SettingsEngine::builder()
        .driver(gated.clone())
        .driver(tiers.flat.clone())
        .debounce(TEST_DEBOUNCE)
        .load()
        .await
        .unwrap();
    engine.set_base_field("gridSpacing", 30).unwrap();
    engine.flush().await.unwrap();
    let mut rx = engine.subscribe();

    // Another instance writes meanwhile
    store_json(
        &tiers.structured,
        &json!({"schemaVersion": 2, "base": {"gridSpacing": 45}, "contexts": {}}),
    );

    gated.hold_reads();
    let reload = tokio::spawn({
        let engine = engine.clone();
        async move { engine.reload().await }
    });
    gated.wait_blocked().await;

    assert_eq!(engine.status().lifecycle, Lifecycle::Ready);
    assert_eq!(
        engine
            .get_effective(NORMAL_CONTEXT)
            .unwrap()
            .get_integer("gridSpacing"),
        Some(30)
    );
    engine.set_session_override("showGrid", false).unwrap();
    engine.set_base_field("units", "in").unwrap();
    assert!(matches!(engine.load().await, Err(Error::InvalidInput(_))));

    gated.release();
    reload.await.unwrap().unwrap();

    let effective = engine.get_effective(NORMAL_CONTEXT).unwrap();
    assert_eq!(effective.get_integer("gridSpacing"), Some(45));
    // The edit made mid-reload is superseded; overrides are kept
    assert_eq!(effective.get_text("units"), Some("mm"));
    assert_eq!(effective.get_bool("showGrid"), Some(false));
    assert!(!engine.has_pending_save());
    assert_eq!(engine.status().persistence, PersistenceState::Clean);
    assert!(
        std::iter::from_fn(|| rx.try_recv().ok())
            .all(|e| !matches!(e, EngineEvent::LifecycleChanged { .. }))
    );
}

#[tokio::test]
async fn test_unknown_context_resolves_like_empty() {
    let tiers = MemoryTiers::new();
    let engine = tiers.engine().await;
    engine.set_base_field("gridSpacing", 25).unwrap();

    let effective = engine.get_effective("print").unwrap();
    assert_eq!(effective.context(), "print");
    assert_eq!(effective.get_integer("gridSpacing"), Some(25));
}

#[tokio::test]
async fn test_unknown_stored_fields_are_preserved() {
    let tiers = MemoryTiers::new();
    store_json(
        &tiers.structured,
        &serde_json::json!({
            "schemaVersion": 2,
            "base": {"gridSpacing": 12, "futureOption": [1, 2]},
            "contexts": {"kiosk": {"showGrid": false}}
        }),
    );
    let engine = tiers.engine().await;

    let effective = engine.get_effective(NORMAL_CONTEXT).unwrap();
    assert_eq!(effective.get_integer("gridSpacing"), Some(12));
    assert!(effective.get("futureOption").is_none());

    engine.set_base_field("showRulers", false).unwrap();
    engine.flush().await.unwrap();

    let written = last_written(&tiers.structured);
    assert_eq!(written["base"]["futureOption"], serde_json::json!([1, 2]));
    assert_eq!(written["contexts"]["kiosk"]["showGrid"], false);
    assert!(engine.contexts().contains(&"kiosk".to_string()));
}

#[tokio::test]
async fn test_effective_values_carry_typed_values() {
    let tiers = MemoryTiers::new();
    let engine = tiers.engine().await;
    engine
        .set_base_field(
            "labelLayers",
            vec![SettingValue::from("walls"), SettingValue::from("doors")],
        )
        .unwrap();

    let effective = engine.get_effective(NORMAL_CONTEXT).unwrap();
    let layers = effective.get("labelLayers").unwrap().as_list().unwrap();
    assert_eq!(layers.len(), 2);
    assert_eq!(layers[1].as_text(), Some("doors"));
}

#[tokio::test]
async fn test_state_machine_and_events() {
    let tiers = MemoryTiers::new();
    let engine = tiers.builder().build().unwrap();
    let mut rx = engine.subscribe();

    assert_eq!(engine.status().lifecycle, Lifecycle::Uninitialized);
    engine.load().await.unwrap();
    assert_eq!(engine.status().lifecycle, Lifecycle::Ready);

    engine.set_base_field("snapToGrid", false).unwrap();
    assert_eq!(engine.status().persistence, PersistenceState::Dirty);
    engine.flush().await.unwrap();
    assert_eq!(engine.status().persistence, PersistenceState::Clean);

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
        if let EngineEvent::Saved { tier, .. } = event {
            assert_eq!(tier, Tier::Structured);
        }
    }
    assert_eq!(
        names,
        vec!["lifecycle_changed", "lifecycle_changed", "saved"]
    );
}
