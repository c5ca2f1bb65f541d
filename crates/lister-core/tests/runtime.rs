//! Session runtime behavior against a mock transport.

mod common;

use std::sync::{Arc, Mutex};

use common::{MockTransport, RecordingLogger, characters, characters_body, host};
use lister_core::{
    ListerError, ListerRuntime, OpenOptions, PermissionContext, PermissionEvaluator,
    PresetRegistry, RuntimeConfig, RuntimeEvent, SelectionValue,
};
use lister_model::{
    Accessor, ErrorCode, HttpRequest, ListerDefinition, MappingContext, Map, PrunePolicy,
    SearchMode, SearchTarget, SelectionMode, SessionId, TransportError,
};
use serde_json::{Value, json};

/// Answers `/api/character` filtered by the `search` param and fails
/// everything else.
fn search_handler(request: &HttpRequest) -> Result<Value, TransportError> {
    if request.endpoint != "/api/character" {
        return Err(TransportError::Network("connection refused".to_string()));
    }
    let query = request
        .params
        .get("search")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    let body = characters_body();
    let results: Vec<Value> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|c| c["name"].as_str().unwrap().to_lowercase().contains(&query))
        .cloned()
        .collect();
    Ok(json!({ "results": results }))
}

fn runtime(transport: Arc<MockTransport>) -> ListerRuntime {
    let registry = PresetRegistry::new();
    registry.register("characters", characters());
    registry.register(
        "broken",
        ListerDefinition::builder("broken", "/api/broken").build(),
    );
    ListerRuntime::new(
        host(transport, Arc::new(RecordingLogger::default())),
        Arc::new(registry),
        RuntimeConfig::default(),
    )
}

fn labels(runtime: &ListerRuntime, id: &SessionId) -> Vec<String> {
    runtime
        .visible(id)
        .unwrap()
        .into_iter()
        .map(|o| o.label)
        .collect()
}

// ============================================================================
// Opening and fetching
// ============================================================================

#[tokio::test]
async fn open_fetches_and_maps() {
    let transport = MockTransport::new(search_handler);
    let runtime = runtime(Arc::clone(&transport));

    let id = runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    runtime.settled(&id).await;

    let state = runtime.snapshot(&id).unwrap();
    assert_eq!(state.title, "Characters");
    assert_eq!(state.search_target.subject.as_deref(), Some("name"));
    assert_eq!(state.options.len(), 3);
    assert!(!state.loading);
    assert!(state.error_code.is_none());
    assert_eq!(state.options[1].description.as_deref(), Some("Human • Alive"));
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn open_unknown_kind_fails() {
    let runtime = runtime(MockTransport::new(search_handler));
    let err = runtime
        .open("ghosts", Map::new(), OpenOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownPreset);
    assert!(runtime.sessions().is_empty());
}

#[tokio::test]
async fn identity_reuses_the_open_session() {
    let runtime = runtime(MockTransport::new(search_handler));
    let opts = OpenOptions::default().identity("assignee");

    let first = runtime.open("characters", Map::new(), opts.clone()).unwrap();
    let second = runtime.open("characters", Map::new(), opts).unwrap();
    assert_eq!(first, second);
    assert_eq!(runtime.sessions().len(), 1);
}

#[tokio::test]
async fn focus_changes_the_active_session() {
    let runtime = runtime(MockTransport::new(search_handler));
    let a = runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    let b = runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    assert_ne!(a, b);
    assert_eq!(runtime.active(), Some(b.clone()));

    runtime.focus(&a).unwrap();
    assert_eq!(runtime.active(), Some(a));
    assert_eq!(runtime.sessions().last(), runtime.active().as_ref());

    let missing = SessionId::new("lister-404");
    assert!(matches!(
        runtime.focus(&missing),
        Err(ListerError::UnknownSession { .. })
    ));
}

// ============================================================================
// Searching
// ============================================================================

#[tokio::test]
async fn local_search_filters_without_refetching() {
    let transport = MockTransport::new(search_handler);
    let runtime = runtime(Arc::clone(&transport));
    let id = runtime
        .open(
            "characters",
            Map::new(),
            OpenOptions::default().search_mode(SearchMode::Local),
        )
        .unwrap();
    runtime.settled(&id).await;

    runtime.set_query(&id, "rick").unwrap();
    runtime.settled(&id).await;

    assert_eq!(labels(&runtime, &id), vec!["Rick Sanchez"]);
    assert_eq!(transport.call_count(), 1);

    runtime.set_query(&id, "").unwrap();
    assert_eq!(labels(&runtime, &id).len(), 3);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn local_search_respects_only_allow_set() {
    let runtime = runtime(MockTransport::new(search_handler));
    let target = SearchTarget {
        subject: Some("name".to_string()),
        only: Some(vec![json!(2), json!(6)]),
    };
    let id = runtime
        .open(
            "characters",
            Map::new(),
            OpenOptions::default()
                .search_mode(SearchMode::Local)
                .search_target(target),
        )
        .unwrap();
    runtime.settled(&id).await;
    assert_eq!(
        labels(&runtime, &id),
        vec!["Morty Smith", "Abadango Cluster Princess"]
    );
}

#[tokio::test(start_paused = true)]
async fn remote_search_debounces_and_refetches() {
    let transport = MockTransport::new(search_handler);
    let runtime = runtime(Arc::clone(&transport));
    let id = runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    runtime.settled(&id).await;

    runtime.set_query(&id, "r").unwrap();
    runtime.set_query(&id, "ri").unwrap();
    runtime.set_query(&id, "rick").unwrap();
    assert!(runtime.snapshot(&id).unwrap().loading);
    runtime.settled(&id).await;

    assert_eq!(transport.call_count(), 2);
    let last = transport.calls().pop().unwrap();
    assert_eq!(last.params.get("search"), Some(&json!("rick")));
    assert_eq!(labels(&runtime, &id), vec!["Rick Sanchez"]);
    assert!(!runtime.snapshot(&id).unwrap().loading);
}

#[tokio::test(start_paused = true)]
async fn hybrid_search_refetches_and_filters_locally() {
    let transport = MockTransport::new(|_| Ok(characters_body()));
    let runtime = runtime(Arc::clone(&transport));
    let id = runtime
        .open(
            "characters",
            Map::new(),
            OpenOptions::default().search_mode(SearchMode::Hybrid),
        )
        .unwrap();
    runtime.settled(&id).await;

    runtime.set_query(&id, "smith").unwrap();
    runtime.settled(&id).await;

    assert_eq!(transport.call_count(), 2);
    assert_eq!(labels(&runtime, &id), vec!["Morty Smith"]);
}

#[tokio::test]
async fn patch_filters_merges_and_removes() {
    let transport = MockTransport::new(search_handler);
    let runtime = runtime(Arc::clone(&transport));
    let mut filters = Map::new();
    filters.insert("status".to_string(), json!("alive"));
    let id = runtime
        .open(
            "characters",
            filters,
            OpenOptions::default().debounce(std::time::Duration::ZERO),
        )
        .unwrap();
    runtime.settled(&id).await;

    let mut patch = Map::new();
    patch.insert("status".to_string(), Value::Null);
    patch.insert("species".to_string(), json!("Human"));
    runtime.patch_filters(&id, patch).unwrap();
    runtime.settled(&id).await;

    let state = runtime.snapshot(&id).unwrap();
    assert_eq!(Value::Object(state.filters), json!({"species": "Human"}));
    let last = transport.calls().pop().unwrap();
    assert_eq!(last.params.get("species"), Some(&json!("Human")));
    assert!(last.params.get("status").is_none());
}

#[tokio::test]
async fn local_mode_and_target_changes_only_refilter() {
    let transport = MockTransport::new(search_handler);
    let runtime = runtime(Arc::clone(&transport));
    let id = runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    runtime.settled(&id).await;
    assert_eq!(transport.call_count(), 1);

    runtime.set_search_mode(&id, SearchMode::Local).unwrap();
    runtime.set_query(&id, "human").unwrap();
    runtime.set_search_target(&id, SearchTarget::subject("species")).unwrap();
    runtime.settled(&id).await;

    assert_eq!(transport.call_count(), 1);
    assert_eq!(
        labels(&runtime, &id),
        vec!["Rick Sanchez", "Morty Smith"]
    );
}

#[tokio::test(start_paused = true)]
async fn remote_target_change_refetches() {
    let transport = MockTransport::new(search_handler);
    let runtime = runtime(Arc::clone(&transport));
    let id = runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    runtime.set_query(&id, "smith").unwrap();
    runtime.settled(&id).await;
    assert_eq!(transport.call_count(), 2);

    runtime.set_search_target(&id, SearchTarget::subject("species")).unwrap();
    runtime.settled(&id).await;

    assert_eq!(transport.call_count(), 3);
    let last = transport.calls().pop().unwrap();
    assert_eq!(last.params.get("search"), Some(&json!("smith")));
    let state = runtime.snapshot(&id).unwrap();
    assert_eq!(state.search_target.subject.as_deref(), Some("species"));
}

#[tokio::test(start_paused = true)]
async fn cursor_is_sent_without_debounce() {
    let transport = MockTransport::new(search_handler);
    let runtime = runtime(Arc::clone(&transport));
    let id = runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    runtime.settled(&id).await;

    runtime.set_cursor(&id, Some(json!("page-2"))).unwrap();
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert_eq!(transport.call_count(), 2);
    runtime.settled(&id).await;

    let last = transport.calls().pop().unwrap();
    assert_eq!(last.params.get("cursor"), Some(&json!("page-2")));
    assert_eq!(runtime.snapshot(&id).unwrap().cursor, Some(json!("page-2")));
}

// ============================================================================
// Refresh and failures
// ============================================================================

#[tokio::test]
async fn refresh_bypasses_dedupe() {
    let transport = MockTransport::new(search_handler);
    let runtime = runtime(Arc::clone(&transport));
    let id = runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    runtime.settled(&id).await;

    runtime.set_query(&id, "").unwrap();
    runtime.settled(&id).await;
    assert_eq!(transport.call_count(), 1);

    runtime.refresh(&id).unwrap();
    runtime.settled(&id).await;
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn refresh_marks_refreshing_while_data_is_shown() {
    let runtime = runtime(MockTransport::new(search_handler));
    let id = runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    runtime.settled(&id).await;

    let flags = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&flags);
    let observer = runtime.clone();
    let subscription = runtime.subscribe(move |event| {
        if let RuntimeEvent::Changed(id) = event {
            if let Some(state) = observer.snapshot(id) {
                seen.lock().unwrap().push((state.loading, state.refreshing));
            }
        }
    });

    runtime.refresh(&id).unwrap();
    runtime.settled(&id).await;
    subscription.unsubscribe();

    let flags = flags.lock().unwrap().clone();
    assert_eq!(flags.first(), Some(&(true, true)));
    assert_eq!(flags.last(), Some(&(false, false)));
}

#[tokio::test]
async fn failures_stay_in_their_session() {
    let runtime = runtime(MockTransport::new(search_handler));
    let good = runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    let bad = runtime
        .open("broken", Map::new(), OpenOptions::default())
        .unwrap();
    runtime.settled(&good).await;
    runtime.settled(&bad).await;

    let bad_state = runtime.snapshot(&bad).unwrap();
    assert_eq!(bad_state.error_code, Some(ErrorCode::FetchFailed));
    assert!(bad_state.error.is_some());
    assert!(!bad_state.loading);

    let good_state = runtime.snapshot(&good).unwrap();
    assert!(good_state.error_code.is_none());
    assert_eq!(good_state.options.len(), 3);
}

#[tokio::test]
async fn panicking_accessor_ends_loading_with_an_error() {
    let transport = MockTransport::new(search_handler);
    let logger = Arc::new(RecordingLogger::default());
    let registry = PresetRegistry::new();
    registry.register(
        "fragile",
        ListerDefinition::builder("fragile", "/api/character")
            .selector("results")
            .label(Accessor::function(|_: &Value, _: &MappingContext<'_>| {
                panic!("label accessor blew up")
            }))
            .value("id")
            .build(),
    );
    let runtime = ListerRuntime::new(
        host(Arc::clone(&transport), Arc::clone(&logger)),
        Arc::new(registry),
        RuntimeConfig::default(),
    );

    let id = runtime
        .open("fragile", Map::new(), OpenOptions::default())
        .unwrap();
    runtime.settled(&id).await;

    let state = runtime.snapshot(&id).unwrap();
    assert!(!state.loading);
    assert_eq!(state.error_code, Some(ErrorCode::FetchFailed));
    assert_eq!(logger.codes(), vec!["fetch_failed"]);

    runtime.refresh(&id).unwrap();
    runtime.settled(&id).await;
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test]
async fn permission_denial_surfaces_as_error_code() {
    let transport = MockTransport::new(search_handler);
    let registry = PresetRegistry::new();
    registry.register("characters", characters());
    let evaluator: Arc<dyn PermissionEvaluator> =
        Arc::new(|permissions: &[String], _ctx: &PermissionContext<'_>| {
            permissions.iter().any(|p| p == "characters.view")
        });
    let runtime = ListerRuntime::new(
        host(Arc::clone(&transport), Arc::new(RecordingLogger::default()))
            .with_permissions(evaluator),
        Arc::new(registry),
        RuntimeConfig::default(),
    );

    let id = runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    runtime.settled(&id).await;

    let state = runtime.snapshot(&id).unwrap();
    assert_eq!(state.error_code, Some(ErrorCode::AccessDenied));
    assert!(state.options.is_empty());
    assert_eq!(transport.call_count(), 0);
}

// ============================================================================
// Selection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn selection_survives_a_newer_list() {
    let runtime = runtime(MockTransport::new(search_handler));
    let id = runtime
        .open(
            "characters",
            Map::new(),
            OpenOptions::default().mode(SelectionMode::Multiple),
        )
        .unwrap();
    runtime.settled(&id).await;

    let rick = runtime.snapshot(&id).unwrap().data[0].clone();
    assert!(runtime.select(&id, &rick).unwrap());

    runtime.set_query(&id, "morty").unwrap();
    runtime.settled(&id).await;
    assert_eq!(labels(&runtime, &id), vec!["Morty Smith"]);
    assert_eq!(runtime.selected_items(&id).unwrap(), vec![rick.clone()]);

    let morty = runtime.snapshot(&id).unwrap().data[0].clone();
    assert!(runtime.toggle(&id, &morty).unwrap());

    let committed = runtime.apply(&id).unwrap();
    assert_eq!(
        committed.value,
        SelectionValue::Multiple(vec![json!(1), json!(2)])
    );
    assert_eq!(committed.items, vec![rick, morty]);
    assert!(runtime.snapshot(&id).is_none());
    assert!(runtime.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn prune_missing_drops_keys_absent_from_latest_list() {
    let runtime = runtime(MockTransport::new(search_handler));
    let id = runtime
        .open(
            "characters",
            Map::new(),
            OpenOptions::default()
                .mode(SelectionMode::Multiple)
                .prune(PrunePolicy::Missing),
        )
        .unwrap();
    runtime.settled(&id).await;

    let rick = runtime.snapshot(&id).unwrap().data[0].clone();
    runtime.select(&id, &rick).unwrap();
    runtime.set_query(&id, "morty").unwrap();
    runtime.settled(&id).await;

    assert!(runtime.snapshot(&id).unwrap().selection.is_empty());
}

#[tokio::test]
async fn preselected_keys_resolve_once_loaded() {
    let runtime = runtime(MockTransport::new(search_handler));
    let id = runtime
        .open(
            "characters",
            Map::new(),
            OpenOptions::default().value(vec![json!(6)]),
        )
        .unwrap();
    runtime.settled(&id).await;

    let items = runtime.selected_items(&id).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], json!("Abadango Cluster Princess"));

    runtime.deselect(&id, &json!(6)).unwrap();
    runtime.clear(&id).unwrap();
    let committed = runtime.apply(&id).unwrap();
    assert_eq!(committed.value, SelectionValue::Single(None));
}

#[tokio::test]
async fn cancel_discards_and_closes() {
    let runtime = runtime(MockTransport::new(search_handler));
    let id = runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    runtime.cancel(&id).unwrap();
    assert!(runtime.snapshot(&id).is_none());
    assert!(matches!(
        runtime.cancel(&id),
        Err(ListerError::UnknownSession { .. })
    ));
    runtime.settled(&id).await;
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test]
async fn subscribers_see_mutations_until_unsubscribed() {
    let runtime = runtime(MockTransport::new(search_handler));
    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&events);
    let subscription = runtime.subscribe(move |event| seen.lock().unwrap().push(event.clone()));

    let id = runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    runtime.settled(&id).await;
    runtime
        .set_position(&id, Some(lister_model::Position { x: 10.0, y: 20.0 }))
        .unwrap();

    {
        let events = events.lock().unwrap();
        assert_eq!(events.first(), Some(&RuntimeEvent::Opened(id.clone())));
        assert!(events.contains(&RuntimeEvent::Changed(id.clone())));
    }

    subscription.unsubscribe();
    let before = events.lock().unwrap().len();
    runtime.close(&id);
    assert_eq!(events.lock().unwrap().len(), before);
}

#[tokio::test]
async fn dispose_closes_everything() {
    let runtime = runtime(MockTransport::new(search_handler));
    let closed = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&closed);
    let _subscription = runtime.subscribe(move |event| {
        if let RuntimeEvent::Closed(id) = event {
            seen.lock().unwrap().push(id.clone());
        }
    });

    runtime
        .open("characters", Map::new(), OpenOptions::default())
        .unwrap();
    runtime
        .open("broken", Map::new(), OpenOptions::default())
        .unwrap();
    runtime.dispose();

    assert!(runtime.sessions().is_empty());
    assert!(runtime.active().is_none());
    assert_eq!(closed.lock().unwrap().len(), 2);
}
