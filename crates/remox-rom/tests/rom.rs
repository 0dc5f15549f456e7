//! Remote object model end to end against the scripted server mock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use remox_core::SessionConfig;
use remox_rom::{DgcConfig, Props, RemoteEvent, RomFactory};
use remox_testkit::{RomServerMock, connect_client, spawn_rom_server};
use serde_json::json;

fn fast_dgc() -> DgcConfig {
    DgcConfig {
        default_period: Duration::from_millis(30),
    }
}

fn factory_over_mock() -> (Arc<RomServerMock>, Arc<RomFactory>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mock = RomServerMock::new();
    let dialer = spawn_rom_server(Arc::clone(&mock));
    let client = connect_client(&dialer, SessionConfig::default());
    let factory = RomFactory::new(client, fast_dgc());
    (mock, factory)
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}

#[tokio::test]
async fn builder_creates_and_registers_an_object() {
    let (mock, factory) = factory_over_mock();
    let pipeline = factory
        .build("MediaPipeline")
        .with("garbagePeriod", 120)
        .build()
        .await
        .unwrap();

    assert_eq!(pipeline.object_ref(), "1_MediaPipeline");
    assert_eq!(pipeline.remote_class(), "MediaPipeline");
    assert!(mock.exists("1_MediaPipeline"));
    assert!(factory.dgc().is_registered("1_MediaPipeline"));
}

#[tokio::test]
async fn same_reference_yields_the_same_handle() {
    let (_mock, factory) = factory_over_mock();
    let pipeline = factory.create("MediaPipeline", Props::new()).await.unwrap();
    let again = factory.get_by_ref(pipeline.object_ref(), "MediaPipeline");
    assert!(Arc::ptr_eq(&pipeline, &again));
}

#[tokio::test]
async fn invoke_round_trips_named_params() {
    let (_mock, factory) = factory_over_mock();
    let pipeline = factory.create("MediaPipeline", Props::new()).await.unwrap();

    let mut params = Props::new();
    params.insert("param1".into(), json!("Value1"));
    let echoed = factory.invoke(&pipeline, "echo", params).await.unwrap();
    assert_eq!(echoed, json!({"param1": "Value1"}));
}

#[tokio::test]
async fn scalar_results_are_unwrapped_from_the_value_envelope() {
    let (_mock, factory) = factory_over_mock();
    let pipeline = factory.create("MediaPipeline", Props::new()).await.unwrap();
    let uri = factory.invoke(&pipeline, "getUri", Props::new()).await.unwrap();
    assert_eq!(uri, json!("file:///test"));
}

#[tokio::test]
async fn invoke_result_can_be_adopted_as_a_child_object() {
    let (mock, factory) = factory_over_mock();
    let pipeline = factory.create("MediaPipeline", Props::new()).await.unwrap();

    let child_ref = factory
        .invoke(&pipeline, "newEndpoint", Props::new())
        .await
        .unwrap();
    let child_ref = child_ref.as_str().unwrap();
    assert_eq!(child_ref, "2_WebRtcEndpoint");

    let endpoint = factory.get_by_ref(child_ref, "WebRtcEndpoint");
    assert!(mock.exists(endpoint.object_ref()));
    assert!(factory.dgc().is_registered(child_ref));
}

#[tokio::test]
async fn release_stops_keepalives_but_spares_siblings() {
    let (mock, factory) = factory_over_mock();
    let pipeline = factory.create("MediaPipeline", Props::new()).await.unwrap();
    let child_ref = factory
        .invoke(&pipeline, "newEndpoint", Props::new())
        .await
        .unwrap();
    let endpoint = factory.get_by_ref(child_ref.as_str().unwrap(), "WebRtcEndpoint");

    factory.release(&pipeline).await.unwrap();
    assert!(!mock.exists("1_MediaPipeline"));
    assert!(!factory.dgc().is_registered("1_MediaPipeline"));
    assert!(factory.registry().get("1_MediaPipeline").is_none());

    // The endpoint keeps its keepalive schedule.
    let before = mock.keepalive_count(endpoint.object_ref());
    eventually("endpoint keepalives continue", || {
        mock.keepalive_count(endpoint.object_ref()) > before
    })
    .await;
    let pipeline_count = mock.keepalive_count("1_MediaPipeline");
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(mock.keepalive_count("1_MediaPipeline"), pipeline_count);
}

#[tokio::test]
async fn keepalives_follow_the_reference_count() {
    let (mock, factory) = factory_over_mock();
    let pipeline = factory.create("MediaPipeline", Props::new()).await.unwrap();
    // Second holder of the same reference.
    factory.get_by_ref(pipeline.object_ref(), "MediaPipeline");
    assert_eq!(factory.dgc().reference_count("1_MediaPipeline"), 2);

    // k-1 removals leave the schedule armed.
    assert!(factory.dgc().remove_reference("1_MediaPipeline"));
    assert!(factory.dgc().is_registered("1_MediaPipeline"));
    eventually("keepalives while one holder remains", || {
        mock.keepalive_count("1_MediaPipeline") > 0
    })
    .await;

    // The k-th removal stops it.
    assert!(factory.dgc().remove_reference("1_MediaPipeline"));
    assert!(!factory.dgc().is_registered("1_MediaPipeline"));
    tokio::time::sleep(Duration::from_millis(60)).await;
    let settled = mock.keepalive_count("1_MediaPipeline");
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(mock.keepalive_count("1_MediaPipeline"), settled);
    assert!(!factory.dgc().remove_reference("1_MediaPipeline"));
}

#[tokio::test]
async fn server_side_destruction_self_heals_once() {
    let (mock, factory) = factory_over_mock();
    let pipeline = factory.create("MediaPipeline", Props::new()).await.unwrap();
    mock.destroy(pipeline.object_ref());

    // The next keepalive learns the object is gone and drops local state.
    eventually("stale reference is dropped", || {
        !factory.dgc().is_registered("1_MediaPipeline")
    })
    .await;
    assert!(factory.registry().get("1_MediaPipeline").is_none());
    // A second heal attempt finds nothing to do.
    assert!(!factory.dgc().handle_stale("1_MediaPipeline"));
}

#[tokio::test]
async fn stale_invoke_surfaces_the_error_and_drops_local_state() {
    let (mock, factory) = factory_over_mock();
    let pipeline = factory.create("MediaPipeline", Props::new()).await.unwrap();
    mock.destroy(pipeline.object_ref());

    let err = factory
        .invoke(&pipeline, "getUri", Props::new())
        .await
        .unwrap_err();
    assert!(err.is_object_not_found());
    assert!(!factory.dgc().is_registered("1_MediaPipeline"));
    assert!(factory.registry().get("1_MediaPipeline").is_none());
}

#[tokio::test]
async fn response_refs_must_name_known_objects() {
    let (_mock, factory) = factory_over_mock();
    let pipeline = factory.create("MediaPipeline", Props::new()).await.unwrap();

    let resolved = factory.resolve_ref(pipeline.object_ref()).unwrap();
    assert!(Arc::ptr_eq(&pipeline, &resolved));

    let err = factory.resolve_ref("9_Unknown").unwrap_err();
    assert!(matches!(
        err,
        remox_core::RpcError::Protocol(remox_core::ProtocolError::UnknownObject(_))
    ));
}

#[tokio::test]
async fn events_reach_the_subscribed_listener() {
    let (mock, factory) = factory_over_mock();
    let pipeline = factory.create("MediaPipeline", Props::new()).await.unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let subscription = factory
        .subscribe(
            &pipeline,
            "Error",
            Arc::new(move |event: &RemoteEvent| {
                assert_eq!(event.object_ref, "1_MediaPipeline");
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();
    assert_eq!(subscription, "sub1");

    mock.fire_event("1_MediaPipeline", "Error", json!({"description": "x"}))
        .await
        .unwrap();
    eventually("event delivered", || hits.load(Ordering::SeqCst) == 1).await;

    // Events of other types or for unknown objects are dropped quietly.
    mock.fire_event("1_MediaPipeline", "Tick", json!({})).await.unwrap();
    mock.fire_event("9_Unknown", "Error", json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsubscribe_detaches_the_listener() {
    let (mock, factory) = factory_over_mock();
    let pipeline = factory.create("MediaPipeline", Props::new()).await.unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let subscription = factory
        .subscribe(
            &pipeline,
            "Error",
            Arc::new(move |_: &RemoteEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

    factory
        .unsubscribe(&pipeline, "Error", &subscription)
        .await
        .unwrap();
    mock.fire_event("1_MediaPipeline", "Error", json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_subscription_shape_is_a_protocol_error() {
    let (mock, factory) = factory_over_mock();
    let pipeline = factory.create("MediaPipeline", Props::new()).await.unwrap();

    mock.set_bad_subscribe(true);
    let err = factory
        .subscribe(&pipeline, "Error", Arc::new(|_: &RemoteEvent| {}))
        .await
        .unwrap_err();
    assert!(matches!(err, remox_core::RpcError::Protocol(_)));
}
