//! Full-stack flow: factory over a dialed session, surviving reconnection.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use remox::{DgcConfig, Props, ReconnectConfig, RemoteEvent, RomFactory, SessionConfig, Transport};
use remox_testkit::{RomServerMock, connect_client, spawn_rom_server};
use serde_json::json;

#[tokio::test]
async fn object_graph_survives_a_reconnect() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mock = RomServerMock::new();
    let dialer = spawn_rom_server(Arc::clone(&mock));
    let session = connect_client(
        &dialer,
        SessionConfig {
            reconnect: ReconnectConfig {
                enabled: true,
                max_attempts: 3,
                delay: Duration::from_millis(20),
            },
            ..SessionConfig::default()
        },
    );
    let factory = RomFactory::new(Arc::clone(&session), DgcConfig::default());

    let pipeline = factory
        .build("MediaPipeline")
        .with("garbagePeriod", 120)
        .build()
        .await
        .unwrap();
    let session_id = session.session_id().expect("session id captured");

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    factory
        .subscribe(
            &pipeline,
            "Error",
            Arc::new(move |_: &RemoteEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

    // Kill the connection under the factory's feet.
    let Transport::Mem(mem) = session.transport() else {
        unreachable!()
    };
    mem.sever();

    // The next operation reconnects transparently and the logical session
    // holds: same id, same object still usable.
    let uri = factory
        .invoke(&pipeline, "getUri", Props::new())
        .await
        .unwrap();
    assert_eq!(uri, json!("file:///test"));
    assert_eq!(session.session_id().as_deref(), Some(session_id.as_str()));

    // Events arrive over the replacement connection too.
    mock.fire_event(pipeline.object_ref(), "Error", json!({}))
        .await
        .unwrap();
    for _ in 0..200 {
        if hits.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    factory.release(&pipeline).await.unwrap();
    assert!(!mock.exists(pipeline.object_ref()));
}
