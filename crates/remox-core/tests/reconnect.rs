//! Session continuity across connection loss.

use std::sync::Arc;
use std::time::Duration;

use remox_core::reconnect::ReconnectConfig;
use remox_core::{
    Dispatcher, DispatcherConfig, RpcError, RpcSession, SessionConfig, Transport, codes,
};
use remox_testkit::{connect_client, register_session_info, spawn_server};
use serde_json::{Value, json};

fn server_dispatcher() -> Arc<Dispatcher> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    register_session_info(&dispatcher);
    dispatcher
}

fn fast_reconnect() -> SessionConfig {
    SessionConfig {
        reconnect: ReconnectConfig {
            enabled: true,
            max_attempts: 3,
            delay: Duration::from_millis(20),
        },
        ..SessionConfig::default()
    }
}

fn sever(session: &RpcSession) {
    let Transport::Mem(mem) = session.transport() else {
        unreachable!()
    };
    mem.sever();
}

async fn whoami(session: &Arc<RpcSession>) -> Value {
    session.call("whoami", None).await.unwrap()
}

#[tokio::test]
async fn session_survives_a_severed_connection() {
    let dialer = spawn_server(server_dispatcher());
    let client = connect_client(&dialer, fast_reconnect());

    let first = whoami(&client).await;
    assert_eq!(first["isNew"], json!(true));
    let session_id = first["sessionId"].as_str().unwrap().to_owned();
    assert_eq!(client.session_id().as_deref(), Some(session_id.as_str()));

    sever(&client);

    // The send hits a refused link, reconnects and retries transparently.
    let second = whoami(&client).await;
    assert_eq!(second["sessionId"], json!(session_id));
    assert_eq!(second["isNew"], json!(false));
}

#[tokio::test]
async fn is_new_is_observed_exactly_once() {
    let dialer = spawn_server(server_dispatcher());
    let client = connect_client(&dialer, fast_reconnect());

    assert_eq!(whoami(&client).await["isNew"], json!(true));
    assert_eq!(whoami(&client).await["isNew"], json!(false));
    sever(&client);
    assert_eq!(whoami(&client).await["isNew"], json!(false));
}

#[tokio::test]
async fn fail_fast_when_the_server_refuses() {
    let dialer = spawn_server(server_dispatcher());
    let client = connect_client(&dialer, fast_reconnect());
    whoami(&client).await;

    dialer.set_refusing(true);
    sever(&client);
    let err = client.call("whoami", None).await.unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn heartbeat_triggers_recovery() {
    let dialer = spawn_server(server_dispatcher());
    let client = connect_client(
        &dialer,
        SessionConfig {
            heartbeat_interval: Some(Duration::from_millis(50)),
            ..fast_reconnect()
        },
    );
    client.start_heartbeat();

    let session_id = whoami(&client).await["sessionId"].clone();
    sever(&client);

    // Give the heartbeat a few periods to notice and repair the link.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let after = whoami(&client).await;
    assert_eq!(after["sessionId"], session_id);
    assert_eq!(after["isNew"], json!(false));
}

#[tokio::test]
async fn connect_with_unknown_session_is_rejected_on_the_wire() {
    let dialer = spawn_server(server_dispatcher());
    let transport = Transport::Mem(dialer.dial().unwrap());

    transport
        .send(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "connect",
                "params": {"sessionId": "no-such-session"},
            })
            .to_string(),
        )
        .await
        .unwrap();
    let reply: Value = serde_json::from_str(&transport.recv().await.unwrap()).unwrap();
    assert_eq!(reply["error"]["code"], json!(codes::INVALID_SESSION));
}

#[tokio::test]
async fn explicit_connect_establishes_a_session() {
    let dialer = spawn_server(server_dispatcher());
    let client = connect_client(&dialer, fast_reconnect());

    let result = client.connect().await.unwrap();
    assert_eq!(result, json!({"value": "OK"}));
    assert!(client.session_id().is_some());

    // The handshake does not burn the session's newness.
    assert_eq!(whoami(&client).await["isNew"], json!(true));
}

#[tokio::test]
async fn transport_loss_fails_inflight_calls() {
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    dispatcher.register_fn("stall", |tx, _session, _req| async move {
        tx.start_async();
        Ok(())
    });
    register_session_info(&dispatcher);
    let dialer = spawn_server(dispatcher);
    let client = connect_client(&dialer, fast_reconnect());
    whoami(&client).await;

    let stalled = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call("stall", None).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    sever(&client);

    let outcome = tokio::time::timeout(Duration::from_secs(2), stalled)
        .await
        .expect("in-flight call must resolve on transport loss")
        .unwrap();
    assert!(matches!(outcome, Err(RpcError::Transport(_))));
}
