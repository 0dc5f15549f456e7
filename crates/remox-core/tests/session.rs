//! Session-level behavior: calls, notifications, built-ins, dispatch,
//! timeouts and backpressure.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use remox_core::{Dispatcher, DispatcherConfig, RpcError, SessionConfig, codes};
use remox_testkit::{EchoHandler, session_pair_with};
use serde_json::json;

fn echo_dispatcher() -> Arc<Dispatcher> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    dispatcher.set_default_handler(Arc::new(EchoHandler));
    dispatcher
}

#[tokio::test]
async fn call_round_trips_params() {
    let (client, _server) = session_pair_with(echo_dispatcher());
    let result = client
        .call("echo", Some(json!({"param1": "Value1"})))
        .await
        .unwrap();
    assert_eq!(result, json!({"param1": "Value1"}));
}

#[tokio::test]
async fn ping_is_served_by_the_dispatcher_itself() {
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    let (client, _server) = session_pair_with(dispatcher);
    let result = client.call("ping", None).await.unwrap();
    assert_eq!(result, json!({"value": "pong"}));
}

#[tokio::test]
async fn unknown_method_answers_method_not_found() {
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    let (client, _server) = session_pair_with(dispatcher);
    let err = client.call("nope", None).await.unwrap_err();
    match err {
        RpcError::Server { code, message, .. } => {
            assert_eq!(code, codes::METHOD_NOT_FOUND);
            assert!(message.contains("nope"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn notification_reaches_handler_and_produces_no_response() {
    let seen = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    {
        let seen = Arc::clone(&seen);
        dispatcher.register_fn("tick", move |_tx, _session, _req| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    }
    let (client, _server) = session_pair_with(dispatcher);

    client.notify("tick", Some(json!({"n": 1}))).await.unwrap();
    for _ in 0..100 {
        if seen.load(Ordering::SeqCst) == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("notification never reached the handler");
}

#[tokio::test]
async fn handler_that_never_responds_yields_internal_error() {
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    dispatcher.register_fn("forgetful", |_tx, _session, _req| async move { Ok(()) });
    let (client, _server) = session_pair_with(dispatcher);

    let err = client.call("forgetful", None).await.unwrap_err();
    match err {
        RpcError::Server { code, message, .. } => {
            assert_eq!(code, codes::INTERNAL_ERROR);
            assert!(message.contains("did not respond"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn async_transaction_responds_from_another_task() {
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    dispatcher.register_fn("deferred", |tx, _session, _req| async move {
        tx.start_async();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.send_response(json!("late but fine")).await.unwrap();
        });
        Ok(())
    });
    let (client, _server) = session_pair_with(dispatcher);

    let result = client.call("deferred", None).await.unwrap();
    assert_eq!(result, json!("late but fine"));
}

#[tokio::test]
async fn handler_panic_becomes_an_error_response() {
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    dispatcher.register_fn("explode", |_tx, _session, _req| async move {
        panic!("boom");
    });
    let (client, _server) = session_pair_with(dispatcher);

    let err = client.call("explode", None).await.unwrap_err();
    match err {
        RpcError::Server { code, .. } => assert_eq!(code, codes::INTERNAL_ERROR),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn handler_error_code_is_forwarded() {
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    dispatcher.register_fn("gone", |_tx, _session, _req| async move {
        Err(RpcError::server(
            codes::OBJECT_NOT_FOUND,
            "Object 'x' not found",
        ))
    });
    let (client, _server) = session_pair_with(dispatcher);

    let err = client.call("gone", None).await.unwrap_err();
    assert!(err.is_object_not_found());
}

#[tokio::test]
async fn per_call_timeout_abandons_the_call() {
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    dispatcher.register_fn("stall", |tx, _session, _req| async move {
        tx.start_async();
        Ok(())
    });
    let (a, b) = remox_core::Transport::mem_pair();
    let client = remox_core::RpcSession::new(
        a,
        SessionConfig {
            request_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        },
    );
    let server = remox_core::RpcSession::new(b, SessionConfig::default());
    server.attach_dispatcher(dispatcher, "pair-0");
    tokio::spawn(Arc::clone(&client).run());
    tokio::spawn(Arc::clone(&server).run());

    let err = client.call("stall", None).await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout));
    // The channel still works afterwards.
    client.call("ping", None).await.unwrap();
}

#[tokio::test]
async fn full_handler_pool_does_not_stall_the_receive_loop() {
    let dispatcher = Dispatcher::new(DispatcherConfig {
        max_concurrent_requests: 1,
        ..DispatcherConfig::default()
    });
    dispatcher.register_fn("stall", |tx, _session, _req| async move {
        tx.start_async();
        std::future::pending::<()>().await;
        Ok(())
    });
    let (client, _server) = session_pair_with(dispatcher);

    // Fill the pool past its capacity with handlers that never finish.
    let stalled: Vec<_> = (0..2)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call("stall", None).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The demux loop keeps reading frames; built-ins answer immediately.
    let result = tokio::time::timeout(Duration::from_secs(2), client.call("ping", None))
        .await
        .expect("receive loop stalled behind a full handler pool")
        .unwrap();
    assert_eq!(result, json!({"value": "pong"}));
    for task in stalled {
        task.abort();
    }
}

#[tokio::test]
async fn pending_cap_refuses_excess_calls() {
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    dispatcher.register_fn("stall", |tx, _session, _req| async move {
        tx.start_async();
        Ok(())
    });
    let (a, b) = remox_core::Transport::mem_pair();
    let client = remox_core::RpcSession::new(
        a,
        SessionConfig {
            max_pending: 1,
            ..SessionConfig::default()
        },
    );
    let server = remox_core::RpcSession::new(b, SessionConfig::default());
    server.attach_dispatcher(dispatcher, "pair-0");
    tokio::spawn(Arc::clone(&client).run());
    tokio::spawn(Arc::clone(&server).run());

    let stalled = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call("stall", None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let err = client.call("ping", None).await.unwrap_err();
    assert!(matches!(err, RpcError::TooManyPending));
    stalled.abort();
}
