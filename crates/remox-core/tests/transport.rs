//! Mem transport behavior: linking, severing, reconnection, refusal.

use remox_core::{Transport, TransportError};

#[tokio::test]
async fn pair_delivers_frames_both_ways() {
    let (a, b) = Transport::mem_pair();
    a.send("ping".into()).await.unwrap();
    assert_eq!(b.recv().await.unwrap(), "ping");
    b.send("pong".into()).await.unwrap();
    assert_eq!(a.recv().await.unwrap(), "pong");
}

#[tokio::test]
async fn sever_closes_both_halves() {
    let (a, b) = Transport::mem_pair();
    let Transport::Mem(mem_a) = &a else {
        unreachable!()
    };
    mem_a.sever();

    assert!(matches!(b.recv().await, Err(TransportError::Closed)));
    assert!(matches!(a.recv().await, Err(TransportError::Closed)));
    assert!(matches!(b.send("x".into()).await, Err(TransportError::Closed)));
}

#[tokio::test]
async fn sever_wakes_a_blocked_receiver() {
    let (a, _b) = Transport::mem_pair();
    let receiver = {
        let a = a.clone();
        tokio::spawn(async move { a.recv().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let Transport::Mem(mem_a) = &a else {
        unreachable!()
    };
    mem_a.sever();
    let outcome = tokio::time::timeout(std::time::Duration::from_secs(1), receiver)
        .await
        .expect("receiver did not wake")
        .unwrap();
    assert!(matches!(outcome, Err(TransportError::Closed)));
}

#[tokio::test]
async fn dialed_transport_reconnects_after_sever() {
    let (listener, dialer) = Transport::mem_listen();
    let client = Transport::Mem(dialer.dial().unwrap());
    let server = Transport::Mem(listener.accept().await.unwrap());

    client.send("one".into()).await.unwrap();
    assert_eq!(server.recv().await.unwrap(), "one");

    let Transport::Mem(mem) = &client else {
        unreachable!()
    };
    mem.sever();
    assert!(matches!(
        client.send("lost".into()).await,
        Err(TransportError::ConnectionRefused)
    ));

    client.reconnect().await.unwrap();
    let server2 = Transport::Mem(listener.accept().await.unwrap());
    client.send("two".into()).await.unwrap();
    assert_eq!(server2.recv().await.unwrap(), "two");
}

#[tokio::test]
async fn refusing_dialer_rejects_dials_and_reconnects() {
    let (_listener, dialer) = Transport::mem_listen();
    let client = Transport::Mem(dialer.dial().unwrap());

    dialer.set_refusing(true);
    assert!(matches!(
        dialer.dial(),
        Err(TransportError::ConnectionRefused)
    ));
    let Transport::Mem(mem) = &client else {
        unreachable!()
    };
    mem.sever();
    assert!(matches!(
        client.reconnect().await,
        Err(TransportError::ConnectionRefused)
    ));

    dialer.set_refusing(false);
    client.reconnect().await.unwrap();
}

#[tokio::test]
async fn close_is_terminal() {
    let (listener, dialer) = Transport::mem_listen();
    let client = Transport::Mem(dialer.dial().unwrap());
    let _server = listener.accept().await.unwrap();

    client.close();
    assert!(client.is_closed());
    assert!(matches!(client.recv().await, Err(TransportError::Closed)));
    assert!(matches!(client.reconnect().await, Err(TransportError::Closed)));
}
