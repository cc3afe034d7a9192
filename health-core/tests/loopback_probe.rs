//! End-to-end checks against a real loopback listener, covering the four
//! partial-failure shapes spec.md §1 calls out: a clean pass, an
//! application-level reject, a refused connection, and a stalled peer.

use healthcheck_core::driver::{run_check, CheckOutcome};
use healthcheck_core::flags::SourcePolicy;
use healthcheck_core::probe::{default_http_request, Probe};
use healthcheck_core::transport::UnsupportedTransparentProxy;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[tokio::test]
async fn tcp_connect_only_passes_on_accept() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = listener.accept().await;
    });

    let outcome = run_check(
        dest,
        &SourcePolicy::default(),
        &SourcePolicy::default(),
        Duration::from_secs(1),
        &Probe::tcp(),
        &UnsupportedTransparentProxy,
    )
    .await;

    assert!(matches!(outcome, CheckOutcome::Ok));
}

#[tokio::test]
async fn http_probe_passes_on_2xx_and_fails_on_5xx() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let n = sock.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"OPTIONS / HTTP/1.0\r\n\r\n");
        sock.write_all(b"HTTP/1.0 200 OK\r\n").await.unwrap();
    });

    let ok = run_check(
        dest,
        &SourcePolicy::default(),
        &SourcePolicy::default(),
        Duration::from_secs(1),
        &Probe::http(default_http_request()),
        &UnsupportedTransparentProxy,
    )
    .await;
    assert!(matches!(ok, CheckOutcome::Ok));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let _ = sock.read(&mut buf).await.unwrap();
        sock.write_all(b"HTTP/1.1 503 Service Unavailable\r\n")
            .await
            .unwrap();
    });

    let fail = run_check(
        dest,
        &SourcePolicy::default(),
        &SourcePolicy::default(),
        Duration::from_secs(1),
        &Probe::http(default_http_request()),
        &UnsupportedTransparentProxy,
    )
    .await;
    assert!(matches!(fail, CheckOutcome::Fail(_)));
}

#[tokio::test]
async fn refused_connection_is_a_fail() {
    // Bind then immediately drop the listener: the port becomes refused
    // rather than left dangling on an address no one will ever listen on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest: SocketAddr = listener.local_addr().unwrap();
    drop(listener);

    let outcome = run_check(
        dest,
        &SourcePolicy::default(),
        &SourcePolicy::default(),
        Duration::from_secs(1),
        &Probe::tcp(),
        &UnsupportedTransparentProxy,
    )
    .await;

    assert!(matches!(outcome, CheckOutcome::Fail(_)));
}

#[tokio::test]
async fn stalled_peer_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest = listener.local_addr().unwrap();
    tokio::spawn(async move {
        // Accept and then never send a reply.
        let (_sock, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let outcome = run_check(
        dest,
        &SourcePolicy::default(),
        &SourcePolicy::default(),
        Duration::from_millis(100),
        &Probe::http(default_http_request()),
        &UnsupportedTransparentProxy,
    )
    .await;

    match outcome {
        CheckOutcome::Fail(e) => {
            assert!(matches!(
                e,
                healthcheck_core::error::CheckError::Timeout(_)
            ));
        }
        CheckOutcome::Ok => panic!("expected a timeout"),
    }
}
