mod support;

use npt_lib::test_support::{ephemeral_redirect, parse_loopback_redirect, CallbackListener};
use std::time::{Duration, Instant};

async fn bind_free(path: &str) -> CallbackListener {
    CallbackListener::bind(ephemeral_redirect(path))
        .await
        .expect("bind")
}

#[tokio::test]
async fn wait_times_out_without_firing_early() {
    let listener = bind_free("/cb").await;
    let started = Instant::now();
    let err = listener
        .wait(Some("s1"), Duration::from_millis(300))
        .await
        .expect_err("no callback was sent");

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(err.code(), "OAUTH_CALLBACK_TIMEOUT");
    assert!(err.message().contains("oauth-exchange"));
}

#[tokio::test]
async fn unrelated_requests_are_ignored_until_the_callback_path_is_hit() {
    let listener = bind_free("/cb").await;
    let addr = listener.local_addr().expect("addr");
    let waiter = tokio::spawn(listener.wait(Some("s1"), Duration::from_secs(10)));
    let http = support::local_http();

    let resp = http
        .get(format!("http://{addr}/favicon.ico"))
        .send()
        .await
        .expect("favicon");
    assert_eq!(resp.status().as_u16(), 404);

    let resp = http
        .post(format!("http://{addr}/cb?code=abc&state=s1"))
        .send()
        .await
        .expect("post");
    assert_eq!(resp.status().as_u16(), 405);

    let resp = http
        .get(format!("http://{addr}/cb?code=abc&state=s1"))
        .send()
        .await
        .expect("callback");
    assert_eq!(resp.status().as_u16(), 200);
    let body = resp.text().await.expect("body");
    assert!(body.contains("NPT OAuth success"));

    let grant = waiter.await.expect("join").expect("grant");
    assert_eq!(grant.code, "abc");
    assert_eq!(grant.state.as_deref(), Some("s1"));
}

#[tokio::test]
async fn state_mismatch_is_reported_instead_of_timing_out() {
    let listener = bind_free("/cb").await;
    let addr = listener.local_addr().expect("addr");
    let waiter = tokio::spawn(listener.wait(Some("s1"), Duration::from_secs(10)));

    let started = Instant::now();
    support::local_http()
        .get(format!("http://{addr}/cb?code=abc&state=evil"))
        .send()
        .await
        .expect("callback");

    let err = waiter.await.expect("join").expect_err("mismatch");
    assert_eq!(err.code(), "OAUTH_STATE_MISMATCH");
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn provider_error_renders_failure_page() {
    let listener = bind_free("/oauth/callback").await;
    let addr = listener.local_addr().expect("addr");
    let waiter = tokio::spawn(listener.wait(Some("s1"), Duration::from_secs(10)));

    let resp = support::local_http()
        .get(format!(
            "http://{addr}/oauth/callback?error=access_denied&error_description=User%20cancelled&state=s1"
        ))
        .send()
        .await
        .expect("callback");
    assert_eq!(resp.status().as_u16(), 200);
    assert!(resp.text().await.expect("body").contains("NPT OAuth failed"));

    let err = waiter.await.expect("join").expect_err("provider error");
    assert_eq!(err.code(), "OAUTH_PROVIDER_ERROR");
    assert!(err.message().contains("access_denied: User cancelled"));
}

#[tokio::test]
async fn missing_code_is_malformed() {
    let listener = bind_free("/cb").await;
    let addr = listener.local_addr().expect("addr");
    let waiter = tokio::spawn(listener.wait(None, Duration::from_secs(10)));

    support::local_http()
        .get(format!("http://{addr}/cb?state=s1"))
        .send()
        .await
        .expect("callback");

    let err = waiter.await.expect("join").expect_err("malformed");
    assert_eq!(err.code(), "OAUTH_CALLBACK_MALFORMED");
}

#[tokio::test]
async fn occupied_port_is_a_bind_error() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").expect("occupy");
    let port = occupied.local_addr().expect("addr").port();

    let redirect =
        parse_loopback_redirect(&format!("http://127.0.0.1:{port}/cb")).expect("redirect");
    let err = CallbackListener::bind(redirect)
        .await
        .expect_err("port in use");
    assert_eq!(err.code(), "OAUTH_CALLBACK_BIND");
    let io = err.source_as::<std::io::Error>().expect("io source");
    assert_eq!(io.kind(), std::io::ErrorKind::AddrInUse);
}

#[tokio::test]
async fn localhost_fails_when_the_ipv4_loopback_port_is_taken() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").expect("occupy");
    let port = occupied.local_addr().expect("addr").port();

    let redirect =
        parse_loopback_redirect(&format!("http://localhost:{port}/cb")).expect("redirect");
    let err = CallbackListener::bind(redirect)
        .await
        .expect_err("127.0.0.1 half is in use");
    assert_eq!(err.code(), "OAUTH_CALLBACK_BIND");
    assert!(err.message().contains(&format!("127.0.0.1:{port}")));
    let io = err.source_as::<std::io::Error>().expect("io source");
    assert_eq!(io.kind(), std::io::ErrorKind::AddrInUse);
}

#[tokio::test]
async fn port_is_released_after_wait_returns() {
    let listener = bind_free("/cb").await;
    let addr = listener.local_addr().expect("addr");
    let _ = listener.wait(None, Duration::from_millis(50)).await;

    std::net::TcpListener::bind(addr).expect("port should be free again");
}

#[tokio::test]
async fn dropping_an_unwaited_listener_releases_the_port() {
    let listener = bind_free("/cb").await;
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    // The aborted serve task drops its socket on the runtime's next poll.
    let mut rebound = None;
    for _ in 0..50 {
        if let Ok(socket) = std::net::TcpListener::bind(addr) {
            rebound = Some(socket);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(rebound.is_some(), "port {addr} still held after drop");
}

#[test]
fn non_loopback_portless_and_zero_port_redirects_are_rejected_before_binding() {
    for uri in [
        "https://localhost:8080/cb",
        "http://example.com:8080/cb",
        "http://localhost/cb",
        "http://localhost:0/cb",
    ] {
        let err = parse_loopback_redirect(uri).expect_err(uri);
        assert_eq!(err.code(), "INVALID_INPUT", "{uri}");
    }
}
