//! End-to-end watch coalescing against mock etcd members.

mod common;

use common::*;
use std::time::Duration;
use watch_proxy::config::Protocol;
use watch_proxy::watch::Fingerprint;

const WATCH: &str = "/v2/keys/foo?wait=true";

async fn open_watch(proxy: &TestProxy, path: &str) -> (reqwest::header::HeaderMap, LineReader) {
    let response = client().get(proxy.url(path)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let headers = response.headers().clone();
    (headers, LineReader::new(response))
}

#[tokio::test]
async fn identical_watches_share_one_upstream_stream() {
    let backend = start_streaming_backend().await;
    let spare = start_streaming_backend().await;
    let proxy = start_proxy(proxy_config(&[backend.addr, spare.addr])).await;

    let (headers, mut first) = open_watch(&proxy, WATCH).await;
    let (_, mut second) = open_watch(&proxy, WATCH).await;

    assert_eq!(headers["x-etcd-index"], "7");
    assert!(headers.get("content-length").is_none());
    assert!(headers.get("connection").is_none());
    assert_eq!(backend.request_count(), 1);
    assert_eq!(spare.request_count(), 0);
    assert_eq!(proxy.hub.subscriber_count(&Fingerprint::from(WATCH)), 2);

    let request = &backend.requests()[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.target, WATCH);
    assert_eq!(request.header("host"), Some(backend.addr.to_string().as_str()));

    backend.send_line(r#"{"action":"set","node":{"key":"/foo","value":"1"}}"#);
    assert_eq!(
        first.next_line().await.unwrap(),
        r#"{"action":"set","node":{"key":"/foo","value":"1"}}"#
    );
    assert_eq!(
        second.next_line().await.unwrap(),
        r#"{"action":"set","node":{"key":"/foo","value":"1"}}"#
    );
}

#[tokio::test]
async fn late_joiner_gets_history_then_live_lines() {
    let backend = start_streaming_backend().await;
    let proxy = start_proxy(proxy_config(&[backend.addr])).await;

    let (_, mut early) = open_watch(&proxy, WATCH).await;
    backend.send_line("one");
    assert_eq!(early.next_line().await.unwrap(), "one");
    backend.send_line("two");
    assert_eq!(early.next_line().await.unwrap(), "two");

    let (_, mut late) = open_watch(&proxy, WATCH).await;
    assert_eq!(late.next_line().await.unwrap(), "one");
    assert_eq!(late.next_line().await.unwrap(), "two");

    backend.send_line("three");
    assert_eq!(early.next_line().await.unwrap(), "three");
    assert_eq!(late.next_line().await.unwrap(), "three");
    assert_eq!(backend.request_count(), 1);
}

#[tokio::test]
async fn upstream_closes_when_last_client_leaves() {
    let backend = start_streaming_backend().await;
    let proxy = start_proxy(proxy_config(&[backend.addr])).await;
    let fingerprint = Fingerprint::from(WATCH);

    let (_, first) = open_watch(&proxy, WATCH).await;
    let (_, mut second) = open_watch(&proxy, WATCH).await;

    // The upstream stays idle: a disconnect alone must unsubscribe.
    drop(first);
    eventually("first client unsubscribed", || {
        proxy.hub.subscriber_count(&fingerprint) == 1
    })
    .await;
    assert_eq!(backend.closed_streams(), 0);

    backend.send_line("still-open");
    assert_eq!(second.next_line().await.unwrap(), "still-open");

    drop(second);
    eventually("unit torn down", || proxy.hub.active_units() == 0).await;
    eventually("upstream stream closed", || backend.closed_streams() == 1).await;

    let (_, _again) = open_watch(&proxy, WATCH).await;
    assert_eq!(backend.request_count(), 2);
}

#[tokio::test]
async fn closed_socket_unsubscribes_without_upstream_traffic() {
    let backend = start_streaming_backend().await;
    let proxy = start_proxy(proxy_config(&[backend.addr])).await;
    let fingerprint = Fingerprint::from(WATCH);

    let socket = raw_watch(proxy.addr, WATCH).await;
    assert_eq!(proxy.hub.subscriber_count(&fingerprint), 1);

    drop(socket);
    eventually("subscriber removed", || {
        proxy.hub.subscriber_count(&fingerprint) == 0
    })
    .await;
    assert_eq!(proxy.hub.active_units(), 0);
    eventually("upstream stream closed", || backend.closed_streams() == 1).await;
    assert_eq!(backend.request_count(), 1);
}

#[tokio::test]
async fn upstream_end_completes_client_responses() {
    let backend = start_streaming_backend().await;
    let proxy = start_proxy(proxy_config(&[backend.addr])).await;

    let (_, mut reader) = open_watch(&proxy, WATCH).await;
    backend.send_line("last");
    assert_eq!(reader.next_line().await.unwrap(), "last");

    backend.finish();
    assert_eq!(reader.next_line().await, None);
}

#[tokio::test]
async fn different_watches_spread_across_endpoints() {
    let first = start_streaming_backend().await;
    let second = start_streaming_backend().await;
    let proxy = start_proxy(proxy_config(&[first.addr, second.addr])).await;

    let (_, _a) = open_watch(&proxy, "/v2/keys/a?wait=true").await;
    let (_, _b) = open_watch(&proxy, "/v2/keys/b?wait=true").await;

    assert_eq!(first.request_count(), 1);
    assert_eq!(second.request_count(), 1);
    assert_eq!(proxy.hub.active_units(), 2);
}

#[tokio::test]
async fn failed_watch_returns_500_with_cause() {
    let proxy = start_proxy(proxy_config(&[closed_port()])).await;

    let response = client().get(proxy.url(WATCH)).send().await.unwrap();
    assert_eq!(response.status(), 500);
    let body = response.text().await.unwrap();
    assert!(body.contains("upstream request failed"), "body: {}", body);

    eventually("failed unit released", || proxy.hub.active_units() == 0).await;
}

#[tokio::test]
async fn v3_watches_coalesce_on_key_and_revision() {
    let backend = start_streaming_backend().await;
    let mut config = proxy_config(&[backend.addr]);
    config.watch.protocol = Protocol::V3;
    let proxy = start_proxy(config).await;

    let body_a = r#"{"create_request":{"key":"L2Zvbw==","start_revision":"5"}}"#;
    let body_b = r#"{"create_request":{"start_revision":5,"key":"L2Zvbw==","progress_notify":true}}"#;

    let first = client()
        .post(proxy.url("/v3/watch"))
        .body(body_a)
        .send()
        .await
        .unwrap();
    let second = client()
        .post(proxy.url("/v3/watch"))
        .body(body_b)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(second.status(), 200);
    assert_eq!(backend.request_count(), 1);
    assert_eq!(backend.requests()[0].body, body_a.as_bytes());
    assert_eq!(backend.requests()[0].target, "/v3/watch");

    let other = client()
        .post(proxy.url("/v3/watch"))
        .body(r#"{"create_request":{"key":"L2Zvbw==","start_revision":6}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(other.status(), 200);
    assert_eq!(backend.request_count(), 2);

    let mut first = LineReader::new(first);
    let mut second = LineReader::new(second);
    backend.send_line(r#"{"result":{"events":[]}}"#);
    assert_eq!(first.next_line().await.unwrap(), r#"{"result":{"events":[]}}"#);
    assert_eq!(second.next_line().await.unwrap(), r#"{"result":{"events":[]}}"#);
}

#[tokio::test]
async fn malformed_v3_watch_is_rejected() {
    let backend = start_streaming_backend().await;
    let mut config = proxy_config(&[backend.addr]);
    config.watch.protocol = Protocol::V3;
    let proxy = start_proxy(config).await;

    let response = client()
        .post(proxy.url("/v3/watch"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(response.text().await.unwrap().contains("malformed watch request"));
    assert_eq!(backend.request_count(), 0);
    assert_eq!(proxy.hub.active_units(), 0);
}

#[tokio::test]
async fn shutdown_ends_open_watches() {
    let backend = start_streaming_backend().await;
    let proxy = start_proxy(proxy_config(&[backend.addr])).await;

    let (_, mut reader) = open_watch(&proxy, WATCH).await;
    backend.send_line("before");
    assert_eq!(reader.next_line().await.unwrap(), "before");

    proxy.shutdown.trigger();
    assert_eq!(reader.next_line().await, None);

    let result = tokio::time::timeout(Duration::from_secs(5), proxy.task)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
    eventually("upstream stream closed", || backend.closed_streams() == 1).await;
}
