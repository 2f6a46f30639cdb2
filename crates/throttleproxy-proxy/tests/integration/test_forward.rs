//! Forwarding tests: status, headers and body relayed from the origin

use std::time::Duration;

use reqwest::StatusCode;
use throttleproxy_core::config::ConfigBuilder;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_forward_relays_status_headers_and_body() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video/seg-1.ts"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "video/mp2t")
                .insert_header("Server", "origin-test")
                .insert_header("X-VTX-Location", "edge-7")
                .insert_header("X-Cache", "HIT")
                .set_body_bytes(b"segment-bytes".to_vec()),
        )
        .mount(&origin)
        .await;

    let proxy = common::spawn_proxy(ConfigBuilder::new().build()).await;
    let response = common::client()
        .get(proxy.proxy_url("ua1", &common::origin_target(&origin, "/video/seg-1.ts")))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "video/mp2t");
    assert_eq!(headers["x-cache"], "HIT");
    assert!(headers.get("x-vtx-location").is_none());
    assert_ne!(
        headers.get("server").and_then(|v| v.to_str().ok()),
        Some("origin-test")
    );

    assert_eq!(&response.bytes().await.unwrap()[..], b"segment-bytes");

    assert!(common::wait_for(Duration::from_secs(5), || proxy.transfers("completed") == 1).await);
    assert_eq!(proxy.in_flight("ua1"), 0);
    assert_eq!(proxy.metrics.bytes_relayed_total.get(), 13);
}

#[tokio::test]
async fn test_custom_ignore_list() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Secret", "1")
                .insert_header("X-VTX-Location", "edge-7"),
        )
        .mount(&origin)
        .await;

    let config = ConfigBuilder::new().ignore_headers(["x-secret"]).build();
    let proxy = common::spawn_proxy(config).await;
    let response = common::client()
        .get(proxy.proxy_url("ua1", &common::origin_target(&origin, "/a")))
        .send()
        .await
        .unwrap();

    assert!(response.headers().get("x-secret").is_none());
    assert_eq!(response.headers()["x-vtx-location"], "edge-7");
}

#[tokio::test]
async fn test_repeated_headers_keep_every_value() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cookies"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("Set-Cookie", "a=1")
                .append_header("Set-Cookie", "b=2"),
        )
        .mount(&origin)
        .await;

    let proxy = common::spawn_proxy(ConfigBuilder::new().build()).await;
    let response = common::client()
        .get(proxy.proxy_url("ua1", &common::origin_target(&origin, "/cookies")))
        .send()
        .await
        .unwrap();

    let cookies: Vec<_> = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(cookies, vec!["a=1", "b=2"]);
}

#[tokio::test]
async fn test_origin_error_status_is_mirrored() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.ts"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&origin)
        .await;

    let proxy = common::spawn_proxy(ConfigBuilder::new().build()).await;
    let response = common::client()
        .get(proxy.proxy_url("ua1", &common::origin_target(&origin, "/missing.ts")))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "gone");
    assert!(common::wait_for(Duration::from_secs(5), || proxy.transfers("completed") == 1).await);
}

#[tokio::test]
async fn test_redirects_are_not_followed() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
        .mount(&origin)
        .await;

    let proxy = common::spawn_proxy(ConfigBuilder::new().build()).await;
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let response = client
        .get(proxy.proxy_url("ua1", &common::origin_target(&origin, "/old")))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()["location"], "/new");
}

#[tokio::test]
async fn test_query_string_reaches_origin() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/seg.ts"))
        .and(query_param("token", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&origin)
        .await;

    let proxy = common::spawn_proxy(ConfigBuilder::new().build()).await;
    let url = format!(
        "{}?token=abc",
        proxy.proxy_url("ua1", &common::origin_target(&origin, "/seg.ts"))
    );
    let response = common::client().get(url).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_percent_encoded_target_is_fetched() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video/seg-2.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"encoded".to_vec()))
        .expect(1)
        .mount(&origin)
        .await;

    let target = common::origin_target(&origin, "/video/seg-2.ts");
    let proxy = common::spawn_proxy(ConfigBuilder::new().build()).await;
    let response = common::client()
        .get(proxy.proxy_url("ua1", &urlencoding::encode(&target)))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&response.bytes().await.unwrap()[..], b"encoded");
    assert!(common::wait_for(Duration::from_secs(5), || proxy.transfers("completed") == 1).await);
}

#[tokio::test]
async fn test_origin_closing_mid_body_is_errored() {
    // declares 1000 bytes, sends 5, then hangs up
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = stream.read(&mut buf).await;
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\nhello")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();
    });

    let proxy = common::spawn_proxy(ConfigBuilder::new().build()).await;
    let response = common::client()
        .get(proxy.proxy_url("ua1", &format!("http://{origin_addr}/seg.ts")))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.bytes().await.is_err());

    assert!(common::wait_for(Duration::from_secs(5), || proxy.transfers("errored") == 1).await);
    assert_eq!(proxy.transfers("aborted"), 0);
    assert_eq!(proxy.transfers("completed"), 0);
    assert!(common::wait_for(Duration::from_secs(5), || proxy.in_flight("ua1") == 0).await);
}

#[tokio::test]
async fn test_unreachable_origin_is_bad_gateway() {
    // bind then drop to get a port nobody listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let proxy = common::spawn_proxy(ConfigBuilder::new().connect_timeout_secs(2).build()).await;
    let response = common::client()
        .get(proxy.proxy_url("ua1", &format!("http://127.0.0.1:{port}/seg.ts")))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = response.text().await.unwrap();
    assert!(body.starts_with(&format!(
        "Error getting http://127.0.0.1:{port}/seg.ts from server"
    )));
    assert_eq!(proxy.in_flight("ua1"), 0);
    assert_eq!(proxy.transfers("errored"), 1);
}

#[tokio::test]
async fn test_unsupported_scheme_is_rejected_before_admission() {
    let proxy = common::spawn_proxy(ConfigBuilder::new().build()).await;
    let response = common::client()
        .get(proxy.proxy_url("ua1", "ftp://files.example.com/a"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(proxy.service.groups().is_empty());
    assert_eq!(proxy.in_flight("ua1"), 0);
    assert_eq!(proxy.metrics.in_flight_requests.get(), 0);
}
