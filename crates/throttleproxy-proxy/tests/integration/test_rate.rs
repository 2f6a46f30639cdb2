//! Rate-setting endpoint tests

use reqwest::StatusCode;
use throttleproxy_core::config::ConfigBuilder;
use throttleproxy_core::domain::{BytesPerSecond, ThrottleKey};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

fn key(s: &str) -> ThrottleKey {
    ThrottleKey::new(s).unwrap()
}

#[tokio::test]
async fn test_initial_rate_is_stored() {
    let proxy = common::spawn_proxy(ConfigBuilder::new().build()).await;

    let response = common::client()
        .get(proxy.speed_url("ua1", "500000"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.text().await.unwrap(),
        "Setting throttle rate to 488.3 KiB/s"
    );
    assert_eq!(
        proxy.service.rate(&key("ua1")),
        BytesPerSecond::new(500_000).unwrap()
    );
    // setting a rate alone never creates a group
    assert!(proxy.service.group(&key("ua1")).is_none());
}

#[tokio::test]
async fn test_rejected_rate_changes_nothing() {
    let proxy = common::spawn_proxy(ConfigBuilder::new().default_rate(1_000_000).build()).await;

    let response = common::client()
        .get(proxy.speed_url("ua1", "notanumber"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.text().await.unwrap(),
        "Couldn't parse integer from string 'notanumber'"
    );
    assert!(proxy.service.rates().is_empty());
    assert!(proxy.service.groups().is_empty());
    assert_eq!(
        proxy
            .metrics
            .rate_changes_total
            .with_label_values(&["rejected"])
            .get(),
        1
    );
}

#[tokio::test]
async fn test_zero_rate_is_rejected() {
    let proxy = common::spawn_proxy(ConfigBuilder::new().build()).await;

    let response = common::client()
        .get(proxy.speed_url("ua1", "0"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(proxy.service.rates().is_empty());
}

#[tokio::test]
async fn test_rate_change_after_forward_is_queued() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/seg.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 16]))
        .mount(&origin)
        .await;

    let proxy = common::spawn_proxy(ConfigBuilder::new().default_rate(1_000_000).build()).await;
    let client = common::client();

    let body = client
        .get(proxy.proxy_url("ua1", &common::origin_target(&origin, "/seg.ts")))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body.len(), 16);

    let response = client
        .get(proxy.speed_url("ua1", "500000"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.text().await.unwrap(),
        "Queuing throttle rate change from 976.6 KiB/s to 488.3 KiB/s"
    );

    let group = proxy.service.group(&key("ua1")).unwrap();
    assert_eq!(group.rate(), BytesPerSecond::new(500_000).unwrap());
}

#[tokio::test]
async fn test_keys_are_independent() {
    let proxy = common::spawn_proxy(ConfigBuilder::new().default_rate(1_000_000).build()).await;
    let client = common::client();

    client
        .get(proxy.speed_url("ua1", "1000"))
        .send()
        .await
        .unwrap();

    assert_eq!(
        proxy.service.rate(&key("ua1")),
        BytesPerSecond::new(1000).unwrap()
    );
    assert_eq!(
        proxy.service.rate(&key("ua2")),
        BytesPerSecond::new(1_000_000).unwrap()
    );
}

#[tokio::test]
async fn test_unknown_path_and_method() {
    let proxy = common::spawn_proxy(ConfigBuilder::new().build()).await;
    let client = common::client();

    let response = client.get(proxy.url("/ua1/other")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .post(proxy.speed_url("ua1", "1000"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(proxy.service.rates().is_empty());
}
