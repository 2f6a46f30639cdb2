//! Throughput tests against the shared per-key throttle

use std::time::{Duration, Instant};

use throttleproxy_core::config::ConfigBuilder;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

async fn origin_with_body(route: &str, size: usize) -> MockServer {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; size]))
        .mount(&origin)
        .await;
    origin
}

#[tokio::test]
async fn test_single_transfer_is_held_to_rate() {
    let origin = origin_with_body("/big.bin", 100_000).await;
    let proxy = common::spawn_proxy(ConfigBuilder::new().default_rate(50_000).burst_ms(100).build())
        .await;

    let start = Instant::now();
    let body = common::client()
        .get(proxy.proxy_url("ua1", &common::origin_target(&origin, "/big.bin")))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(body.len(), 100_000);
    // 5 000 bytes of burst, the remaining 95 000 at 50 000 B/s
    assert!(elapsed >= Duration::from_millis(1500), "took {elapsed:?}");
    assert!(common::wait_for(Duration::from_secs(5), || proxy.transfers("completed") == 1).await);
}

#[tokio::test]
async fn test_concurrent_transfers_share_the_key_rate() {
    let origin = origin_with_body("/half.bin", 50_000).await;
    let proxy = common::spawn_proxy(ConfigBuilder::new().default_rate(50_000).burst_ms(100).build())
        .await;
    let client = common::client();
    let url = proxy.proxy_url("ua1", &common::origin_target(&origin, "/half.bin"));

    let fetch = |url: String| {
        let client = client.clone();
        async move { client.get(url).send().await.unwrap().bytes().await.unwrap() }
    };

    let start = Instant::now();
    let (a, b) = tokio::join!(fetch(url.clone()), fetch(url));
    let elapsed = start.elapsed();

    assert_eq!(a.len(), 50_000);
    assert_eq!(b.len(), 50_000);
    assert!(elapsed >= Duration::from_millis(1500), "took {elapsed:?}");
}

#[tokio::test]
async fn test_different_keys_do_not_share_budget() {
    let origin = origin_with_body("/half.bin", 50_000).await;
    let proxy = common::spawn_proxy(ConfigBuilder::new().default_rate(50_000).burst_ms(100).build())
        .await;
    let client = common::client();
    let target = common::origin_target(&origin, "/half.bin");

    let fetch = |url: String| {
        let client = client.clone();
        async move { client.get(url).send().await.unwrap().bytes().await.unwrap() }
    };

    let start = Instant::now();
    let (a, b) = tokio::join!(
        fetch(proxy.proxy_url("ua1", &target)),
        fetch(proxy.proxy_url("ua2", &target))
    );
    let elapsed = start.elapsed();

    assert_eq!(a.len(), 50_000);
    assert_eq!(b.len(), 50_000);
    // each key alone needs about 0.9 s; sharing one budget would need 1.9 s
    assert!(elapsed < Duration::from_millis(1700), "took {elapsed:?}");
}

#[tokio::test]
async fn test_caller_disconnect_aborts_transfer() {
    let origin = origin_with_body("/long.bin", 400_000).await;
    let proxy = common::spawn_proxy(ConfigBuilder::new().default_rate(20_000).burst_ms(100).build())
        .await;

    let response = common::client()
        .get(proxy.proxy_url("ua1", &common::origin_target(&origin, "/long.bin")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(proxy.in_flight("ua1"), 1);
    drop(response);

    assert!(common::wait_for(Duration::from_secs(15), || proxy.in_flight("ua1") == 0).await);
    assert_eq!(proxy.transfers("aborted"), 1);
    assert_eq!(proxy.transfers("completed"), 0);
    assert_eq!(proxy.metrics.in_flight_requests.get(), 0);
}

#[tokio::test]
async fn test_rate_lowered_mid_transfer_slows_it_down() {
    let origin = origin_with_body("/big.bin", 60_000).await;
    let proxy = common::spawn_proxy(
        ConfigBuilder::new()
            .default_rate(1_000_000)
            .burst_ms(10)
            .build(),
    )
    .await;
    let client = common::client();

    // create the group at the fast rate, then slow it right down
    let warmup = client
        .get(proxy.proxy_url("ua1", &common::origin_target(&origin, "/big.bin")))
        .send()
        .await
        .unwrap();
    warmup.bytes().await.unwrap();
    client
        .get(proxy.speed_url("ua1", "30000"))
        .send()
        .await
        .unwrap();

    let start = Instant::now();
    client
        .get(proxy.proxy_url("ua1", &common::origin_target(&origin, "/big.bin")))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(1500));
}
