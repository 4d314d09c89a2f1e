use offline_proxy_core::http::Request;
use offline_proxy_core::Response;

use crate::common::{manifest_json, Harness};

#[tokio::test]
async fn stale_unhashed_asset_is_served_immediately_and_revalidated_in_the_background() {
    let harness = Harness::new();
    let body = manifest_json(
        serde_json::json!([{"name": "misc", "mode": "lazy", "urls": [], "patterns": ["^/unhashed\\.txt$"]}]),
        serde_json::json!([]),
        serde_json::json!({}),
    );
    harness.transport.set("/ngsw.json", Response::new(200, body)).await;

    let v1 = b"unhashed v1".to_vec();
    harness
        .transport
        .set("/unhashed.txt", Response::new(200, v1.clone()).with_header("cache-control", "max-age=10"))
        .await;

    let driver = harness.driver();
    let first = driver.handle_fetch(None, &Request::get("/unhashed.txt")).await;
    assert_eq!(first.unwrap().body, v1);
    assert_eq!(harness.transport.call_count("/unhashed.txt").await, 1);

    // max-age is 10s; advance past it so the cached entry is stale.
    harness.clock.advance(15_000);

    let v2 = b"unhashed v2".to_vec();
    harness
        .transport
        .set("/unhashed.txt", Response::new(200, v2.clone()).with_header("cache-control", "max-age=10"))
        .await;

    let stale = driver.handle_fetch(None, &Request::get("/unhashed.txt")).await;
    // stale-while-revalidate: the old body is still handed back...
    assert_eq!(stale.unwrap().body, v1);
    // ...and a revalidation fetch has been queued, not yet run.
    assert_eq!(harness.transport.call_count("/unhashed.txt").await, 1);

    harness.clock.advance(6_000);
    harness.scheduler.execute().await;
    assert_eq!(harness.transport.call_count("/unhashed.txt").await, 2);

    let revalidated = driver.handle_fetch(None, &Request::get("/unhashed.txt")).await;
    assert_eq!(revalidated.unwrap().body, v2);
    // revalidation already refreshed the entry, so this last read is a
    // cache hit with no further network traffic.
    assert_eq!(harness.transport.call_count("/unhashed.txt").await, 2);
}
