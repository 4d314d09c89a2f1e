use offline_proxy_core::http::Request;
use offline_proxy_core::Response;

use crate::common::{manifest_json, Harness};

#[tokio::test]
async fn data_group_keeps_only_the_most_recently_used_max_size_entries() {
    let harness = Harness::new();
    let body = manifest_json(
        serde_json::json!([]),
        serde_json::json!([{"name": "api", "patterns": ["^/api/.*"], "maxSize": 3, "maxAge": 60_000}]),
        serde_json::json!({}),
    );
    harness.transport.set("/ngsw.json", Response::new(200, body)).await;
    for n in 1..=5 {
        harness
            .transport
            .set(format!("/api/item{n}"), Response::new(200, format!("item{n}").into_bytes()))
            .await;
    }

    let driver = harness.driver();
    for n in 1..=5 {
        let url = format!("/api/item{n}");
        let resp = driver.handle_fetch(None, &Request::get(&url)).await;
        assert_eq!(resp.unwrap().body, format!("item{n}").into_bytes());
    }

    // every URL has been hit exactly once so far.
    for n in 1..=5 {
        assert_eq!(harness.transport.call_count(&format!("/api/item{n}")).await, 1);
    }

    // the two least-recently-used entries (item1, item2) were evicted
    // to make room; re-requesting them costs a fresh network hit, while
    // the three most recent stay cache hits.
    for n in 1..=2 {
        let url = format!("/api/item{n}");
        driver.handle_fetch(None, &Request::get(&url)).await;
        assert_eq!(harness.transport.call_count(&url).await, 2);
    }
    for n in 3..=5 {
        let url = format!("/api/item{n}");
        driver.handle_fetch(None, &Request::get(&url)).await;
        assert_eq!(harness.transport.call_count(&url).await, 1);
    }
}
