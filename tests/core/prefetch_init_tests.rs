use offline_proxy_core::http::Request;
use offline_proxy_core::runtime::ClientId;
use offline_proxy_core::Response;

use crate::common::{manifest_json, sha1_hex, Harness};

#[tokio::test]
async fn prefetch_group_fetches_manifest_and_every_listed_url_then_goes_quiet() {
    let harness = Harness::new();
    let foo = b"this is foo".to_vec();
    let bar = b"this is bar".to_vec();
    let body = manifest_json(
        serde_json::json!([{"name": "assets", "mode": "prefetch", "urls": ["/foo.txt", "/bar.txt"], "patterns": []}]),
        serde_json::json!([]),
        serde_json::json!({"/foo.txt": sha1_hex(&foo), "/bar.txt": sha1_hex(&bar)}),
    );
    harness.transport.set("/ngsw.json", Response::new(200, body)).await;
    harness.transport.set("/foo.txt", Response::new(200, foo.clone())).await;
    harness.transport.set("/bar.txt", Response::new(200, bar.clone())).await;

    let driver = harness.driver();
    let resp = driver
        .handle_fetch(Some(ClientId::new("c1")), &Request::get("/foo.txt"))
        .await;
    assert_eq!(resp.unwrap().body, foo);

    // "localhost" initializes inline, so by the time the first request
    // has settled, the prefetch group has already reached the manifest
    // and every URL it lists, in declaration order.
    let calls = harness.transport.calls().await;
    assert_eq!(calls.len(), 3);
    assert!(calls[0].starts_with("/ngsw.json"));
    assert_eq!(calls[1], "/foo.txt");
    assert_eq!(calls[2], "/bar.txt");

    let second = driver
        .handle_fetch(Some(ClientId::new("c1")), &Request::get("/bar.txt"))
        .await;
    assert_eq!(second.unwrap().body, bar);
    assert_eq!(harness.transport.call_count("/foo.txt").await, 1);
    assert_eq!(harness.transport.call_count("/bar.txt").await, 1);
}
