use offline_proxy_core::http::Request;
use offline_proxy_core::runtime::ClientId;
use offline_proxy_core::Response;

use crate::common::{manifest_json, sha1_hex, Harness};

#[tokio::test]
async fn lazy_group_fetches_each_url_only_once_on_first_actual_request() {
    let harness = Harness::new();
    let baz = b"this is baz".to_vec();
    let qux = b"this is qux".to_vec();
    let body = manifest_json(
        serde_json::json!([{"name": "other", "mode": "lazy", "urls": ["/baz.txt", "/qux.txt"], "patterns": []}]),
        serde_json::json!([]),
        serde_json::json!({"/baz.txt": sha1_hex(&baz), "/qux.txt": sha1_hex(&qux)}),
    );
    harness.transport.set("/ngsw.json", Response::new(200, body)).await;
    harness.transport.set("/baz.txt", Response::new(200, baz.clone())).await;
    harness.transport.set("/qux.txt", Response::new(200, qux.clone())).await;

    let driver = harness.driver();
    driver.ensure_initialized().await.unwrap();
    // a lazy group's own initializeFully is a no-op without a prior
    // version to cross-copy from, so nothing has hit the network yet
    // beyond the manifest.
    assert_eq!(harness.transport.call_count("/baz.txt").await, 0);
    assert_eq!(harness.transport.call_count("/qux.txt").await, 0);

    let client = ClientId::new("c1");
    let r1 = driver.handle_fetch(Some(client.clone()), &Request::get("/baz.txt")).await;
    assert_eq!(r1.unwrap().body, baz);
    assert_eq!(harness.transport.call_count("/baz.txt").await, 1);

    let r2 = driver.handle_fetch(Some(client.clone()), &Request::get("/baz.txt")).await;
    assert_eq!(r2.unwrap().body, baz);
    assert_eq!(harness.transport.call_count("/baz.txt").await, 1);

    let r3 = driver.handle_fetch(Some(client), &Request::get("/qux.txt")).await;
    assert_eq!(r3.unwrap().body, qux);
    assert_eq!(harness.transport.call_count("/qux.txt").await, 1);
}
