use offline_proxy_core::http::Request;
use offline_proxy_core::Response;

use crate::common::{manifest_json, sha1_hex, Harness};

fn single_asset_manifest(body_hash: &str) -> Vec<u8> {
    manifest_json(
        serde_json::json!([{"name": "assets", "mode": "prefetch", "urls": ["/foo.txt"], "patterns": []}]),
        serde_json::json!([]),
        serde_json::json!({"/foo.txt": body_hash}),
    )
}

#[tokio::test]
async fn restart_serves_the_persisted_version_then_picks_up_an_update_once_idle_fires() {
    let harness = Harness::new();
    let v1 = b"this is foo".to_vec();
    let v1_hash = sha1_hex(&v1);
    harness.transport.set("/ngsw.json", Response::new(200, single_asset_manifest(&v1_hash))).await;
    harness.transport.set("/foo.txt", Response::new(200, v1.clone())).await;

    {
        let driver = harness.driver();
        driver.handle_fetch(None, &Request::get("/foo.txt")).await;
    } // `driver` drops here, standing in for the worker being torn down.

    let v2 = b"this is foo v2".to_vec();
    let v2_hash = sha1_hex(&v2);
    harness.transport.set("/ngsw.json", Response::new(200, single_asset_manifest(&v2_hash))).await;
    harness.transport.set("/foo.txt", Response::new(200, v2.clone())).await;

    let restarted = harness.restarted_driver();
    let first = restarted.handle_fetch(None, &Request::get("/foo.txt")).await;
    // the persisted control table still names v1 as latest, and its
    // asset is already cached, so the restart serves it without
    // touching the (now-changed) network.
    assert_eq!(first.unwrap().body, v1);

    // below the update-check interval: no opportunistic check yet.
    assert!(restarted.maybe_check_for_update().await.is_none());

    harness.clock.advance(12_000);
    let calls_before = harness.transport.calls().await.len();
    let updated = restarted.maybe_check_for_update().await.unwrap().unwrap();
    assert!(updated);
    let calls_after = harness.transport.calls().await;
    assert!(calls_after.len() > calls_before);
    assert!(calls_after.iter().any(|u| u.starts_with("/ngsw.json")));
    assert!(calls_after.iter().any(|u| u == "/foo.txt"));

    let next = restarted.handle_fetch(None, &Request::get("/foo.txt")).await;
    assert_eq!(next.unwrap().body, v2);
}
