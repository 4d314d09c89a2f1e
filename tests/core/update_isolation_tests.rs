use offline_proxy_core::http::Request;
use offline_proxy_core::runtime::ClientId;
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
async fn update_promotes_new_hash_while_existing_clients_stay_pinned_to_the_old_one() {
    let harness = Harness::new();
    let v1 = b"this is foo".to_vec();
    let v1_hash = sha1_hex(&v1);
    harness.transport.set("/ngsw.json", Response::new(200, single_asset_manifest(&v1_hash))).await;
    harness.transport.set("/foo.txt", Response::new(200, v1.clone())).await;

    let driver = harness.driver();
    let existing = ClientId::new("existing-client");
    let first = driver.handle_fetch(Some(existing.clone()), &Request::get("/foo.txt")).await;
    assert_eq!(first.unwrap().body, v1);

    let v2 = b"this is foo v2".to_vec();
    let v2_hash = sha1_hex(&v2);
    harness.transport.set("/ngsw.json", Response::new(200, single_asset_manifest(&v2_hash))).await;
    harness.transport.set("/foo.txt", Response::new(200, v2.clone())).await;

    assert!(driver.check_for_update().await.unwrap());

    // already-pinned client keeps seeing the version it was assigned,
    // even though a newer one is now latest.
    let still_old = driver.handle_fetch(Some(existing), &Request::get("/foo.txt")).await;
    assert_eq!(still_old.unwrap().body, v1);

    // a brand-new client gets pinned straight to the new latest.
    let fresh = ClientId::new("fresh-client");
    let new_resp = driver.handle_fetch(Some(fresh), &Request::get("/foo.txt")).await;
    assert_eq!(new_resp.unwrap().body, v2);

    // a null-client navigation preload also now resolves to the new latest.
    let preload = driver.handle_fetch(None, &Request::get("/foo.txt")).await;
    assert_eq!(preload.unwrap().body, v2);
}
