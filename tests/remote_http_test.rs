//! HTTP remote authority client against a mock server.

use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trustsync::audit::GENESIS_HASH;
use trustsync::error::RemoteError;
use trustsync::remote::{HttpRemoteAuthority, RemoteAuthority};

fn key_json(version: u64, active: bool) -> serde_json::Value {
    serde_json::json!({
        "key_id": format!("key_{}", version),
        "public_material": "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAwJbY",
        "algorithm": "RSA-OAEP",
        "version": version,
        "active": active,
        "created_at": "2026-08-01T00:00:00Z",
        "rotated_at": null
    })
}

#[tokio::test]
async fn request_rotation_decodes_the_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/rotations"))
        .and(body_partial_json(serde_json::json!({
            "current_key_id": "key_1",
            "reason": "scheduled"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "new_key": key_json(2, true),
            "audit_tail": []
        })))
        .mount(&server)
        .await;

    let client = HttpRemoteAuthority::new(server.uri());
    let response = client
        .request_rotation(Some("key_1"), "scheduled")
        .await
        .unwrap();

    let new_key = response.new_key.unwrap();
    assert_eq!(new_key.version, 2);
    assert_eq!(new_key.algorithm, "RSA-OAEP");
    assert!(response.audit_tail.is_empty());
}

#[tokio::test]
async fn request_rotation_tolerates_a_keyless_ack() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/rotations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "new_key": null
        })))
        .mount(&server)
        .await;

    let client = HttpRemoteAuthority::new(server.uri());
    let response = client.request_rotation(None, "manual").await.unwrap();

    assert!(response.new_key.is_none());
    assert!(response.audit_tail.is_empty());
}

#[tokio::test]
async fn fetch_snapshot_decodes_keys_and_anchor() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/snapshot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "keys": [key_json(1, false), key_json(2, true)],
            "audit_tail": [],
            "tail_anchor_hash": GENESIS_HASH
        })))
        .mount(&server)
        .await;

    let client = HttpRemoteAuthority::new(server.uri());
    let snapshot = client.fetch_snapshot().await.unwrap();

    assert_eq!(snapshot.keys.len(), 2);
    assert_eq!(snapshot.tail_anchor_hash, GENESIS_HASH);
    assert_eq!(snapshot.keys.iter().filter(|k| k.active).count(), 1);
}

#[tokio::test]
async fn server_errors_surface_as_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/rotations"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = HttpRemoteAuthority::new(server.uri());
    let result = client.request_rotation(Some("key_1"), "scheduled").await;

    assert!(matches!(result, Err(RemoteError::Status(503))));
}

#[tokio::test]
async fn malformed_payloads_surface_as_decode_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/snapshot"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = HttpRemoteAuthority::new(server.uri());
    let result = client.fetch_snapshot().await;

    assert!(matches!(result, Err(RemoteError::Decode(_))));
}
