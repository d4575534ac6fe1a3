//! Refresh round trips against a WireMock identity service

use base64::Engine;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use uid2_integration::core::envelope;
use uid2_integration::{
    ClientConfig, Environment, Identity, IdentityClient, IdentityManager, IdentityStatus,
    InMemoryIdentityStorage, ManagerConfig, ManagerState, NetworkError, SystemTimeSource,
    UID2Client, UID2Error,
};

const RESPONSE_KEY: [u8; 32] = [7u8; 32];

fn response_key_b64() -> String {
    base64::engine::general_purpose::STANDARD.encode(RESPONSE_KEY)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn identity(token: &str, refresh_from: i64) -> Identity {
    let now = now_ms();
    Identity::new(
        format!("ad-{}", token),
        format!("rt-{}", token),
        now + 3_600_000,
        now + refresh_from,
        now + 7_200_000,
        response_key_b64(),
    )
}

fn client_for(server: &MockServer) -> UID2Client {
    let config = ClientConfig {
        environment: Environment::Custom(server.uri()),
        ..Default::default()
    };
    UID2Client::new(config).expect("client should build")
}

/// A sealed refresh response, as the service would send it.
fn sealed(payload: serde_json::Value) -> ResponseTemplate {
    let body = envelope::seal_response(&RESPONSE_KEY, payload.to_string().as_bytes())
        .expect("sealing should succeed");
    ResponseTemplate::new(200).set_body_string(body)
}

#[tokio::test]
async fn test_refresh_success_over_http() {
    let server = MockServer::start().await;
    let next = identity("next", 3_600_000);

    Mock::given(method("POST"))
        .and(path("/v2/token/refresh"))
        .and(header("Content-Type", "application/x-www-form-urlencoded"))
        .and(header_exists("X-UID2-Client-Version"))
        .and(body_string("rt-current"))
        .respond_with(sealed(json!({
            "status": "success",
            "body": {
                "advertising_token": next.advertising_token,
                "refresh_token": next.refresh_token,
                "identity_expires": next.identity_expires,
                "refresh_from": next.refresh_from,
                "refresh_expires": next.refresh_expires,
                "refresh_response_key": next.refresh_response_key,
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let response = client
        .refresh_identity("rt-current", &response_key_b64())
        .await
        .unwrap();

    assert_eq!(response.status, IdentityStatus::Refreshed);
    assert_eq!(response.identity, Some(next));
}

#[tokio::test]
async fn test_refresh_opt_out_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/token/refresh"))
        .respond_with(sealed(json!({ "status": "optout" })))
        .mount(&server)
        .await;

    let response = client_for(&server)
        .refresh_identity("rt-current", &response_key_b64())
        .await
        .unwrap();

    assert_eq!(response.status, IdentityStatus::OptOut);
    assert!(response.identity.is_none());
}

#[tokio::test]
async fn test_refresh_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/token/refresh"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let error = client_for(&server)
        .refresh_identity("rt-current", &response_key_b64())
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        UID2Error::Network(NetworkError::RequestFailed { status: 500 })
    ));
    assert!(error.is_retryable());
}

#[tokio::test]
async fn test_refresh_with_wrong_key_fails_to_decrypt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/token/refresh"))
        .respond_with(sealed(json!({ "status": "optout" })))
        .mount(&server)
        .await;

    let wrong_key = base64::engine::general_purpose::STANDARD.encode([9u8; 32]);
    let error = client_for(&server)
        .refresh_identity("rt-current", &wrong_key)
        .await
        .unwrap_err();

    assert!(error.is_decrypt_failure());
}

#[tokio::test]
async fn test_manager_refreshes_through_http() {
    let server = MockServer::start().await;
    let next = identity("next", 3_600_000);

    Mock::given(method("POST"))
        .and(path("/v2/token/refresh"))
        .and(body_string("rt-current"))
        .respond_with(sealed(json!({
            "status": "success",
            "body": {
                "advertising_token": next.advertising_token,
                "refresh_token": next.refresh_token,
                "identity_expires": next.identity_expires.to_string(),
                "refresh_from": next.refresh_from.to_string(),
                "refresh_expires": next.refresh_expires.to_string(),
                "refresh_response_key": next.refresh_response_key,
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(InMemoryIdentityStorage::new());
    let manager = IdentityManager::with_components(
        ManagerConfig::default(),
        Arc::new(client_for(&server)),
        storage,
        Arc::new(SystemTimeSource),
    );

    let states = Box::pin(manager.state_stream());
    manager.set_identity(identity("current", -1_000));

    let refreshed = tokio::time::timeout(
        Duration::from_secs(5),
        states
            .filter(|state| futures::future::ready(matches!(state, ManagerState::Refreshed(_))))
            .next(),
    )
    .await
    .expect("refresh should complete");

    assert_eq!(refreshed, Some(ManagerState::Refreshed(next.clone())));
    assert_eq!(manager.get_advertising_token(), Some(next.advertising_token));
}
