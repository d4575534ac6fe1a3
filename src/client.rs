//! UID2 Client
//!
//! Refresh and client-side generate round trips against the identity service.

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::core::envelope::{self, IV_LENGTH};
use crate::core::keys;
use crate::core::{
    HttpMethod, HttpRequest, HttpTransport, ReqwestHttpTransport, SystemTimeSource, TimeSource,
};
use crate::error::{ConfigurationError, CryptoError, NetworkError, ProtocolError, UID2Error, UID2Result};
use crate::types::{ClientConfig, Identity, IdentityRequest, IdentityStatus, ResponsePackage};
use crate::version::client_version_header;

/// Relative path of the refresh endpoint.
pub const REFRESH_PATH: &str = "/v2/token/refresh";

/// Relative path of the client-side generate endpoint.
pub const CLIENT_GENERATE_PATH: &str = "/v2/token/client-generate";

/// Header carrying `<platform>-<version>`.
pub const CLIENT_VERSION_HEADER: &str = "X-UID2-Client-Version";

/// Identity service client interface (for dependency injection).
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Exchange a refresh token for the next identity.
    async fn refresh_identity(
        &self,
        refresh_token: &str,
        refresh_response_key: &str,
    ) -> UID2Result<ResponsePackage>;

    /// Generate a new identity from directly identifying information.
    ///
    /// [`IdentityManager`](crate::IdentityManager) passes the request already
    /// normalized. Normalization is idempotent, so implementations may
    /// normalize again for direct callers.
    async fn generate_identity(
        &self,
        request: &IdentityRequest,
        subscription_id: &str,
        server_public_key: &str,
    ) -> UID2Result<ResponsePackage>;
}

/// Decrypted response payload.
#[derive(Debug, Deserialize)]
struct ResponsePayload {
    status: String,
    #[serde(default)]
    body: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Client for the identity service.
pub struct UID2Client<T: HttpTransport = ReqwestHttpTransport> {
    config: ClientConfig,
    transport: Arc<T>,
    time_source: Arc<dyn TimeSource>,
}

impl UID2Client<ReqwestHttpTransport> {
    /// Create a new client with the default transport.
    pub fn new(config: ClientConfig) -> UID2Result<Self> {
        let transport = ReqwestHttpTransport::with_timeout(config.timeout)?;
        Ok(Self::with_components(
            config,
            transport,
            Arc::new(SystemTimeSource),
        ))
    }
}

impl<T: HttpTransport> UID2Client<T> {
    /// Create a client with custom implementations.
    pub fn with_components(config: ClientConfig, transport: T, time_source: Arc<dyn TimeSource>) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            time_source,
        }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve an endpoint path against the configured base URL.
    pub fn endpoint(&self, path: &str) -> UID2Result<Url> {
        let base = self.config.environment.server_url();
        Url::parse(base)
            .and_then(|url| url.join(path))
            .map_err(|_| {
                ConfigurationError::InvalidApiUrl {
                    url: base.to_string(),
                }
                .into()
            })
    }

    fn headers(&self, content_type: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            CLIENT_VERSION_HEADER.to_string(),
            client_version_header(&self.config.platform),
        );
        headers.insert("Content-Type".to_string(), content_type.to_string());
        headers
    }

    async fn post(&self, url: Url, content_type: &str, body: String) -> UID2Result<String> {
        let request = HttpRequest {
            method: HttpMethod::Post,
            url: url.to_string(),
            headers: self.headers(content_type),
            body: Some(body),
            timeout: Some(self.config.timeout),
        };

        let response = self.transport.send(request).await?;
        if response.status != 200 {
            warn!(status = response.status, "Identity service request failed");
            return Err(NetworkError::RequestFailed {
                status: response.status,
            }
            .into());
        }

        Ok(response.body)
    }
}

/// Map a decrypted payload onto a response, `success` yielding `success_status`.
fn parse_response(
    decrypted: Vec<u8>,
    success_status: IdentityStatus,
) -> UID2Result<ResponsePackage> {
    let payload: ResponsePayload =
        serde_json::from_slice(&decrypted).map_err(|e| ProtocolError::InvalidJson {
            message: e.to_string(),
        })?;

    match payload.status.as_str() {
        "success" => {
            let body = payload.body.ok_or_else(|| ProtocolError::MissingField {
                field: "body".to_string(),
            })?;
            let identity: Identity =
                serde_json::from_value(body).map_err(|e| ProtocolError::InvalidJson {
                    message: e.to_string(),
                })?;

            Ok(ResponsePackage {
                identity: Some(identity),
                status: success_status,
                message: payload
                    .message
                    .unwrap_or_else(|| "Identity refreshed".to_string()),
            })
        }
        "optout" => Ok(ResponsePackage {
            identity: None,
            status: IdentityStatus::OptOut,
            message: payload.message.unwrap_or_else(|| "User opted out".to_string()),
        }),
        "expired_token" => Ok(ResponsePackage {
            identity: None,
            status: IdentityStatus::RefreshExpired,
            message: payload
                .message
                .unwrap_or_else(|| "Refresh token expired".to_string()),
        }),
        "client_error" | "invalid_token" | "unauthorized" => Err(ProtocolError::Rejected {
            status: payload.status,
            message: payload.message,
        }
        .into()),
        _ => Err(ProtocolError::UnknownStatus {
            status: payload.status,
        }
        .into()),
    }
}

#[async_trait]
impl<T: HttpTransport> IdentityClient for UID2Client<T> {
    #[instrument(skip_all)]
    async fn refresh_identity(
        &self,
        refresh_token: &str,
        refresh_response_key: &str,
    ) -> UID2Result<ResponsePackage> {
        let url = self.endpoint(REFRESH_PATH)?;
        debug!(%url, "Refreshing identity");

        let body = self
            .post(url, "application/x-www-form-urlencoded", refresh_token.to_string())
            .await?;

        // Refresh responses are `IV || ciphertext` with no timestamp or nonce prefix.
        let decrypted = envelope::decrypt(refresh_response_key, &body, true)
            .ok_or(CryptoError::PayloadDecrypt)?;

        parse_response(decrypted, IdentityStatus::Refreshed)
    }

    #[instrument(skip_all)]
    async fn generate_identity(
        &self,
        request: &IdentityRequest,
        subscription_id: &str,
        server_public_key: &str,
    ) -> UID2Result<ResponsePackage> {
        let url = self.endpoint(CLIENT_GENERATE_PATH)?;
        // Direct callers may pass raw input.
        let payload = request.normalize()?.to_payload();

        let agreement = keys::agree(server_public_key)?;
        let secret = agreement.shared_secret.expose_secret();

        let now = self.time_source.now_ms();
        let iv = rand::random::<[u8; IV_LENGTH]>();
        let aad = format!("[{}]", now);
        let ciphertext = envelope::seal_with_aad(secret, &iv, aad.as_bytes(), payload.as_bytes())?;

        let engine = base64::engine::general_purpose::STANDARD;
        let body = serde_json::json!({
            "payload": engine.encode(&ciphertext),
            "iv": engine.encode(iv),
            "public_key": agreement.public_key,
            "timestamp": now,
            "subscription_id": subscription_id,
            "app_name": self.config.application_id,
        });
        debug!(%url, "Generating identity");

        let response = self.post(url, "application/json", body.to_string()).await?;

        let decrypted = envelope::decrypt_with_key(secret, &response, true)
            .ok_or(CryptoError::PayloadDecrypt)?;

        parse_response(decrypted, IdentityStatus::Established)
    }
}

/// Mock identity client for testing.
///
/// Results are returned in the order they were queued; an optional delay is
/// applied before each call completes.
#[derive(Default)]
pub struct MockIdentityClient {
    refresh_results: Mutex<VecDeque<UID2Result<ResponsePackage>>>,
    generate_results: Mutex<VecDeque<UID2Result<ResponsePackage>>>,
    refresh_history: Mutex<Vec<String>>,
    generate_history: Mutex<Vec<IdentityRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockIdentityClient {
    /// Create new mock client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next refresh.
    pub fn queue_refresh(&self, result: UID2Result<ResponsePackage>) -> &Self {
        self.refresh_results.lock().push_back(result);
        self
    }

    /// Queue a successful refresh returning `identity`.
    pub fn queue_refreshed(&self, identity: Identity) -> &Self {
        self.queue_refresh(Ok(ResponsePackage {
            identity: Some(identity),
            status: IdentityStatus::Refreshed,
            message: "Identity refreshed".to_string(),
        }))
    }

    /// Queue the result of the next generate.
    pub fn queue_generate(&self, result: UID2Result<ResponsePackage>) -> &Self {
        self.generate_results.lock().push_back(result);
        self
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Number of refresh calls made.
    pub fn refresh_count(&self) -> usize {
        self.refresh_history.lock().len()
    }

    /// Refresh tokens passed to each refresh call.
    pub fn refresh_tokens(&self) -> Vec<String> {
        self.refresh_history.lock().clone()
    }

    /// Number of generate calls made.
    pub fn generate_count(&self) -> usize {
        self.generate_history.lock().len()
    }

    /// Requests passed to each generate call.
    pub fn generate_requests(&self) -> Vec<IdentityRequest> {
        self.generate_history.lock().clone()
    }

    async fn wait(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn exhausted() -> UID2Error {
        NetworkError::ConnectionFailed {
            message: "No mock response available".to_string(),
        }
        .into()
    }
}

#[async_trait]
impl IdentityClient for MockIdentityClient {
    async fn refresh_identity(
        &self,
        refresh_token: &str,
        _refresh_response_key: &str,
    ) -> UID2Result<ResponsePackage> {
        self.refresh_history
            .lock()
            .push(refresh_token.to_string());
        self.wait().await;

        let result = self.refresh_results.lock().pop_front();
        result.unwrap_or_else(|| Err(Self::exhausted()))
    }

    async fn generate_identity(
        &self,
        request: &IdentityRequest,
        _subscription_id: &str,
        _server_public_key: &str,
    ) -> UID2Result<ResponsePackage> {
        self.generate_history.lock().push(request.clone());
        self.wait().await;

        let result = self.generate_results.lock().pop_front();
        result.unwrap_or_else(|| Err(Self::exhausted()))
    }
}

/// Create a client for the configured environment.
pub fn create_client(config: ClientConfig) -> UID2Result<UID2Client> {
    UID2Client::new(config)
}

/// Create mock identity client for testing.
pub fn create_mock_client() -> MockIdentityClient {
    MockIdentityClient::new()
}
