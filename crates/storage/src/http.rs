//! JSON-over-HTTP storage client.
//!
//! - Login: `POST auth_url` with `{"phone", "password"}`, answered by
//!   `{"token"}`.
//! - Upload: `PUT upload_url` with the raw bytes and a bearer token, answered
//!   by `{"url"}`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AbortSignal, StorageClient, StorageError, StorageFuture, StorageProvider};

const MIB: f64 = 1024.0 * 1024.0;

/// Endpoints and timeouts of the HTTP storage service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpStorageConfig {
    #[serde(default)]
    pub auth_url: String,

    #[serde(default)]
    pub upload_url: String,

    /// Timeout for a login, and the floor for upload timeouts.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Upload time allowed per MiB of payload.
    #[serde(default = "default_upload_secs_per_mib")]
    pub upload_secs_per_mib: u64,
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_upload_secs_per_mib() -> u64 {
    20
}

impl Default for HttpStorageConfig {
    fn default() -> Self {
        Self {
            auth_url: String::new(),
            upload_url: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
            upload_secs_per_mib: default_upload_secs_per_mib(),
        }
    }
}

impl HttpStorageConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Timeout for uploading `size` bytes: proportional to the size, never
    /// below the request timeout.
    pub fn upload_timeout(&self, size: usize) -> Duration {
        let scaled = Duration::from_secs_f64(size as f64 / MIB * self.upload_secs_per_mib as f64);
        scaled.max(self.request_timeout())
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    phone: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

/// Storage client for one request. Aborting it affects only this instance.
pub struct HttpStorageClient {
    http: Client,
    config: Arc<HttpStorageConfig>,
    signal: AbortSignal,
}

impl HttpStorageClient {
    pub fn new(http: Client, config: Arc<HttpStorageConfig>) -> Self {
        Self {
            http,
            config,
            signal: AbortSignal::new(),
        }
    }

    async fn do_login(&self, phone: &str, password: &str) -> Result<String, StorageError> {
        let resp = self
            .http
            .post(&self.config.auth_url)
            .json(&LoginRequest { phone, password })
            .timeout(self.config.request_timeout())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StorageError::Auth(format!("server returned {status}")));
        }

        let body: LoginResponse = resp.json().await?;
        if body.token.is_empty() {
            return Err(StorageError::Auth("empty token".into()));
        }
        Ok(body.token)
    }

    async fn do_upload(&self, token: &str, data: &[u8]) -> Result<String, StorageError> {
        let timeout = self.config.upload_timeout(data.len());
        debug!(bytes = data.len(), ?timeout, "uploading chunk");

        let resp = self
            .http
            .put(&self.config.upload_url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec())
            .timeout(timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StorageError::Upload(format!("server returned {status}")));
        }

        let body: UploadResponse = resp.json().await?;
        if body.url.is_empty() {
            return Err(StorageError::Upload("empty download URL".into()));
        }
        Ok(body.url)
    }
}

impl StorageClient for HttpStorageClient {
    fn login<'a>(&'a self, phone: &'a str, password: &'a str) -> StorageFuture<'a, String> {
        Box::pin(self.signal.run(self.do_login(phone, password)))
    }

    fn upload<'a>(&'a self, token: &'a str, data: &'a [u8]) -> StorageFuture<'a, String> {
        Box::pin(self.signal.run(self.do_upload(token, data)))
    }

    fn abort(&self) {
        self.signal.abort();
    }
}

/// Creates [`HttpStorageClient`]s sharing one connection pool.
#[derive(Clone)]
pub struct HttpStorageProvider {
    http: Client,
    config: Arc<HttpStorageConfig>,
}

impl HttpStorageProvider {
    pub fn new(config: HttpStorageConfig) -> Result<Self, StorageError> {
        let http = Client::builder()
            .user_agent(concat!("parcel/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }
}

impl StorageProvider for HttpStorageProvider {
    fn client(&self) -> Arc<dyn StorageClient> {
        Arc::new(HttpStorageClient::new(self.http.clone(), Arc::clone(&self.config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpStorageProvider {
        HttpStorageProvider::new(HttpStorageConfig {
            auth_url: format!("{}/auth/token", server.uri()),
            upload_url: format!("{}/upload", server.uri()),
            ..HttpStorageConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn upload_timeout_scales_with_size() {
        let config = HttpStorageConfig::default();
        assert_eq!(config.upload_timeout(1024), Duration::from_secs(60));
        assert_eq!(
            config.upload_timeout(15 * 1024 * 1024),
            Duration::from_secs(300)
        );
    }

    #[tokio::test]
    async fn login_returns_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token":"tok-1"}"#))
            .mount(&server)
            .await;

        let client = provider(&server).client();
        let token = client.login("5355555", "secret").await.unwrap();
        assert_eq!(token, "tok-1");
    }

    #[tokio::test]
    async fn login_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = provider(&server).client();
        let err = client.login("5355555", "wrong").await.unwrap_err();
        assert!(matches!(err, StorageError::Auth(_)));
        assert!(!err.is_aborted());
    }

    #[tokio::test]
    async fn upload_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"url":"https://s3.example/x"}"#),
            )
            .mount(&server)
            .await;

        let client = provider(&server).client();
        let url = client.upload("tok-1", b"chunk").await.unwrap();
        assert_eq!(url, "https://s3.example/x");
    }

    #[tokio::test]
    async fn upload_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = provider(&server).client();
        let err = client.upload("tok-1", b"chunk").await.unwrap_err();
        assert!(matches!(err, StorageError::Upload(_)));
    }

    #[tokio::test]
    async fn abort_interrupts_slow_upload() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"url":"https://s3.example/x"}"#)
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let client = provider(&server).client();
        let aborter = Arc::clone(&client);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            aborter.abort();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), client.upload("t", b"data"))
            .await
            .expect("abort did not interrupt the upload");
        assert!(result.unwrap_err().is_aborted());

        // Sticky for the instance, fresh instances are unaffected.
        assert!(client.login("p", "x").await.unwrap_err().is_aborted());
    }
}
