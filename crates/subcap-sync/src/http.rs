//! REST client for the sync server.

use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use subcap_core::config::TransportConfig;
use subcap_core::{EncryptedEnvelope, SyncError, SyncResult};
use tracing::debug;

use crate::transport::{
    validate_server_url, ApiClient, AuthResponse, ClientFactory, MerchantMappings,
    PutSyncResponse, RemoteSyncState,
};

pub struct HttpApiClient {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpApiClient {
    pub fn new(base: Url, token: Option<&str>, config: &TransportConfig) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| SyncError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base,
            token: token.map(str::to_string),
        })
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| SyncError::Configuration(format!("bad endpoint {path}: {e}")))
    }

    fn request(&self, method: Method, path: &str) -> SyncResult<RequestBuilder> {
        let mut req = self.client.request(method, self.endpoint(path)?);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        Ok(req)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> SyncResult<T> {
        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let resp = check_status(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| SyncError::Transport(format!("invalid response body: {e}")))
    }
}

/// Error body shapes the server is known to send.
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "message")]
    error: String,
}

async fn check_status(resp: Response) -> SyncResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or_else(|_| {
            if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text
            }
        });
    Err(SyncError::Transport(format!("HTTP {}: {message}", status.as_u16())))
}

impl ApiClient for HttpApiClient {
    async fn login(&self, email: &str, password_hash: &str) -> SyncResult<AuthResponse> {
        let req = self
            .request(Method::POST, "auth/login")?
            .json(&json!({ "email": email, "passwordHash": password_hash }));
        self.send(req).await
    }

    async fn register(
        &self,
        email: &str,
        password_hash: &str,
        tier: &str,
    ) -> SyncResult<AuthResponse> {
        let req = self.request(Method::POST, "auth/register")?.json(&json!({
            "email": email,
            "passwordHash": password_hash,
            "tier": tier,
        }));
        self.send(req).await
    }

    async fn get_sync_data(&self) -> SyncResult<RemoteSyncState> {
        self.send(self.request(Method::GET, "sync")?).await
    }

    async fn put_sync_data(
        &self,
        envelope: &EncryptedEnvelope,
        version: u64,
    ) -> SyncResult<PutSyncResponse> {
        let req = self
            .request(Method::PUT, "sync")?
            .json(&json!({ "encryptedData": envelope, "version": version }));
        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        if resp.status() == StatusCode::CONFLICT {
            debug!(version, "server rejected stale version");
            return Err(SyncError::Conflict { attempted: version });
        }
        check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Transport(format!("invalid response body: {e}")))
    }

    async fn get_shared_mappings(&self, card_type: &str) -> SyncResult<MerchantMappings> {
        #[derive(Deserialize)]
        struct Body {
            #[serde(default)]
            mappings: MerchantMappings,
        }
        let req = self
            .request(Method::GET, "mappings")?
            .query(&[("cardType", card_type)]);
        let body: Body = self.send(req).await?;
        Ok(body.mappings)
    }

    async fn contribute_mappings(
        &self,
        card_type: &str,
        mappings: &MerchantMappings,
    ) -> SyncResult<()> {
        let req = self
            .request(Method::POST, "mappings/contribute")?
            .json(&json!({ "cardType": card_type, "mappings": mappings }));
        let _: serde_json::Value = self.send(req).await?;
        Ok(())
    }
}

/// Builds [`HttpApiClient`]s with the configured timeout and user agent.
#[derive(Debug, Clone, Default)]
pub struct HttpClientFactory {
    config: TransportConfig,
}

impl HttpClientFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

impl ClientFactory for HttpClientFactory {
    type Client = HttpApiClient;

    fn build(&self, server_url: &str, token: Option<&str>) -> SyncResult<HttpApiClient> {
        let base = validate_server_url(server_url)?;
        HttpApiClient::new(base, token, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn client(base: &str) -> HttpApiClient {
        HttpClientFactory::default().build(base, Some("t")).unwrap()
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let c = client("https://sync.example.com/api");
        assert_eq!(
            c.endpoint("sync").unwrap().as_str(),
            "https://sync.example.com/api/sync"
        );

        let c = client("https://sync.example.com/api/");
        assert_eq!(
            c.endpoint("/auth/login").unwrap().as_str(),
            "https://sync.example.com/api/auth/login"
        );

        let c = client("http://localhost:8787");
        assert_eq!(c.endpoint("sync").unwrap().as_str(), "http://localhost:8787/sync");
    }

    #[test]
    fn test_factory_rejects_bad_url() {
        let err = HttpClientFactory::default()
            .build("ftp://x", None)
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    /// Answer every connection with the same canned response.
    async fn canned_server(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                read_request(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                return;
            }
            request.extend_from_slice(&chunk[..n]);
            let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if request.len() >= end + 4 + body_len {
                return;
            }
        }
    }

    fn envelope() -> EncryptedEnvelope {
        EncryptedEnvelope {
            ciphertext: "Y2lwaGVy".into(),
            iv: "aXY=".into(),
            salt: None,
        }
    }

    #[tokio::test]
    async fn test_success_body_is_decoded() {
        let base = canned_server("200 OK", r#"{"version":3,"encryptedData":null}"#).await;
        let state = client(&base).get_sync_data().await.unwrap();
        assert_eq!(state.version, 3);
        assert!(state.encrypted_data.is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_carries_server_error_field() {
        let base = canned_server("401 Unauthorized", r#"{"error":"Invalid credentials"}"#).await;
        let err = client(&base).login("a@example.com", "hash").await.unwrap_err();

        assert!(matches!(&err, SyncError::Transport(m) if m == "HTTP 401: Invalid credentials"));
        assert!(crate::manager::is_confirmed_remembered_unlock_auth_failure(
            &err.to_string()
        ));
    }

    #[tokio::test]
    async fn test_message_field_is_accepted() {
        let base = canned_server("409 Conflict", r#"{"message":"Account already exists"}"#).await;
        let err = client(&base)
            .register("a@example.com", "hash", "free")
            .await
            .unwrap_err();
        assert!(
            matches!(&err, SyncError::Transport(m) if m == "HTTP 409: Account already exists"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn test_stale_put_is_conflict() {
        let base = canned_server("409 Conflict", r#"{"error":"version mismatch"}"#).await;
        let err = client(&base).put_sync_data(&envelope(), 5).await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict { attempted: 5 }), "{err:?}");
    }

    #[tokio::test]
    async fn test_empty_error_body_uses_status_reason() {
        let base = canned_server("500 Internal Server Error", "").await;
        let err = client(&base).get_sync_data().await.unwrap_err();
        assert!(
            matches!(&err, SyncError::Transport(m) if m == "HTTP 500: Internal Server Error"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn test_plain_text_error_body_is_kept() {
        let base = canned_server("502 Bad Gateway", "upstream down").await;
        let err = client(&base).put_sync_data(&envelope(), 1).await.unwrap_err();
        assert!(
            matches!(&err, SyncError::Transport(m) if m == "HTTP 502: upstream down"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // Port 9 (discard) on loopback is closed on CI hosts.
        let c = client("http://127.0.0.1:9");
        let err = c.get_sync_data().await.unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)), "{err:?}");
    }
}
