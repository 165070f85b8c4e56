// Remote proof-of-work sources: peer work servers and the delegated work service
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{Result, WalletError};

const DELEGATED_MUTATION: &str = "mutation($hash:String!, $difficultyMultiplier: Int!, $blockAward: Boolean) { workGenerate(input:{hash:$hash, difficultyMultiplier:$difficultyMultiplier, blockAward: $blockAward}) }";

#[derive(Deserialize)]
struct PeerWorkResponse {
    #[serde(default)]
    work: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize, Default)]
struct DelegatedData {
    #[serde(rename = "workGenerate", default)]
    work_generate: Option<String>,
}

#[derive(Deserialize)]
struct DelegatedWorkResponse {
    #[serde(default)]
    data: Option<DelegatedData>,
}

/// Talks the node-compatible `work_generate` / `work_cancel` protocol.
#[derive(Clone)]
pub struct WorkPeerClient {
    client: Client,
}

impl WorkPeerClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    pub async fn work_generate(&self, url: &str, hash: &str, difficulty: &str) -> Result<String> {
        let response = self
            .client
            .post(url)
            .json(&json!({
                "action": "work_generate",
                "hash": hash,
                "difficulty": difficulty,
            }))
            .send()
            .await
            .map_err(|e| WalletError::Upstream(format!("work peer {}: {}", url, e)))?;

        let body: PeerWorkResponse = response
            .json()
            .await
            .map_err(|e| WalletError::Upstream(format!("work peer {}: {}", url, e)))?;

        if let Some(err) = body.error {
            return Err(WalletError::Upstream(err));
        }
        if body.work.is_empty() {
            return Err(WalletError::WorkGenerationFailed);
        }
        Ok(body.work)
    }

    /// Response is ignored.
    pub async fn work_cancel(&self, url: &str, hash: &str) {
        let request = json!({
            "action": "work_cancel",
            "hash": hash,
        });
        if let Err(e) = self.client.post(url).json(&request).send().await {
            debug!("work_cancel to {} failed: {}", url, e);
        }
    }
}

/// GraphQL work service authenticated with an `Authorization` key.
#[derive(Clone)]
pub struct DelegatedWorkClient {
    url: String,
    client: Client,
}

impl DelegatedWorkClient {
    pub fn new(url: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { url, client }
    }

    pub async fn work_generate(
        &self,
        key: &str,
        hash: &str,
        multiplier: u64,
        block_award: bool,
    ) -> Result<String> {
        let request = json!({
            "query": DELEGATED_MUTATION,
            "variables": {
                "hash": hash,
                "difficultyMultiplier": multiplier,
                "blockAward": block_award,
            },
        });
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", key)
            .json(&request)
            .send()
            .await
            .map_err(|e| WalletError::Upstream(format!("delegated work: {}", e)))?;

        let body: DelegatedWorkResponse = response
            .json()
            .await
            .map_err(|e| WalletError::Upstream(format!("delegated work: {}", e)))?;

        body.data
            .and_then(|d| d.work_generate)
            .filter(|w| !w.is_empty())
            .ok_or(WalletError::WorkGenerationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::{routing::post, Json, Router};
    use serde_json::Value;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_peer_protocol() {
        let url = spawn(Router::new().route(
            "/",
            post(|Json(req): Json<Value>| async move {
                match req["action"].as_str() {
                    Some("work_generate") if req["difficulty"] == "fffffff800000000" => {
                        Json(json!({"work": "205452237a9b01f4"}))
                    }
                    Some("work_generate") => Json(json!({"error": "bad difficulty"})),
                    _ => Json(json!({"success": ""})),
                }
            }),
        ))
        .await;

        let client = WorkPeerClient::new(Duration::from_secs(5));
        let work = client
            .work_generate(&url, "3F93C5CD2E314FA16702189041E68E68C07B27961BF37F0B7705145BEFBA3AA3", "fffffff800000000")
            .await
            .unwrap();
        assert_eq!(work, "205452237a9b01f4");
        assert!(client.work_generate(&url, "AA", "ff").await.is_err());
        client.work_cancel(&url, "AA").await;
    }

    #[tokio::test]
    async fn test_delegated_protocol() {
        let url = spawn(Router::new().route(
            "/",
            post(|headers: HeaderMap, Json(req): Json<Value>| async move {
                if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("secret") {
                    return Json(json!({"errors": [{"message": "unauthorized"}]}));
                }
                assert_eq!(req["variables"]["difficultyMultiplier"], 64);
                assert_eq!(req["variables"]["blockAward"], true);
                Json(json!({"data": {"workGenerate": "boompowwork"}}))
            }),
        ))
        .await;

        let client = DelegatedWorkClient::new(url, Duration::from_secs(5));
        assert_eq!(
            client.work_generate("secret", "AA", 64, true).await.unwrap(),
            "boompowwork"
        );
        assert!(matches!(
            client.work_generate("wrong", "AA", 64, true).await,
            Err(WalletError::WorkGenerationFailed)
        ));
    }
}
