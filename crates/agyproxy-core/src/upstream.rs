use std::time::Duration;

use agyproxy_common::{ProxyError, ProxyResult};
use agyproxy_protocol::gemini::{
    parse_available_models, parse_quota, unwrap_internal, GenerateContentBody,
    GenerateContentResponse, ModelDescriptor, QuotaInfo,
};
use agyproxy_protocol::sse::EventStreamDecoder;
use agyproxy_transform::request::to_internal_request;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::credential::Credential;

const ONBOARD_POLL_ATTEMPTS: usize = 5;
const ONBOARD_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Upstream transport seam. One network call per method, no internal retry;
/// retry policy belongs to the orchestrator.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn generate(
        &self,
        credential: &Credential,
        model: &str,
        body: GenerateContentBody,
    ) -> ProxyResult<GenerateContentResponse>;

    /// Events arrive on a bounded channel fed by a spawned reader. Dropping
    /// the receiver stops the reader and closes the connection.
    async fn generate_stream(
        &self,
        credential: &Credential,
        model: &str,
        body: GenerateContentBody,
    ) -> ProxyResult<mpsc::Receiver<ProxyResult<GenerateContentResponse>>>;

    async fn list_models(&self, credential: &Credential) -> ProxyResult<Vec<ModelDescriptor>>;

    async fn fetch_quota(&self, credential: &Credential) -> ProxyResult<QuotaInfo>;

    /// loadCodeAssist first; when it carries no project, run the onboardUser
    /// long-running operation until it completes.
    async fn resolve_project_id(&self, credential: &Credential) -> ProxyResult<String>;
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(600),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

pub struct HttpUpstream {
    client: wreq::Client,
    stream_idle_timeout: Duration,
}

impl HttpUpstream {
    pub fn new(config: UpstreamConfig) -> ProxyResult<Self> {
        let mut builder = wreq::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout);
        if let Some(proxy) = config.proxy.as_deref() {
            builder = builder.proxy(
                wreq::Proxy::all(proxy)
                    .map_err(|err| ProxyError::Transport(err.to_string()))?,
            );
        }
        let client = builder
            .build()
            .map_err(|err| ProxyError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            stream_idle_timeout: config.stream_idle_timeout,
        })
    }

    fn request(
        &self,
        credential: &Credential,
        endpoint: &str,
        query: Option<(&str, &str)>,
    ) -> ProxyResult<wreq::RequestBuilder> {
        let profile = credential.mode.profile();
        let token = credential
            .access_token
            .as_deref()
            .ok_or_else(|| ProxyError::TokenRefreshFailed("no access token".into()))?;
        let mut url = format!("{}/v1internal:{endpoint}", profile.base_url);
        if let Some((key, value)) = query {
            url.push_str(&format!("?{key}={value}"));
        }
        // The upstream rejects calls without a request id.
        let request_id = format!("agy-{}", time::OffsetDateTime::now_utc().unix_timestamp_nanos());
        Ok(self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("Accept-Encoding", "gzip")
            .header("User-Agent", profile.user_agent)
            .header("requestid", request_id))
    }

    async fn post_json(
        &self,
        credential: &Credential,
        endpoint: &str,
        body: &JsonValue,
    ) -> ProxyResult<JsonValue> {
        let response = self
            .request(credential, endpoint, None)?
            .json(body)
            .send()
            .await
            .map_err(|err| ProxyError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| ProxyError::Transport(err.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(ProxyError::Upstream { status, body: text });
        }
        serde_json::from_str(&text).map_err(|err| ProxyError::Translation(err.to_string()))
    }

    fn parse_event(data: &str) -> Option<ProxyResult<GenerateContentResponse>> {
        if data == "[DONE]" {
            return None;
        }
        let value: JsonValue = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(err) => return Some(Err(ProxyError::Translation(err.to_string()))),
        };
        match serde_json::from_value(unwrap_internal(value)) {
            Ok(event) => Some(Ok(event)),
            Err(err) => Some(Err(ProxyError::Translation(err.to_string()))),
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn generate(
        &self,
        credential: &Credential,
        model: &str,
        body: GenerateContentBody,
    ) -> ProxyResult<GenerateContentResponse> {
        let project = credential
            .project_id
            .as_deref()
            .ok_or_else(|| ProxyError::Transport("credential has no project id".into()))?;
        let envelope = to_internal_request(model, project, body);
        let payload = serde_json::to_value(&envelope)
            .map_err(|err| ProxyError::Translation(err.to_string()))?;
        let value = self
            .post_json(credential, "generateContent", &payload)
            .await?;
        serde_json::from_value(unwrap_internal(value))
            .map_err(|err| ProxyError::Translation(err.to_string()))
    }

    async fn generate_stream(
        &self,
        credential: &Credential,
        model: &str,
        body: GenerateContentBody,
    ) -> ProxyResult<mpsc::Receiver<ProxyResult<GenerateContentResponse>>> {
        let project = credential
            .project_id
            .as_deref()
            .ok_or_else(|| ProxyError::Transport("credential has no project id".into()))?;
        let envelope = to_internal_request(model, project, body);
        let response = self
            .request(credential, "streamGenerateContent", Some(("alt", "sse")))?
            .json(&envelope)
            .send()
            .await
            .map_err(|err| ProxyError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::Upstream { status, body });
        }

        let (tx, rx) = mpsc::channel(16);
        let idle = self.stream_idle_timeout;
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut decoder = EventStreamDecoder::new();
            loop {
                let next = match tokio::time::timeout(idle, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        debug!("upstream stream idle timeout");
                        break;
                    }
                };
                let chunk = match next {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(err)) => {
                        let _ = tx.send(Err(ProxyError::Transport(err.to_string()))).await;
                        return;
                    }
                    None => break,
                };
                for event in decoder.feed_bytes(&chunk) {
                    let Some(parsed) = Self::parse_event(&event.data) else {
                        return;
                    };
                    if tx.send(parsed).await.is_err() {
                        // Receiver dropped; stop reading so the connection
                        // closes.
                        return;
                    }
                }
            }
            for event in decoder.finish() {
                if let Some(parsed) = Self::parse_event(&event.data) {
                    let _ = tx.send(parsed).await;
                }
            }
        });
        Ok(rx)
    }

    async fn list_models(&self, credential: &Credential) -> ProxyResult<Vec<ModelDescriptor>> {
        let value = self
            .post_json(credential, "fetchAvailableModels", &serde_json::json!({}))
            .await?;
        Ok(parse_available_models(&value))
    }

    async fn fetch_quota(&self, credential: &Credential) -> ProxyResult<QuotaInfo> {
        let value = self
            .post_json(credential, "fetchAvailableModels", &serde_json::json!({}))
            .await?;
        Ok(parse_quota(&value))
    }

    async fn resolve_project_id(&self, credential: &Credential) -> ProxyResult<String> {
        let metadata = serde_json::json!({
            "ideType": "IDE_UNSPECIFIED",
            "platform": "PLATFORM_UNSPECIFIED",
            "pluginType": "GEMINI",
        });
        let load = self
            .post_json(
                credential,
                "loadCodeAssist",
                &serde_json::json!({"metadata": metadata}),
            )
            .await?;

        if let Some(project) = load.get("cloudaicompanionProject").and_then(|v| v.as_str()) {
            if !project.is_empty() {
                return Ok(project.to_string());
            }
        }

        let tier = load
            .get("allowedTiers")
            .and_then(|v| v.as_array())
            .and_then(|tiers| {
                tiers.iter().find(|tier| {
                    tier.get("isDefault").and_then(|v| v.as_bool()).unwrap_or(false)
                })
            })
            .and_then(|tier| tier.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or("LEGACY")
            .to_string();

        let onboard = serde_json::json!({
            "tierId": tier,
            "metadata": metadata,
        });
        for attempt in 0..ONBOARD_POLL_ATTEMPTS {
            let operation = self.post_json(credential, "onboardUser", &onboard).await?;
            if operation.get("done").and_then(|v| v.as_bool()).unwrap_or(false) {
                let project = operation
                    .pointer("/response/cloudaicompanionProject/id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ProxyError::Transport("onboarding finished without a project id".into())
                    })?;
                return Ok(project.to_string());
            }
            debug!(
                credential_id = credential.id,
                attempt, "onboarding not done yet"
            );
            tokio::time::sleep(ONBOARD_POLL_INTERVAL).await;
        }
        warn!(credential_id = credential.id, "onboarding never completed");
        Err(ProxyError::Transport(
            "project onboarding did not complete".into(),
        ))
    }
}
