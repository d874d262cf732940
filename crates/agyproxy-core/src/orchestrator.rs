use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use agyproxy_common::{Mode, ProxyError, ProxyResult};
use agyproxy_protocol::openai::{
    ChatCompletionRequest, ChatCompletionResponse, ErrorBody, ModelEntry, ModelList,
};
use agyproxy_transform::request::to_generate_content;
use agyproxy_transform::response::to_chat_completion;
use agyproxy_transform::fake;
use agyproxy_transform::stream::StreamTranslator;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::pool::CredentialPool;
use crate::store::CredentialStore;
use crate::token::TokenLifecycleManager;
use crate::upstream::Upstream;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_attempts: usize,
    /// Cool-down after a retryable failure attributable to the credential.
    pub failure_cooldown: Duration,
    /// Longer cool-down for explicit rate limiting.
    pub rate_limit_cooldown: Duration,
    /// Pause between synthetic content chunks.
    pub fake_stream_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            failure_cooldown: Duration::from_secs(60),
            rate_limit_cooldown: Duration::from_secs(300),
            fake_stream_delay: Duration::from_millis(30),
        }
    }
}

/// What a chat-completions call resolves to: a full response, or a channel
/// of pre-serialized SSE frames ending with `data: [DONE]`.
#[derive(Debug)]
pub enum ProxyReply {
    Completion(ChatCompletionResponse),
    Stream(mpsc::Receiver<Bytes>),
}

/// Drives one request through credential selection, token assurance, the
/// upstream call and retry. Attempt state is per call; everything shared is
/// behind `Arc`.
pub struct ProxyOrchestrator {
    store: Arc<dyn CredentialStore>,
    pool: Arc<CredentialPool>,
    tokens: Arc<TokenLifecycleManager>,
    upstream: Arc<dyn Upstream>,
    config: OrchestratorConfig,
}

impl ProxyOrchestrator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        pool: Arc<CredentialPool>,
        tokens: Arc<TokenLifecycleManager>,
        upstream: Arc<dyn Upstream>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            pool,
            tokens,
            upstream,
            config,
        }
    }

    pub async fn chat_completion(
        &self,
        mode: Mode,
        request: ChatCompletionRequest,
    ) -> ProxyResult<ProxyReply> {
        let body = to_generate_content(&request);
        let model = request.model.clone();
        let wants_stream = request.wants_stream();
        let fake_stream = mode.profile().fake_stream_default;

        let mut excluded = HashSet::new();
        let mut last_error = None;
        for attempt in 1..=self.config.max_attempts {
            let credential = match self.pool.select(mode, &excluded).await {
                Ok(credential) => credential,
                Err(err) => {
                    // Pool exhaustion ends the loop; the last upstream error
                    // is more useful to the caller when there is one.
                    return Err(last_error.unwrap_or(err));
                }
            };
            debug!(credential_id = credential.id, %mode, attempt, "attempt start");
            excluded.insert(credential.id);

            let outcome = self
                .attempt(&credential, &model, body.clone(), wants_stream, fake_stream)
                .await;
            match outcome {
                Ok(reply) => {
                    self.pool.mark_healthy(credential.id).await;
                    // The upstream already served the request; a failed
                    // stats write must not turn it into an error.
                    if let Err(err) = self.store.increment_usage(credential.id).await {
                        warn!(credential_id = credential.id, error = %err, "usage increment failed");
                    }
                    info!(credential_id = credential.id, %mode, attempt, "request served");
                    return Ok(reply);
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        credential_id = credential.id,
                        %mode,
                        attempt,
                        error = %err,
                        "attempt failed, trying next credential"
                    );
                    self.pool
                        .mark_unhealthy(credential.id, self.cooldown_for(&err))
                        .await;
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or(ProxyError::CredentialExhausted))
    }

    /// Model catalogue via any eligible credential, in the OpenAI list
    /// shape.
    pub async fn list_models(&self, mode: Mode) -> ProxyResult<ModelList> {
        let mut excluded = HashSet::new();
        let mut last_error = None;
        for _ in 0..self.config.max_attempts {
            let credential = match self.pool.select(mode, &excluded).await {
                Ok(credential) => credential,
                Err(err) => return Err(last_error.unwrap_or(err)),
            };
            excluded.insert(credential.id);
            let result = async {
                let credential = self.tokens.ensure_token(&credential).await?;
                self.upstream.list_models(&credential).await
            }
            .await;
            match result {
                Ok(models) => {
                    self.pool.mark_healthy(credential.id).await;
                    let created = time::OffsetDateTime::now_utc().unix_timestamp();
                    return Ok(ModelList {
                        object: "list".to_string(),
                        data: models
                            .into_iter()
                            .map(|model| ModelEntry {
                                id: model.name,
                                object: "model".to_string(),
                                created,
                                owned_by: "google".to_string(),
                            })
                            .collect(),
                    });
                }
                Err(err) if err.is_retryable() => {
                    self.pool
                        .mark_unhealthy(credential.id, self.cooldown_for(&err))
                        .await;
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or(ProxyError::CredentialExhausted))
    }

    /// Per-model remaining quota as the upstream reports it.
    pub async fn quota(&self, mode: Mode) -> ProxyResult<agyproxy_protocol::gemini::QuotaInfo> {
        let mut excluded = HashSet::new();
        let mut last_error = None;
        for _ in 0..self.config.max_attempts {
            let credential = match self.pool.select(mode, &excluded).await {
                Ok(credential) => credential,
                Err(err) => return Err(last_error.unwrap_or(err)),
            };
            excluded.insert(credential.id);
            let result = async {
                let credential = self.tokens.ensure_token(&credential).await?;
                self.upstream.fetch_quota(&credential).await
            }
            .await;
            match result {
                Ok(quota) => {
                    self.pool.mark_healthy(credential.id).await;
                    return Ok(quota);
                }
                Err(err) if err.is_retryable() => {
                    self.pool
                        .mark_unhealthy(credential.id, self.cooldown_for(&err))
                        .await;
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_error.unwrap_or(ProxyError::CredentialExhausted))
    }

    async fn attempt(
        &self,
        credential: &Credential,
        model: &str,
        body: agyproxy_protocol::gemini::GenerateContentBody,
        wants_stream: bool,
        fake_stream: bool,
    ) -> ProxyResult<ProxyReply> {
        let credential = self.tokens.ensure_token(credential).await?;
        let credential = self.ensure_project(credential).await?;

        if !wants_stream {
            let response = self.upstream.generate(&credential, model, body).await?;
            return Ok(ProxyReply::Completion(to_chat_completion(model, &response)));
        }

        if fake_stream {
            let response = self.upstream.generate(&credential, model, body).await?;
            return Ok(ProxyReply::Stream(self.emit_fake(model, response)));
        }

        let events = self
            .upstream
            .generate_stream(&credential, model, body)
            .await?;
        Ok(ProxyReply::Stream(self.emit_stream(model, events)))
    }

    /// First use of a credential without a project id resolves and persists
    /// one. Resolution failure is the credential's fault and retries with
    /// the next one.
    async fn ensure_project(&self, mut credential: Credential) -> ProxyResult<Credential> {
        if credential.project_id.is_some() {
            return Ok(credential);
        }
        let project = self.upstream.resolve_project_id(&credential).await?;
        self.store
            .update_project_id(credential.id, project.clone())
            .await?;
        info!(credential_id = credential.id, project, "project id resolved");
        credential.project_id = Some(project);
        Ok(credential)
    }

    fn emit_fake(
        &self,
        model: &str,
        response: agyproxy_protocol::gemini::GenerateContentResponse,
    ) -> mpsc::Receiver<Bytes> {
        let chunks = fake::to_chunks(model, &response);
        let delay = self.config.fake_stream_delay;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut first = true;
            for chunk in chunks {
                if !first && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                first = false;
                if tx.send(sse_frame(&chunk)).await.is_err() {
                    debug!(reason = %ProxyError::ClientDisconnected, "synthetic emission stopped");
                    return;
                }
            }
            let _ = tx.send(done_frame()).await;
        });
        rx
    }

    fn emit_stream(
        &self,
        model: &str,
        mut events: mpsc::Receiver<ProxyResult<agyproxy_protocol::gemini::GenerateContentResponse>>,
    ) -> mpsc::Receiver<Bytes> {
        let mut translator = StreamTranslator::new(model);
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    Ok(event) => {
                        if let Some(chunk) = translator.translate(&event) {
                            if tx.send(sse_frame(&chunk)).await.is_err() {
                                // Dropping `events` closes the upstream
                                // read promptly.
                                debug!(reason = %ProxyError::ClientDisconnected, "emission stopped");
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        // Emission already started, so the failure cannot be
                        // retried; terminate with an error frame.
                        warn!(error = %err, "stream failed after partial emission");
                        let body = ErrorBody::new(err.code(), err.to_string());
                        let _ = tx.send(sse_frame(&body)).await;
                        return;
                    }
                }
            }
            if let Some(chunk) = translator.close() {
                if tx.send(sse_frame(&chunk)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(done_frame()).await;
        });
        rx
    }

    fn cooldown_for(&self, err: &ProxyError) -> Duration {
        match err {
            ProxyError::Upstream { status: 429, .. } => self.config.rate_limit_cooldown,
            _ => self.config.failure_cooldown,
        }
    }
}

fn sse_frame<T: Serialize>(payload: &T) -> Bytes {
    match serde_json::to_string(payload) {
        Ok(json) => Bytes::from(format!("data: {json}\n\n")),
        Err(_) => Bytes::new(),
    }
}

fn done_frame() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}
