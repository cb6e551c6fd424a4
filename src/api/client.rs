use super::backend::{ByteStream, RunBackend};
use crate::config::Config;
use crate::error::{Result, RunError};
use crate::logging::{debug_payload_enabled, emit_debug_payload};
use crate::types::{
    Approval, CreateRunRequest, CreateRunResponse, ResolveApprovalRequest, Run,
    SendMessageRequest,
};
use crate::util::is_local_endpoint_url;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the run service.
///
/// REST calls carry the configured request timeout. The event feed only has
/// a connect timeout since it stays open for the life of the run.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_url: String,
    api_token: Option<String>,
    request_timeout: Duration,
}

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|error| RunError::Request(format!("cannot build HTTP client: {error}")))?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_token: config.api_token.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Appends `segments` to the API base, escaping each one so ids cannot
    /// change the route.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(self.api_url.trim()).map_err(|error| {
            RunError::Request(format!("invalid API URL '{}': {error}", self.api_url))
        })?;
        url.path_segments_mut()
            .map_err(|()| {
                RunError::Request(format!("API URL '{}' cannot take a path", self.api_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.endpoint(segments)?;
        let request = self.authorize(self.http.get(url.clone()).timeout(self.request_timeout));
        let response = send_checked(request, url.as_str()).await?;
        response
            .json()
            .await
            .map_err(|error| map_api_request_error(error, url.as_str()))
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<(Url, reqwest::Response)> {
        let url = self.endpoint(segments)?;
        if debug_payload_enabled() {
            if let Ok(payload) = serde_json::to_value(body) {
                emit_debug_payload(url.as_str(), &payload);
            }
        }
        let request = self.authorize(
            self.http
                .post(url.clone())
                .timeout(self.request_timeout)
                .json(body),
        );
        let response = send_checked(request, url.as_str()).await?;
        Ok((url, response))
    }
}

#[async_trait]
impl RunBackend for ApiClient {
    async fn create_run(&self, request: &CreateRunRequest) -> Result<CreateRunResponse> {
        let (url, response) = self.post_json(&["runs"], request).await?;
        response
            .json()
            .await
            .map_err(|error| map_api_request_error(error, url.as_str()))
    }

    async fn get_run(&self, run_id: &str) -> Result<Run> {
        self.get_json(&["runs", run_id]).await
    }

    async fn send_message(&self, run_id: &str, content: &str) -> Result<()> {
        let body = SendMessageRequest {
            content: content.to_string(),
        };
        self.post_json(&["runs", run_id, "messages"], &body)
            .await
            .map(drop)
    }

    async fn pending_approvals(&self) -> Result<Vec<Approval>> {
        self.get_json(&["approvals", "pending"]).await
    }

    async fn resolve_approval(
        &self,
        approval_id: &str,
        request: &ResolveApprovalRequest,
    ) -> Result<()> {
        self.post_json(&["approvals", approval_id, "resolve"], request)
            .await
            .map(drop)
    }

    async fn open_event_stream(
        &self,
        run_id: &str,
        after_sequence: Option<u64>,
    ) -> Result<ByteStream> {
        let url = self.endpoint(&["runs", run_id, "events"])?;
        let mut request = self
            .http
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(sequence) = after_sequence {
            request = request.query(&[("afterSequence", sequence)]);
        }

        let response = send_checked(self.authorize(request), url.as_str())
            .await
            .map_err(|error| RunError::Transport(error.to_string()))?;

        let stream_url = url.to_string();
        let stream = response.bytes_stream().map(move |item| {
            item.map_err(|error| {
                RunError::Transport(map_api_request_error(error, &stream_url).to_string())
            })
        });
        Ok(Box::pin(stream))
    }
}

async fn send_checked(request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|error| map_api_request_error(error, url))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .ok()
        .map(|body| body.trim().to_string())
        .filter(|body| !body.is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
    tracing::warn!(url, status = status.as_u16(), %message, "API request rejected");
    Err(RunError::Api {
        endpoint: url.to_string(),
        status: status.as_u16(),
        message,
    })
}

fn map_api_request_error(error: reqwest::Error, request_url: &str) -> RunError {
    let message = if error.is_connect() && is_local_endpoint_url(request_url) {
        format!(
            "cannot reach local API endpoint '{request_url}': {error}. Start the run service or update AGENTRUN_API_URL."
        )
    } else if error.is_connect() {
        format!("cannot reach API endpoint '{request_url}': {error}")
    } else if error.is_timeout() {
        format!("API request to '{request_url}' timed out: {error}")
    } else if error.is_decode() {
        format!("API endpoint '{request_url}' returned an unexpected body: {error}")
    } else {
        format!("API request to '{request_url}' failed: {error}")
    };
    tracing::warn!(url = request_url, %error, "API request failed");
    RunError::Request(message)
}
