use crate::api::{OperationHandle, OperationStatus, SceneRequest, VideoBackend};
use crate::config::Config;
use crate::error::SubmissionError;
use crate::logw;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const POLL_TIMEOUT_SECS: u64 = 30;
const BODY_SNIPPET_CHARS: usize = 800;

/// Veo 3 through the Vertex AI long-running prediction endpoints.
pub struct VeoClient {
    client: Client,
    predict_url: String,
    poll_url: String,
    storage_uri: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    response: Option<PollPayload>,
    #[serde(default)]
    error: Option<PollFailure>,
}

#[derive(Debug, Deserialize)]
struct PollPayload {
    #[serde(default)]
    videos: Vec<GeneratedVideo>,
}

#[derive(Debug, Deserialize)]
struct GeneratedVideo {
    #[serde(rename = "gcsUri")]
    gcs_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollFailure {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

impl VeoClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.generation.submit_timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self::with_client(client, cfg, cfg.access_token()?))
    }

    pub fn with_client(client: Client, cfg: &Config, token: String) -> Self {
        let model_url = format!("{}{}", cfg.api_base(), cfg.model_path());
        Self {
            client,
            predict_url: format!("{model_url}:predictLongRunning"),
            poll_url: format!("{model_url}:fetchPredictOperation"),
            storage_uri: format!("gs://{}/scenes/", cfg.bucket_name()),
            token,
        }
    }

    fn request_body(&self, request: &SceneRequest) -> serde_json::Value {
        let mut instance = json!({ "prompt": request.prompt });
        if let Some(image) = &request.continuity {
            instance["image"] = json!({
                "bytesBase64Encoded": image.base64_data,
                "mimeType": image.mime_type,
            });
        }

        json!({
            "instances": [instance],
            "parameters": {
                "aspectRatio": request.aspect_ratio,
                "durationSeconds": request.duration_secs,
                "sampleCount": 1,
                "personGeneration": "allow_adult",
                "storageUri": self.storage_uri,
            }
        })
    }
}

fn snippet(raw: &str) -> String {
    raw.chars().take(BODY_SNIPPET_CHARS).collect()
}

fn classify_poll(parsed: PollResponse) -> OperationStatus {
    if let Some(err) = parsed.error {
        let message = err.message.unwrap_or_else(|| "unspecified error".to_string());
        return match err.code {
            Some(code) => OperationStatus::Failed(format!("{message} (code {code})")),
            None => OperationStatus::Failed(message),
        };
    }

    if !parsed.done {
        return OperationStatus::Pending;
    }

    let asset_uri = parsed
        .response
        .and_then(|payload| payload.videos.into_iter().next())
        .and_then(|video| video.gcs_uri)
        .filter(|uri| !uri.is_empty());
    OperationStatus::Done { asset_uri }
}

#[async_trait]
impl VideoBackend for VeoClient {
    async fn submit(&self, request: &SceneRequest) -> Result<OperationHandle, SubmissionError> {
        let body = self.request_body(request);

        let resp = self
            .client
            .post(&self.predict_url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SubmissionError::Network(e.to_string()))?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            logw(format!("Veo rejected credentials: HTTP {}", status.as_u16()));
            return Err(SubmissionError::Auth { status: status.as_u16() });
        }
        if !status.is_success() {
            logw(format!("Veo HTTP {}", status.as_u16()));
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                body: snippet(&raw),
            });
        }

        let parsed: SubmitResponse = serde_json::from_str(&raw).map_err(|_| {
            logw(format!("Veo submit response parse failed: {}", snippet(&raw)));
            SubmissionError::MissingOperation
        })?;

        match parsed.name {
            Some(name) if !name.is_empty() => Ok(OperationHandle { name }),
            _ => Err(SubmissionError::MissingOperation),
        }
    }

    async fn fetch_status(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        let resp = self
            .client
            .post(&self.poll_url)
            .bearer_auth(&self.token)
            .json(&json!({ "operationName": handle.name }))
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS))
            .send()
            .await
            .context("Veo poll request failed")?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            logw(format!("Veo poll HTTP {}: {}", status.as_u16(), snippet(&raw)));
            return Ok(OperationStatus::Failed(format!("poll HTTP {}", status.as_u16())));
        }

        let parsed: PollResponse =
            serde_json::from_str(&raw).context("Veo poll response parse failed")?;
        let outcome = classify_poll(parsed);
        if outcome == (OperationStatus::Done { asset_uri: None }) {
            logw(format!("Veo reported done without a video: {}", snippet(&raw)));
        }
        Ok(outcome)
    }
}
