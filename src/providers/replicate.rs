use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    finish, http_client, join_url, read_json, JobStatus, ModelSpec, PollResult, ProviderError,
    ProviderJobId, ProviderKind, VideoProvider,
};

/// key: provider-replicate -> predictions API
pub struct ReplicateProvider {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl ReplicateProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
            api_token: api_token.into(),
        })
    }
}

pub fn map_status(native: &str) -> JobStatus {
    match native {
        "starting" => JobStatus::Queued,
        "processing" => JobStatus::Processing,
        "succeeded" => JobStatus::Succeeded,
        "failed" | "canceled" => JobStatus::Failed,
        _ => JobStatus::Processing,
    }
}

#[async_trait]
impl VideoProvider for ReplicateProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Replicate
    }

    async fn submit(
        &self,
        prompt: &str,
        model: &ModelSpec,
    ) -> Result<ProviderJobId, ProviderError> {
        let path = format!("models/{}/predictions", model.provider_model);
        let payload = json!({
            "input": {
                "prompt": prompt,
                "duration": model.duration_seconds,
                "aspect_ratio": "16:9",
            }
        });

        let response = self
            .client
            .post(join_url(&self.base_url, &path))
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await?;
        let body = read_json(response).await?;

        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse("prediction without id".to_string()))
    }

    async fn poll(&self, job_id: &str) -> Result<PollResult, ProviderError> {
        let response = self
            .client
            .get(join_url(&self.base_url, &format!("predictions/{job_id}")))
            .bearer_auth(&self.api_token)
            .send()
            .await?;
        let body = read_json(response).await?;

        let native = body
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::InvalidResponse("prediction without status".to_string()))?;
        let error_detail = body.get("error").and_then(|error| match error {
            Value::String(message) => Some(message.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        });

        Ok(finish(
            map_status(native),
            self.extract_output(&body),
            error_detail,
        ))
    }

    fn extract_output(&self, raw: &Value) -> Option<String> {
        match raw.get("output")? {
            Value::String(url) => Some(url.clone()),
            Value::Array(items) => items.first()?.as_str().map(str::to_string),
            _ => None,
        }
    }
}
