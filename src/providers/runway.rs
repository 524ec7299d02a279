use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    finish, http_client, join_url, read_json, JobStatus, ModelSpec, PollResult, ProviderError,
    ProviderJobId, ProviderKind, VideoProvider,
};

/// key: provider-runway -> task API
pub struct RunwayProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_version: String,
}

impl RunwayProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_version: api_version.into(),
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.api_key)
            .header("X-Runway-Version", &self.api_version)
    }
}

pub fn map_status(native: &str) -> JobStatus {
    match native {
        "PENDING" | "QUEUED" | "THROTTLED" => JobStatus::Queued,
        "RUNNING" | "IN_PROGRESS" => JobStatus::Processing,
        "SUCCEEDED" => JobStatus::Succeeded,
        "FAILED" | "CANCELLED" => JobStatus::Failed,
        _ => JobStatus::Processing,
    }
}

#[async_trait]
impl VideoProvider for RunwayProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Runway
    }

    async fn submit(
        &self,
        prompt: &str,
        model: &ModelSpec,
    ) -> Result<ProviderJobId, ProviderError> {
        let payload = json!({
            "model": model.provider_model,
            "promptText": prompt,
            "duration": model.duration_seconds,
            "ratio": "1280:720",
        });

        let response = self
            .request(self.client.post(join_url(&self.base_url, "image_to_video")))
            .json(&payload)
            .send()
            .await?;
        let body = read_json(response).await?;

        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse("task without id".to_string()))
    }

    async fn poll(&self, job_id: &str) -> Result<PollResult, ProviderError> {
        let response = self
            .request(
                self.client
                    .get(join_url(&self.base_url, &format!("tasks/{job_id}"))),
            )
            .send()
            .await?;
        let body = read_json(response).await?;

        let native = body
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::InvalidResponse("task without status".to_string()))?;
        let error_detail = body
            .get("failure")
            .and_then(Value::as_str)
            .or_else(|| body.get("failureCode").and_then(Value::as_str))
            .map(str::to_string);

        Ok(finish(
            map_status(native),
            self.extract_output(&body),
            error_detail,
        ))
    }

    fn extract_output(&self, raw: &Value) -> Option<String> {
        match raw.get("output")? {
            Value::Object(output) => output.get("video")?.as_str().map(str::to_string),
            Value::Array(items) => items.first()?.as_str().map(str::to_string),
            _ => None,
        }
    }
}
