use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    finish, http_client, join_url, read_json, JobStatus, ModelSpec, PollResult, ProviderError,
    ProviderJobId, ProviderKind, VideoProvider,
};

/// key: provider-veo -> long-running operations on the Gemini API
///
/// The job id is the operation resource name (`models/<model>/operations/<id>`).
pub struct VeoProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl VeoProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }
}

/// Operations only expose `done` and `error`; everything unfinished is processing.
pub fn operation_status(operation: &Value) -> JobStatus {
    let done = operation
        .get("done")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !done {
        JobStatus::Processing
    } else if operation.get("error").is_some() {
        JobStatus::Failed
    } else {
        JobStatus::Succeeded
    }
}

#[async_trait]
impl VideoProvider for VeoProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Veo
    }

    async fn submit(
        &self,
        prompt: &str,
        model: &ModelSpec,
    ) -> Result<ProviderJobId, ProviderError> {
        let path = format!("models/{}:predictLongRunning", model.provider_model);
        let payload = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": {
                "aspectRatio": "16:9",
                "durationSeconds": model.duration_seconds,
            }
        });

        let response = self
            .client
            .post(join_url(&self.base_url, &path))
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await?;
        let body = read_json(response).await?;

        body.get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse("operation without name".to_string()))
    }

    async fn poll(&self, job_id: &str) -> Result<PollResult, ProviderError> {
        let response = self
            .client
            .get(join_url(&self.base_url, job_id))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        let body = read_json(response).await?;

        let error_detail = body.get("error").map(|error| {
            error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string())
        });

        Ok(finish(
            operation_status(&body),
            self.extract_output(&body),
            error_detail,
        ))
    }

    fn extract_output(&self, raw: &Value) -> Option<String> {
        raw.pointer("/response/generateVideoResponse/generatedSamples/0/video/uri")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_states() {
        assert_eq!(operation_status(&json!({ "name": "op" })), JobStatus::Processing);
        assert_eq!(
            operation_status(&json!({ "done": true, "error": { "message": "blocked" } })),
            JobStatus::Failed
        );
        assert_eq!(
            operation_status(&json!({ "done": true, "response": {} })),
            JobStatus::Succeeded
        );
    }

    #[test]
    fn output_is_first_generated_sample() {
        let provider = VeoProvider::new("http://localhost", "key", Duration::from_secs(1)).unwrap();
        let raw = json!({
            "done": true,
            "response": {
                "generateVideoResponse": {
                    "generatedSamples": [
                        { "video": { "uri": "https://files/first.mp4" } },
                        { "video": { "uri": "https://files/second.mp4" } }
                    ]
                }
            }
        });
        assert_eq!(
            provider.extract_output(&raw),
            Some("https://files/first.mp4".to_string())
        );
    }
}
