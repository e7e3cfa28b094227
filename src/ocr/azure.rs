//! Azure AI Vision Read: submit, then poll the operation until it settles

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, trace};

use super::{check_status, http_client, require_key, EncodedImage, ExtractedText, OcrDispatcher};
use crate::error::DispatchError;
use crate::AzureReadConfig;

const SUBSCRIPTION_KEY: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION: &str = "operation-location";

pub struct AzureReadDispatcher {
    client: reqwest::Client,
    analyze_url: String,
    api_key: String,
    poll_interval: Duration,
    max_polls: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadOperation {
    status: String,
    analyze_result: Option<AnalyzeResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    #[serde(default)]
    read_results: Vec<ReadPage>,
}

#[derive(Debug, Deserialize)]
struct ReadPage {
    #[serde(default)]
    lines: Vec<ReadLine>,
}

#[derive(Debug, Deserialize)]
struct ReadLine {
    text: String,
}

enum PollState {
    Pending,
    Done(String),
}

impl AzureReadDispatcher {
    pub fn new(config: &AzureReadConfig, timeout: Duration) -> Result<Self, DispatchError> {
        if config.endpoint.trim().is_empty() {
            return Err(DispatchError::NotConfigured("Azure endpoint is not set".into()));
        }
        Ok(Self {
            client: http_client(timeout)?,
            analyze_url: join_url(&config.endpoint, &config.analyze_path),
            api_key: require_key("Azure", &config.api_key)?,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: config.max_polls.max(1),
        })
    }

    async fn poll(&self, operation_url: &str) -> Result<String, DispatchError> {
        for attempt in 1..=self.max_polls {
            let response = self
                .client
                .get(operation_url)
                .header(SUBSCRIPTION_KEY, &self.api_key)
                .send()
                .await?;
            let body = check_status(response).await?.text().await?;

            match parse_operation(&body)? {
                PollState::Done(text) => {
                    debug!(attempt, "Azure read succeeded");
                    return Ok(text);
                }
                PollState::Pending => {
                    trace!(attempt, "Azure read still running");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
        Err(DispatchError::Timeout { polls: self.max_polls })
    }
}

fn join_url(endpoint: &str, path: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn parse_operation(body: &str) -> Result<PollState, DispatchError> {
    let operation: ReadOperation =
        serde_json::from_str(body).map_err(|e| DispatchError::Malformed(format!("read operation: {e}")))?;

    match operation.status.as_str() {
        "succeeded" => {
            let lines = operation
                .analyze_result
                .map(|result| result.read_results)
                .unwrap_or_default()
                .into_iter()
                .flat_map(|page| page.lines)
                .map(|line| line.text)
                .collect::<Vec<_>>();
            Ok(PollState::Done(lines.join("\n").trim().to_string()))
        }
        "failed" => Err(DispatchError::Provider("Azure read operation failed".into())),
        _ => Ok(PollState::Pending),
    }
}

#[async_trait]
impl OcrDispatcher for AzureReadDispatcher {
    fn name(&self) -> &'static str {
        "azure-read"
    }

    async fn submit(&self, image: &EncodedImage) -> Result<ExtractedText, DispatchError> {
        debug!(url = %self.analyze_url, bytes = image.bytes.len(), "Submitting to Azure Read");
        let response = self
            .client
            .post(&self.analyze_url)
            .header(SUBSCRIPTION_KEY, &self.api_key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image.bytes.clone())
            .send()
            .await?;
        let response = check_status(response).await?;

        let operation_url = response
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| DispatchError::Malformed("analyze response has no Operation-Location".into()))?;

        let text = self.poll(&operation_url).await?;
        Ok(ExtractedText::plain(self.name(), text))
    }
}
