//! Google Cloud Vision `images:annotate` with TEXT_DETECTION

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{check_status, http_client, require_key, EncodedImage, ExtractedText, OcrDispatcher};
use crate::error::DispatchError;
use crate::GoogleVisionConfig;

pub struct GoogleVisionDispatcher {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    error: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    message: String,
}

impl GoogleVisionDispatcher {
    pub fn new(config: &GoogleVisionConfig, timeout: Duration) -> Result<Self, DispatchError> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: config.endpoint.clone(),
            api_key: require_key("Google Vision", &config.api_key)?,
        })
    }
}

/// The first annotation holds the full detected text; no annotations means
/// nothing was found.
fn parse_annotate(body: &str) -> Result<String, DispatchError> {
    let response: AnnotateResponse =
        serde_json::from_str(body).map_err(|e| DispatchError::Malformed(format!("annotate response: {e}")))?;

    let Some(first) = response.responses.into_iter().next() else {
        return Err(DispatchError::Malformed("annotate response has no entries".into()));
    };
    if let Some(status) = first.error {
        return Err(DispatchError::Provider(status.message));
    }
    Ok(first
        .text_annotations
        .into_iter()
        .next()
        .map(|annotation| annotation.description)
        .unwrap_or_default())
}

#[async_trait]
impl OcrDispatcher for GoogleVisionDispatcher {
    fn name(&self) -> &'static str {
        "google-vision"
    }

    async fn submit(&self, image: &EncodedImage) -> Result<ExtractedText, DispatchError> {
        let body = json!({
            "requests": [{
                "image": { "content": image.to_base64() },
                "features": [{ "type": "TEXT_DETECTION" }]
            }]
        });

        debug!(endpoint = %self.endpoint, bytes = image.bytes.len(), "Submitting to Google Vision");
        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .await?;
        let text = parse_annotate(&check_status(response).await?.text().await?)?;

        Ok(ExtractedText::plain(self.name(), text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn image() -> EncodedImage {
        EncodedImage {
            bytes: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
            mime: "image/jpeg",
            width: 1,
            height: 1,
        }
    }

    fn dispatcher(endpoint: String) -> GoogleVisionDispatcher {
        let config = GoogleVisionConfig {
            endpoint,
            api_key: "test-key".into(),
        };
        GoogleVisionDispatcher::new(&config, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn first_annotation_is_the_full_text() {
        let body = r#"{"responses":[{"textAnnotations":[
            {"description":"EXP 12 MAR 26\nL.4471"},
            {"description":"EXP"}
        ]}]}"#;
        assert_eq!(parse_annotate(body).unwrap(), "EXP 12 MAR 26\nL.4471");
    }

    #[test]
    fn no_annotations_is_empty_text() {
        assert_eq!(parse_annotate(r#"{"responses":[{}]}"#).unwrap(), "");
    }

    #[test]
    fn per_image_error_is_a_provider_error() {
        let body = r#"{"responses":[{"error":{"code":3,"message":"Bad image data."}}]}"#;
        assert!(matches!(parse_annotate(body), Err(DispatchError::Provider(m)) if m == "Bad image data."));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(parse_annotate("<html>"), Err(DispatchError::Malformed(_))));
        assert!(matches!(parse_annotate(r#"{"responses":[]}"#), Err(DispatchError::Malformed(_))));
    }

    #[tokio::test]
    async fn submits_with_api_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/images:annotate")
            .match_query(mockito::Matcher::UrlEncoded("key".into(), "test-key".into()))
            .match_body(mockito::Matcher::Regex(r#""type":"TEXT_DETECTION""#.into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"responses":[{"textAnnotations":[{"description":"LOTE 0042"}]}]}"#)
            .create_async()
            .await;

        let dispatcher = dispatcher(format!("{}/v1/images:annotate", server.url()));
        let text = dispatcher.submit(&image()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(text.provider, "google-vision");
        assert_eq!(text.text, "LOTE 0042");
    }

    #[tokio::test]
    async fn http_failure_keeps_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/images:annotate")
            .match_query(mockito::Matcher::Any)
            .with_status(403)
            .with_body("API key not valid")
            .create_async()
            .await;

        let dispatcher = dispatcher(format!("{}/v1/images:annotate", server.url()));
        let err = dispatcher.submit(&image()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Status { status: 403, ref body } if body == "API key not valid"));
    }
}
