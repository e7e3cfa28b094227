//! Vision chat completion that reads packaging labels into structured fields

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{check_status, http_client, require_key, EncodedImage, ExtractedText, OcrDispatcher};
use crate::error::DispatchError;
use crate::OpenAiConfig;

const LABEL_PROMPT: &str = "\
You are an industrial OCR system used for quality control.

The image shows the base of a plastic container, photographed with a phone in \
poor lighting. The text is embossed or dot-matrix printed on a curved, \
reflective surface.

Extract the following as a strict JSON object:
1. \"expiry_date\": the expiry date, usually preceded by \"EXP\", formatted \
\"DD MMM YY\" (e.g. \"19 SEP 25\"). null if not found.
2. \"lot_number\": the alphanumeric lot number, usually preceded by \"L.\" or \
\"LOTE\". null if not found.
3. \"additional_text\": any other visible text such as production codes, times \
or circular text.
4. \"full_transcription\": every legible character in reading order.

Rules:
- Ignore reflections, shadows and dirt. Focus on the characters only.
- Use a question mark (?) for any character that is completely illegible.
- Do not invent information. A field that is not visible must be null.
- Reply with the JSON object only, without introductions, explanations or code fences.";

/// Fields read off a container label
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelReading {
    pub expiry_date: Option<String>,
    pub lot_number: Option<String>,
    pub additional_text: Option<String>,
    pub full_transcription: Option<String>,
}

pub struct OpenAiDispatcher {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
    refusal: Option<String>,
}

impl OpenAiDispatcher {
    pub fn new(config: &OpenAiConfig, timeout: Duration) -> Result<Self, DispatchError> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: config.endpoint.clone(),
            api_key: require_key("OpenAI", &config.api_key)?,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn request_body(&self, image: &EncodedImage) -> serde_json::Value {
        json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": LABEL_PROMPT },
                    { "type": "image_url", "image_url": { "url": image.data_url() } }
                ]
            }]
        })
    }
}

/// Pull the assistant message out of a completion and decode it.
fn parse_completion(body: &str) -> Result<LabelReading, DispatchError> {
    let completion: ChatCompletion =
        serde_json::from_str(body).map_err(|e| DispatchError::Malformed(format!("chat completion: {e}")))?;

    let message = completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| DispatchError::Malformed("chat completion has no choices".into()))?;

    if let Some(refusal) = message.refusal {
        return Err(DispatchError::Provider(refusal));
    }
    let content = message
        .content
        .ok_or_else(|| DispatchError::Malformed("assistant message has no content".into()))?;

    parse_label(&content)
}

fn parse_label(content: &str) -> Result<LabelReading, DispatchError> {
    // Models sometimes wrap the object in a code fence despite the prompt.
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(json.trim()).map_err(|e| {
        warn!(error = %e, "Label reading is not valid JSON");
        DispatchError::Malformed(format!("label reading: {e}"))
    })
}

#[async_trait]
impl OcrDispatcher for OpenAiDispatcher {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn submit(&self, image: &EncodedImage) -> Result<ExtractedText, DispatchError> {
        debug!(model = %self.model, bytes = image.bytes.len(), "Submitting to OpenAI");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(image))
            .send()
            .await?;
        let reading = parse_completion(&check_status(response).await?.text().await?)?;

        let text = reading.full_transcription.clone().unwrap_or_default();
        let details = serde_json::to_value(&reading).map_err(|e| DispatchError::Malformed(e.to_string()))?;
        Ok(ExtractedText {
            provider: self.name().to_string(),
            text,
            details: Some(details),
        })
    }
}
