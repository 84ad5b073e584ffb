//! Gemini chat provider
//!
//! Talks to the `streamGenerateContent` endpoint with `alt=sse`, sends the
//! configured system instruction and enables Google Search grounding. Search
//! results come back as grounding chunks and are surfaced as citations.

use async_stream::try_stream;
use eventsource_stream::EventStreamError;
use eventsource_stream::Eventsource;
use futures::Stream;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use super::ContinuationRequest;
use super::ModelProvider;
use super::ResponseEvent;
use super::ResponseStream;
use crate::error::ProviderError;
use crate::error::ProviderErrorKind;
use crate::models::Citation;
use crate::models::Content;
use crate::models::Message;
use crate::models::Role;

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// The key travels in a header so it never shows up in URLs or error text.
const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    api_endpoint: Option<String>,
    system_instruction: Option<String>,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            api_endpoint: None,
            system_instruction: None,
        }
    }

    /// Point the provider at a different base URL, e.g. a proxy or a mock.
    pub fn with_endpoint(mut self, api_endpoint: impl Into<String>) -> Self {
        self.api_endpoint = Some(api_endpoint.into());
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        self.system_instruction = (!instruction.trim().is_empty()).then_some(instruction);
        self
    }

    fn url(&self) -> String {
        let endpoint = self
            .api_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_GEMINI_ENDPOINT)
            .trim_end_matches('/');
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            endpoint, self.model
        )
    }

    fn build_request(&self, request: &ContinuationRequest) -> GenerateContentRequest {
        let mut contents: Vec<WireContent> = request.history.iter().map(wire_message).collect();
        contents.push(WireContent {
            role: Some(gemini_role(Role::User)),
            parts: wire_parts(&request.prompt),
        });
        GenerateContentRequest {
            contents,
            system_instruction: self.system_instruction.as_ref().map(|text| WireContent {
                role: None,
                parts: vec![WirePart::Text { text: text.clone() }],
            }),
            tools: vec![WireTool {
                google_search: GoogleSearch {},
            }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WirePart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

const fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

fn wire_parts(content: &Content) -> Vec<WirePart> {
    let mut parts: Vec<WirePart> = content
        .images
        .iter()
        .map(|image| WirePart::InlineData {
            inline_data: InlineData {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            },
        })
        .collect();
    if !content.text.is_empty() {
        parts.push(WirePart::Text {
            text: content.text.clone(),
        });
    }
    parts
}

fn wire_message(message: &Message) -> WireContent {
    WireContent {
        role: Some(gemini_role(message.role)),
        parts: wire_parts(&message.content),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

impl GeminiErrorDetail {
    fn into_provider_error(self, http_status: Option<u16>) -> ProviderError {
        let status = http_status.or(self.code);
        let message = match self.status {
            Some(label) => format!("{label}: {}", self.message),
            None => self.message,
        };
        ProviderError::classified(status, message)
    }
}

/// Turn one SSE `data:` payload into response events.
fn parse_chunk(data: &str) -> Result<Vec<ResponseEvent>, ProviderError> {
    let chunk: GenerateContentChunk = serde_json::from_str(data).map_err(|e| {
        ProviderError::new(
            ProviderErrorKind::Unknown,
            format!("malformed response chunk: {e}"),
        )
    })?;
    if let Some(error) = chunk.error {
        return Err(error.into_provider_error(None));
    }

    let mut events = Vec::new();
    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return Ok(events);
    };

    let text: String = candidate
        .content
        .into_iter()
        .flat_map(|content| content.parts)
        .filter_map(|part| part.text)
        .collect();
    if !text.is_empty() {
        events.push(ResponseEvent::OutputTextDelta(text));
    }

    let citations: Vec<Citation> = candidate
        .grounding_metadata
        .into_iter()
        .flat_map(|metadata| metadata.grounding_chunks)
        .filter_map(|chunk| chunk.web)
        .filter_map(|web| {
            web.uri.map(|uri| Citation {
                uri,
                title: web.title,
            })
        })
        .collect();
    if !citations.is_empty() {
        events.push(ResponseEvent::Citations(citations));
    }
    Ok(events)
}

fn response_events(
    response: reqwest::Response,
) -> impl Stream<Item = Result<ResponseEvent, ProviderError>> + Send {
    try_stream! {
        let mut events = Box::pin(response.bytes_stream().eventsource());
        while let Some(event) = events.next().await {
            let event = event.map_err(|err| match err {
                EventStreamError::Transport(err) => ProviderError::from(err),
                other => ProviderError::new(ProviderErrorKind::Unknown, other.to_string()),
            })?;
            if event.data.trim().is_empty() {
                continue;
            }
            for parsed in parse_chunk(&event.data)? {
                yield parsed;
            }
        }
        yield ResponseEvent::Completed;
    }
}

#[async_trait::async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> String {
        format!("gemini:{}", self.model)
    }

    async fn request_continuation(
        &self,
        request: ContinuationRequest,
    ) -> Result<ResponseStream, ProviderError> {
        let body = self.build_request(&request);
        debug!(
            conversation = %request.conversation_id,
            history = body.contents.len() - 1,
            model = %self.model,
            "requesting continuation"
        );

        let response = self
            .client
            .post(self.url())
            .header("Content-Type", "application/json")
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(status = status.as_u16(), "gemini request failed");
            if let Ok(error) = serde_json::from_str::<GeminiError>(&error_text) {
                return Err(error.error.into_provider_error(Some(status.as_u16())));
            }
            return Err(ProviderError::classified(
                Some(status.as_u16()),
                format!("Gemini API error ({status}): {error_text}"),
            ));
        }

        Ok(Box::pin(response_events(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageAttachment;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn request_body_uses_gemini_roles_and_parts() {
        let provider = GeminiProvider::new("key".to_string(), "gemini-2.5-flash".to_string())
            .with_system_instruction("Be brief.");
        let history = vec![
            Message::user(Content::text("hi")),
            Message::assistant(Content::text("hello")),
        ];
        let prompt = Content::with_images(
            "what is this?",
            vec![ImageAttachment {
                mime_type: "image/png".to_string(),
                data: "AAAA".to_string(),
            }],
        );
        let request = ContinuationRequest::new(Uuid::new_v4(), history, prompt);

        let body = serde_json::to_value(provider.build_request(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [
                    { "role": "user", "parts": [{ "text": "hi" }] },
                    { "role": "model", "parts": [{ "text": "hello" }] },
                    {
                        "role": "user",
                        "parts": [
                            { "inlineData": { "mimeType": "image/png", "data": "AAAA" } },
                            { "text": "what is this?" }
                        ]
                    }
                ],
                "systemInstruction": { "parts": [{ "text": "Be brief." }] },
                "tools": [{ "googleSearch": {} }]
            })
        );
    }

    #[test]
    fn url_targets_sse_stream_endpoint_without_key() {
        let provider = GeminiProvider::new("secret".to_string(), "gemini-2.5-flash".to_string())
            .with_endpoint("http://localhost:9999/");
        assert_eq!(
            provider.url(),
            "http://localhost:9999/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn chunk_with_text_and_grounding() {
        let data = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Paris" }, { "text": " is" }] },
                "groundingMetadata": {
                    "groundingChunks": [
                        { "web": { "uri": "https://example.com/paris", "title": "example.com" } },
                        { "web": { "title": "no uri" } }
                    ]
                }
            }]
        })
        .to_string();

        let events = parse_chunk(&data).unwrap();
        assert_eq!(
            events,
            vec![
                ResponseEvent::OutputTextDelta("Paris is".to_string()),
                ResponseEvent::Citations(vec![Citation {
                    uri: "https://example.com/paris".to_string(),
                    title: Some("example.com".to_string()),
                }]),
            ]
        );
    }

    #[test]
    fn chunk_without_candidates_yields_nothing() {
        assert!(parse_chunk("{}").unwrap().is_empty());
    }

    #[test]
    fn error_chunk_is_classified() {
        let data = json!({
            "error": { "code": 429, "message": "Resource has been exhausted", "status": "RESOURCE_EXHAUSTED" }
        })
        .to_string();
        let err = parse_chunk(&data).unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::RateLimited);
    }
}
