use crate::config::Settings;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::{ContentPart, FileState, FileStore, GenerateRequest, GenerativeModel, Provider, RemoteFile};
use anyhow::Context;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_ATTEMPTS: u32 = 3;

const JSON_MIME_TYPE: &str = "application/json";

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_output_tokens: u32,
}

impl GeminiClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_gemini_api_key()?.to_string();
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_output_tokens = std::env::var("GEMINI_MAX_OUTPUT_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS);

        let timeout_secs = std::env::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_output_tokens,
        })
    }

    fn headers(&self) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert("x-goog-api-key", HeaderValue::from_str(&self.api_key)?);
        Ok(headers)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn generate_content(
        &self,
        req: &GenerateContentRequest,
    ) -> anyhow::Result<(serde_json::Value, GenerateContentResponse)> {
        let url = self.api_url(&format!("v1beta/models/{}:generateContent", self.model));
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let res = match self
                .http
                .post(&url)
                .headers(self.headers()?)
                .json(req)
                .send()
                .await
            {
                Ok(res) => res,
                Err(err) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(diagnostics("transport", err.to_string(), None).into());
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "Gemini request failed; retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            };

            let status = res.status();
            let text = match res.text().await {
                Ok(text) => text,
                Err(err) => {
                    return Err(diagnostics("transport", format!("body read failed: {err}"), None).into())
                }
            };
            if !status.is_success() {
                let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                if retryable && attempt < MAX_ATTEMPTS {
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, %status, "Gemini HTTP error; retrying");
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                return Err(diagnostics("http", format!("status={status}"), Some(text)).into());
            }

            return decode_response(text);
        }
    }

    fn build_request(
        req: &GenerateRequest,
        max_output_tokens: u32,
        response_mime_type: Option<&'static str>,
    ) -> GenerateContentRequest {
        GenerateContentRequest {
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text(req.system_instruction.clone())],
            }),
            contents: vec![Content {
                role: Some("user"),
                parts: req.parts.iter().map(Part::from_content).collect(),
            }],
            generation_config: GenerationConfig {
                max_output_tokens,
                response_mime_type,
            },
        }
    }

    fn response_text(res: &GenerateContentResponse) -> Option<String> {
        let candidate = res.candidates.first()?;
        let mut out = String::new();
        for part in candidate.content.as_ref()?.parts.iter() {
            if let Some(text) = &part.text {
                out.push_str(text);
            }
        }
        Some(out).filter(|s| !s.trim().is_empty())
    }

    async fn generate(
        &self,
        req: GenerateRequest,
        response_mime_type: Option<&'static str>,
    ) -> anyhow::Result<String> {
        let parts = req.parts.len();
        let (mut raw_json, mut res) = self
            .generate_content(&Self::build_request(&req, self.max_output_tokens, response_mime_type))
            .await?;

        // If the model hit the output ceiling, retry once with a higher one.
        if res.finish_reason() == Some("MAX_TOKENS") {
            let bumped = self.max_output_tokens.saturating_mul(2).max(16384);
            tracing::warn!(
                from = self.max_output_tokens,
                to = bumped,
                "Gemini finishReason=MAX_TOKENS; retrying once with higher maxOutputTokens"
            );
            let (rj, r) = self
                .generate_content(&Self::build_request(&req, bumped, response_mime_type))
                .await?;
            raw_json = rj;
            res = r;
        }

        match Self::response_text(&res) {
            Some(text) => {
                tracing::debug!(
                    model = %self.model,
                    parts,
                    json_mode = response_mime_type.is_some(),
                    chars = text.len(),
                    "Gemini generation complete"
                );
                Ok(text)
            }
            None => Err(LlmDiagnosticsError {
                provider: Provider::Gemini,
                stage: "empty_response",
                detail: format!(
                    "no text in first candidate (finish_reason={:?}, block_reason={:?})",
                    res.finish_reason(),
                    res.prompt_feedback.as_ref().and_then(|f| f.block_reason.clone())
                ),
                raw_output: None,
                raw_response_json: Some(raw_json),
            }
            .into()),
        }
    }
}

fn diagnostics(stage: &'static str, detail: String, raw_output: Option<String>) -> LlmDiagnosticsError {
    let raw_response_json = raw_output
        .as_deref()
        .and_then(|t| serde_json::from_str::<serde_json::Value>(t).ok());
    LlmDiagnosticsError {
        provider: Provider::Gemini,
        stage,
        detail,
        raw_output,
        raw_response_json,
    }
}

fn decode_response(text: String) -> anyhow::Result<(serde_json::Value, GenerateContentResponse)> {
    let raw_json = match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(v) => v,
        Err(err) => return Err(diagnostics("decode", err.to_string(), Some(text)).into()),
    };
    match serde_json::from_value::<GenerateContentResponse>(raw_json.clone()) {
        Ok(parsed) => Ok((raw_json, parsed)),
        Err(err) => Err(LlmDiagnosticsError {
            provider: Provider::Gemini,
            stage: "decode",
            detail: err.to_string(),
            raw_output: None,
            raw_response_json: Some(raw_json),
        }
        .into()),
    }
}

#[async_trait::async_trait]
impl GenerativeModel for GeminiClient {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn generate_text(&self, req: GenerateRequest) -> anyhow::Result<String> {
        self.generate(req, None).await
    }

    async fn generate_json(&self, req: GenerateRequest) -> anyhow::Result<String> {
        self.generate(req, Some(JSON_MIME_TYPE)).await
    }
}

#[async_trait::async_trait]
impl FileStore for GeminiClient {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> anyhow::Result<RemoteFile> {
        let mut start_headers = self.headers()?;
        start_headers.insert("x-goog-upload-protocol", HeaderValue::from_static("resumable"));
        start_headers.insert("x-goog-upload-command", HeaderValue::from_static("start"));
        start_headers.insert(
            "x-goog-upload-header-content-length",
            HeaderValue::from_str(&bytes.len().to_string())?,
        );
        start_headers.insert(
            "x-goog-upload-header-content-type",
            HeaderValue::from_str(mime_type)?,
        );

        let start = self
            .http
            .post(self.api_url("upload/v1beta/files"))
            .headers(start_headers)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .context("Gemini upload start failed")?;

        let status = start.status();
        if !status.is_success() {
            let text = start.text().await.unwrap_or_default();
            anyhow::bail!("Gemini upload start HTTP {status}: {text}");
        }
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .context("Gemini upload start returned no x-goog-upload-url")?;

        let mut put_headers = HeaderMap::new();
        put_headers.insert("x-goog-upload-offset", HeaderValue::from_static("0"));
        put_headers.insert(
            "x-goog-upload-command",
            HeaderValue::from_static("upload, finalize"),
        );

        let res = self
            .http
            .post(upload_url)
            .headers(put_headers)
            .body(bytes)
            .send()
            .await
            .context("Gemini upload finalize failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Gemini upload response")?;
        if !status.is_success() {
            anyhow::bail!("Gemini upload finalize HTTP {status}: {text}");
        }

        let parsed = serde_json::from_str::<UploadFileResponse>(&text)
            .with_context(|| format!("failed to parse Gemini upload response: {text}"))?;
        Ok(parsed.file.into_remote(mime_type))
    }

    async fn poll_state(&self, file: &RemoteFile) -> anyhow::Result<FileState> {
        let res = self
            .http
            .get(self.api_url(&format!("v1beta/{}", file.name)))
            .headers(self.headers()?)
            .send()
            .await
            .context("Gemini file state request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Gemini file state response")?;
        if !status.is_success() {
            anyhow::bail!("Gemini file state HTTP {status}: {text}");
        }

        let parsed = serde_json::from_str::<FileResource>(&text)
            .with_context(|| format!("failed to parse Gemini file resource: {text}"))?;
        Ok(parse_file_state(parsed.state.as_deref()))
    }
}

fn parse_file_state(state: Option<&str>) -> FileState {
    match state {
        Some("ACTIVE") => FileState::Active,
        Some("FAILED") => FileState::Failed,
        _ => FileState::Processing,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Default::default()
        }
    }

    fn from_content(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text(text) => Self::text(text.clone()),
            ContentPart::FileRef { uri, mime_type } => Self {
                file_data: Some(FileData {
                    mime_type: mime_type.clone(),
                    file_uri: uri.clone(),
                }),
                ..Default::default()
            },
            ContentPart::Inline { mime_type, data } => Self {
                inline_data: Some(InlineData {
                    mime_type: mime_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(data),
                }),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateContentResponse {
    fn finish_reason(&self) -> Option<&str> {
        self.candidates.first()?.finish_reason.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct UploadFileResponse {
    file: FileResource,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

impl FileResource {
    fn into_remote(self, fallback_mime: &str) -> RemoteFile {
        RemoteFile {
            name: self.name,
            uri: self.uri,
            mime_type: self.mime_type.unwrap_or_else(|| fallback_mime.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_all_part_kinds() {
        let req = GenerateRequest {
            system_instruction: "sys".to_string(),
            parts: vec![
                ContentPart::Text("hello".to_string()),
                ContentPart::FileRef {
                    uri: "https://files/abc".to_string(),
                    mime_type: "application/pdf".to_string(),
                },
                ContentPart::Inline {
                    mime_type: "image/png".to_string(),
                    data: vec![1, 2, 3],
                },
            ],
        };

        let body = serde_json::to_value(GeminiClient::build_request(&req, 1024, Some(JSON_MIME_TYPE))).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(body["contents"][0]["role"], "user");
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0], json!({"text": "hello"}));
        assert_eq!(
            parts[1],
            json!({"fileData": {"mimeType": "application/pdf", "fileUri": "https://files/abc"}})
        );
        assert_eq!(
            parts[2],
            json!({"inlineData": {"mimeType": "image/png", "data": "AQID"}})
        );
        assert_eq!(body["generationConfig"]["responseMimeType"], JSON_MIME_TYPE);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn text_mode_omits_response_mime_type() {
        let req = GenerateRequest {
            system_instruction: "sys".to_string(),
            parts: vec![ContentPart::Text("hi".to_string())],
        };
        let body = serde_json::to_value(GeminiClient::build_request(&req, 1024, None)).unwrap();
        assert!(body["generationConfig"].get("responseMimeType").is_none());
    }

    #[test]
    fn joins_candidate_text_parts() {
        let res: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "world"}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(GeminiClient::response_text(&res).as_deref(), Some("Hello world"));
        assert_eq!(res.finish_reason(), Some("STOP"));
    }

    #[test]
    fn blocked_prompt_has_no_text() {
        let res: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert!(GeminiClient::response_text(&res).is_none());
        assert_eq!(
            res.prompt_feedback.unwrap().block_reason.as_deref(),
            Some("SAFETY")
        );
    }

    #[test]
    fn undecodable_body_is_a_decode_diagnostic() {
        let err = decode_response("<html>gateway timeout</html>".to_string()).unwrap_err();
        let diag = err.downcast_ref::<LlmDiagnosticsError>().unwrap();
        assert_eq!(diag.stage, "decode");
        assert_eq!(diag.raw_output.as_deref(), Some("<html>gateway timeout</html>"));

        let err = decode_response(r#"{"candidates": "nope"}"#.to_string()).unwrap_err();
        let diag = err.downcast_ref::<LlmDiagnosticsError>().unwrap();
        assert_eq!(diag.stage, "decode");
        assert!(diag.raw_response_json.is_some());
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_diagnostic() {
        let client = GeminiClient {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()
                .unwrap(),
            api_key: "test-key".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_output_tokens: 64,
        };
        let req = GenerateRequest {
            system_instruction: "sys".to_string(),
            parts: vec![ContentPart::Text("hi".to_string())],
        };

        let err = client.generate_json(req).await.unwrap_err();
        let diag = err.downcast_ref::<LlmDiagnosticsError>().unwrap();
        assert_eq!(diag.stage, "transport");
        assert_eq!(diag.provider, Provider::Gemini);
    }

    #[test]
    fn parses_upload_response_and_states() {
        let parsed: UploadFileResponse = serde_json::from_value(json!({
            "file": {
                "name": "files/abc-123",
                "uri": "https://generativelanguage.googleapis.com/v1beta/files/abc-123",
                "mimeType": "application/pdf",
                "state": "PROCESSING"
            }
        }))
        .unwrap();
        assert_eq!(parse_file_state(parsed.file.state.as_deref()), FileState::Processing);
        let remote = parsed.file.into_remote("application/octet-stream");
        assert_eq!(remote.name, "files/abc-123");
        assert_eq!(remote.mime_type, "application/pdf");

        assert_eq!(parse_file_state(Some("ACTIVE")), FileState::Active);
        assert_eq!(parse_file_state(Some("FAILED")), FileState::Failed);
        assert_eq!(parse_file_state(None), FileState::Processing);
    }
}
