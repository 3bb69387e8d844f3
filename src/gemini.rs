use crate::diagnostic::{DiagnosticBackend, DiagnosticError};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;

/// `generateContent` client for a Gemini-style text-generation service.
pub struct GeminiClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self) -> Result<Url, DiagnosticError> {
        let base = format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        );
        Url::parse_with_params(&base, &[("key", self.api_key.as_str())])
            .map_err(|err| DiagnosticError::Endpoint(format!("{base}: {err}")))
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn first_text(self) -> Option<String> {
        self.candidates?
            .into_iter()
            .next()?
            .content?
            .parts?
            .into_iter()
            .next()?
            .text
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl DiagnosticBackend for GeminiClient {
    async fn generate(&self, prompt: String) -> Result<Option<String>, DiagnosticError> {
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        let resp = self.client.post(self.url()?).json(&body).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorEnvelope>(&bytes)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
            return Err(DiagnosticError::Rejected { status, message });
        }

        let parsed: GenerateResponse = serde_json::from_slice(&bytes)?;
        Ok(parsed.first_text())
    }
}
