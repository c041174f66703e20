use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::conversation::{ChatMode, SendOutcome};
use crate::pdf::{self, PdfDocument, PdfError, ViewPayload};
use crate::sources::{FormattedCitation, SearchResult};

/// One prior turn, stripped to what the backend replays to the model.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

/// Body of `POST /chat/send`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub model_id: String,
    pub request_id: String,
    pub conversation_history: Vec<HistoryMessage>,
    pub chat_mode: ChatMode,
    pub selected_workspaces: Vec<String>,
    pub selected_documents: HashMap<String, Vec<String>>,
    pub selected_domains: Vec<String>,
}

/// The assistant turn as returned by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantReply {
    pub content: String,
    pub html_content: Option<String>,
    pub timestamp: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub search_results: Vec<SearchResult>,
    #[serde(default)]
    pub formatted_citations: Vec<FormattedCitation>,
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default)]
    pub context_used: bool,
}

#[derive(Debug, Deserialize)]
struct ChatEnvelope {
    success: bool,
    response: Option<AssistantReply>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct ModelsEnvelope {
    success: bool,
    #[serde(default)]
    models: Vec<ModelInfo>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceDocument {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub documents: Vec<WorkspaceDocument>,
}

#[derive(Debug, Deserialize)]
struct WorkspacesEnvelope {
    #[serde(default)]
    workspaces: Vec<WorkspaceInfo>,
    error: Option<String>,
}

/// Result of an arXiv discovery search run through the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct PaperSearchResult {
    #[serde(default)]
    pub arxiv_ids: Vec<String>,
    #[serde(default)]
    pub total_found: usize,
    #[serde(default)]
    pub perplexity_response: String,
}

#[derive(Debug, Deserialize)]
struct PaperSearchEnvelope {
    success: bool,
    #[serde(flatten)]
    result: PaperSearchResult,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct PaperSearchRequest<'a> {
    query: &'a str,
    max_results: usize,
}

/// Thin JSON client for the DeepCite backend.
#[derive(Clone)]
pub struct DeepCiteClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl DeepCiteClient {
    pub fn new(base_url: &str, request_timeout_secs: u64) -> Self {
        DeepCiteClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(request_timeout_secs),
            client: reqwest::Client::new(),
        }
    }

    /// Send one chat turn. The future races the cancellation token; a
    /// cancelled request resolves silently, a timed-out one resolves as a
    /// failure with a timeout message.
    pub async fn send_chat(&self, request: &ChatRequest, token: CancellationToken) -> SendOutcome {
        let call = async {
            let response = self
                .client
                .post(format!("{}/chat/send", self.base_url))
                .timeout(self.timeout)
                .json(request)
                .send()
                .await?;
            response.json::<ChatEnvelope>().await
        };

        let result = tokio::select! {
            _ = token.cancelled() => return SendOutcome::Cancelled,
            result = call => result,
        };

        match result {
            Ok(envelope) => {
                if envelope.success {
                    match envelope.response {
                        Some(reply) => SendOutcome::Success(reply),
                        None => SendOutcome::Failed(
                            "Backend reported success but sent no response".to_string(),
                        ),
                    }
                } else {
                    SendOutcome::Failed(
                        envelope
                            .error
                            .unwrap_or_else(|| "Unknown backend error".to_string()),
                    )
                }
            }
            Err(e) if e.is_timeout() => SendOutcome::Failed(format!(
                "Request timed out after {} seconds",
                self.timeout.as_secs()
            )),
            Err(e) => SendOutcome::Failed(format!("Request failed: {}", e)),
        }
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let envelope: ModelsEnvelope = self
            .client
            .get(format!("{}/chat/models", self.base_url))
            .send()
            .await?
            .json()
            .await?;
        if !envelope.success {
            return Err(anyhow!(envelope
                .error
                .unwrap_or_else(|| "failed to list models".to_string())));
        }
        Ok(envelope.models)
    }

    pub async fn list_workspaces(&self) -> Result<Vec<WorkspaceInfo>> {
        let envelope: WorkspacesEnvelope = self
            .client
            .get(format!("{}/workspaces", self.base_url))
            .send()
            .await?
            .json()
            .await?;
        if let Some(error) = envelope.error {
            return Err(anyhow!(error));
        }
        Ok(envelope.workspaces)
    }

    /// arXiv discovery through the backend's web-search provider.
    pub async fn search_papers(&self, query: &str, max_results: usize) -> Result<PaperSearchResult> {
        let envelope: PaperSearchEnvelope = self
            .client
            .post(format!("{}/papers/search/perplexity", self.base_url))
            .json(&PaperSearchRequest { query, max_results })
            .send()
            .await?
            .json()
            .await?;
        if !envelope.success {
            return Err(anyhow!(envelope
                .error
                .unwrap_or_else(|| "paper search failed".to_string())));
        }
        Ok(envelope.result)
    }

    /// Obtain a verified PDF for a document, inline path first, binary
    /// download as the fallback.
    pub async fn fetch_document(&self, doc_id: &str, title: &str) -> Result<PdfDocument, PdfError> {
        match self.fetch_inline(doc_id, title).await {
            Ok(doc) => Ok(doc),
            Err(inline_err) => {
                log::warn!(
                    "inline view failed for document {}: {}; falling back to download",
                    doc_id,
                    inline_err
                );
                self.fetch_download(doc_id, title).await
            }
        }
    }

    async fn fetch_inline(&self, doc_id: &str, title: &str) -> Result<PdfDocument, PdfError> {
        // The view endpoint answers 4xx with the same JSON shape (error or
        // use_download set), so the payload is parsed regardless of status.
        let payload: ViewPayload = self
            .client
            .get(format!("{}/documents/{}/view", self.base_url, doc_id))
            .send()
            .await
            .map_err(|e| PdfError::Backend(e.to_string()))?
            .json()
            .await
            .map_err(|e| PdfError::Backend(e.to_string()))?;
        pdf::assemble_inline(doc_id, title, payload)
    }

    async fn fetch_download(&self, doc_id: &str, title: &str) -> Result<PdfDocument, PdfError> {
        let response = self
            .client
            .get(format!("{}/documents/{}/download", self.base_url, doc_id))
            .send()
            .await
            .map_err(|e| PdfError::Backend(e.to_string()))?;
        if !response.status().is_success() {
            return Err(PdfError::Backend(format!(
                "download failed with status {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PdfError::Backend(e.to_string()))?;
        pdf::assemble_download(doc_id, title, None, bytes.to_vec())
    }
}
