//! Shared plumbing for OpenAI-compatible hosts.
//!
//! | Host | URL | Auth |
//! |------|-----|------|
//! | `openai` | `{endpoint or https://api.openai.com/v1}/{op}` | `Authorization: Bearer $OPENAI_API_KEY` |
//! | `azure` | `{endpoint}/openai/deployments/{deployment}/{op}?api-version=..` | `api-key: $AZURE_OPENAI_KEY` |
//! | `ollama` | `{endpoint or http://localhost:11434/v1}/{op}` | none |

use anyhow::{bail, Result};
use reqwest::RequestBuilder;

use catalog_rag_core::error::ProviderError;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
pub const AZURE_API_VERSION: &str = "2024-06-01";

#[derive(Debug, Clone, PartialEq)]
enum Auth {
    Bearer(String),
    ApiKey(String),
    None,
}

/// Where and how to reach one model on one host.
#[derive(Debug, Clone)]
pub struct Endpoint {
    url: String,
    auth: Auth,
}

impl Endpoint {
    /// Resolve the URL for `op` (`"chat/completions"` or `"embeddings"`).
    pub fn new(
        host: &str,
        op: &str,
        endpoint: Option<&str>,
        deployment: Option<&str>,
        api_version: Option<&str>,
    ) -> Result<Self> {
        match host {
            "openai" => {
                let key = std::env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
                Ok(Self {
                    url: join(endpoint.unwrap_or(OPENAI_BASE_URL), op),
                    auth: Auth::Bearer(key),
                })
            }
            "azure" => {
                let (Some(endpoint), Some(deployment)) = (endpoint, deployment) else {
                    bail!("Azure OpenAI requires an endpoint and a deployment");
                };
                let key = std::env::var("AZURE_OPENAI_KEY")
                    .map_err(|_| anyhow::anyhow!("AZURE_OPENAI_KEY environment variable not set"))?;
                let url = format!(
                    "{}?api-version={}",
                    join(&join(endpoint, "openai/deployments"), &join(deployment, op)),
                    api_version.unwrap_or(AZURE_API_VERSION)
                );
                Ok(Self {
                    url,
                    auth: Auth::ApiKey(key),
                })
            }
            "ollama" => Ok(Self {
                url: join(endpoint.unwrap_or(OLLAMA_BASE_URL), op),
                auth: Auth::None,
            }),
            other => bail!("Unknown host: {}", other),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::Bearer(key) => request.bearer_auth(key),
            Auth::ApiKey(key) => request.header("api-key", key),
            Auth::None => request,
        }
    }
}

fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub fn request_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Request(e.to_string())
    }
}

/// Turn a non-success response into [`ProviderError::Status`].
pub async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}
