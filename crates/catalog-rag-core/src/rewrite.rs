//! Query rewriting: conversation history in, search query and filters out.
//!
//! The completion provider is offered one tool, `search_database`, and may
//! either call it, answer in plain text, or reply with the
//! [`NO_RESPONSE`](crate::prompt::NO_RESPONSE) sentinel. The reply is
//! classified into a [`RewriteOutcome`] and then resolved:
//!
//! | Outcome | Result |
//! |---------|--------|
//! | `ToolCall` with valid arguments | `search_query` and valid filters |
//! | `ToolCall` with malformed arguments | last user turn, no filters |
//! | `PlainText` | the text, no filters |
//! | `Sentinel` | last user turn, no filters |
//! | provider error or empty reply | last user turn, no filters |
//!
//! Rewriting never fails the request.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::chat::{ChatCompletion, CompletionRequest, ToolDefinition};
use crate::error::ProviderError;
use crate::filter::{parse_filters, RawFilter, SearchFilter};
use crate::models::ChatMessage;
use crate::prompt::{self, NO_RESPONSE, REWRITE_REQUEST_PREFIX};
use crate::provider::CompletionProvider;
use crate::tokens::{self, TokenCounter};

pub const TOOL_NAME: &str = "search_database";
pub const REWRITE_TEMPERATURE: f32 = 0.0;
pub const REWRITE_RESPONSE_TOKENS: u32 = 100;

/// What the model did with the rewrite request.
#[derive(Debug, Clone, PartialEq)]
pub enum RewriteOutcome {
    /// Raw, unparsed tool arguments.
    ToolCall(String),
    PlainText(String),
    Sentinel,
}

/// Why a rewrite reply could not be used. Never leaves this module.
#[derive(Debug, Error)]
enum ExtractionError {
    #[error("rewrite call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("completion had no usable content")]
    Empty,

    #[error("malformed tool arguments: {0}")]
    MalformedArguments(#[from] serde_json::Error),
}

/// The search request produced for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenQuery {
    pub query_text: String,
    pub filters: Vec<SearchFilter>,
    /// Messages sent to the model, for the trace.
    pub prompt: Vec<ChatMessage>,
    /// Whether the last user turn was used verbatim.
    pub fell_back: bool,
}

#[derive(Debug, Deserialize)]
struct ToolArguments {
    #[serde(default)]
    search_query: Option<String>,
    #[serde(default)]
    filters: Vec<Value>,
}

/// Schema of the single tool offered to the model.
pub fn search_tool() -> ToolDefinition {
    ToolDefinition::function(
        TOOL_NAME,
        "Search the product catalog for items matching the search query and filters",
        json!({
            "type": "object",
            "properties": {
                "search_query": {
                    "type": "string",
                    "description": "Query string to use for full text search, e.g. 'red shoes'"
                },
                "filters": {
                    "type": "array",
                    "description": "Conditions on item columns, e.g. price < 30",
                    "items": {
                        "type": "object",
                        "properties": {
                            "column": {
                                "type": "string",
                                "enum": ["id", "type", "brand", "name", "description", "price"]
                            },
                            "comparison_operator": {
                                "type": "string",
                                "enum": ["=", ">", "<", ">=", "<="]
                            },
                            "value": {
                                "type": ["string", "number"],
                                "description": "Value to compare against, e.g. 30"
                            }
                        },
                        "required": ["column", "comparison_operator", "value"]
                    }
                }
            },
            "required": ["search_query"]
        }),
    )
}

pub struct QueryRewriter {
    completion: Arc<dyn CompletionProvider>,
    counter: TokenCounter,
    token_limit: usize,
}

impl QueryRewriter {
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        counter: TokenCounter,
        token_limit: usize,
    ) -> Self {
        Self {
            completion,
            counter,
            token_limit,
        }
    }

    /// Rewrite the last turn of `history` into a search query.
    ///
    /// `history` must end with the user turn being answered.
    pub async fn rewrite(&self, history: &[ChatMessage]) -> RewrittenQuery {
        let (original, past) = match history.split_last() {
            Some((last, past)) => (last.content.as_str(), past),
            None => ("", history),
        };

        let prompt = tokens::build_messages(
            &self.counter,
            prompt::QUERY_PROMPT,
            &prompt::query_few_shots(),
            past,
            &format!("{}{}", REWRITE_REQUEST_PREFIX, original),
            self.token_limit
                .saturating_sub(REWRITE_RESPONSE_TOKENS as usize),
        );

        let mut request = CompletionRequest::new(prompt.clone(), REWRITE_TEMPERATURE);
        request.max_tokens = Some(REWRITE_RESPONSE_TOKENS);
        request.tools = vec![search_tool()];
        request.tool_choice = Some("auto".to_string());

        let resolved = match self.completion.complete(&request).await {
            Ok(completion) => classify(&completion).and_then(resolve),
            Err(e) => Err(ExtractionError::from(e)),
        };

        match resolved {
            Ok(Some((query_text, filters))) => {
                tracing::debug!(
                    query = %query_text,
                    filters = filters.len(),
                    "rewrote search query"
                );
                RewrittenQuery {
                    query_text,
                    filters,
                    prompt,
                    fell_back: false,
                }
            }
            Ok(None) => {
                tracing::debug!("rewriter declined, using last user turn");
                fallback(original, prompt)
            }
            Err(e) => {
                tracing::warn!("query rewrite unusable, using last user turn: {}", e);
                fallback(original, prompt)
            }
        }
    }
}

fn fallback(original: &str, prompt: Vec<ChatMessage>) -> RewrittenQuery {
    RewrittenQuery {
        query_text: original.to_string(),
        filters: Vec::new(),
        prompt,
        fell_back: true,
    }
}

fn classify(completion: &ChatCompletion) -> Result<RewriteOutcome, ExtractionError> {
    let message = completion.first_message().ok_or(ExtractionError::Empty)?;

    if let Some(call) = message
        .tool_calls
        .iter()
        .find(|c| c.function.name == TOOL_NAME)
    {
        return Ok(RewriteOutcome::ToolCall(call.function.arguments.clone()));
    }

    match message.content.as_deref().map(str::trim) {
        None | Some("") => Err(ExtractionError::Empty),
        Some(NO_RESPONSE) => Ok(RewriteOutcome::Sentinel),
        Some(text) => Ok(RewriteOutcome::PlainText(text.to_string())),
    }
}

/// `Ok(None)` means "use the last user turn".
fn resolve(
    outcome: RewriteOutcome,
) -> Result<Option<(String, Vec<SearchFilter>)>, ExtractionError> {
    match outcome {
        RewriteOutcome::ToolCall(arguments) => {
            let args: ToolArguments = serde_json::from_str(&arguments)?;
            let query = args
                .search_query
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty() && q != NO_RESPONSE);
            let Some(query) = query else {
                return Ok(None);
            };
            Ok(Some((query, tool_filters(args.filters))))
        }
        RewriteOutcome::PlainText(text) => Ok(Some((text, Vec::new()))),
        RewriteOutcome::Sentinel => Ok(None),
    }
}

/// Validate model-suggested filters one at a time, dropping bad entries.
fn tool_filters(values: Vec<Value>) -> Vec<SearchFilter> {
    let raw: Vec<RawFilter> = values
        .into_iter()
        .filter_map(|v| match serde_json::from_value(v) {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::warn!("dropping malformed filter from rewriter: {}", e);
                None
            }
        })
        .collect();
    parse_filters(&raw)
}
