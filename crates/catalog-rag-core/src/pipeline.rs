//! Conversation orchestrator.
//!
//! One turn runs through a fixed sequence of stages:
//!
//! ```text
//! REWRITE → EMBED (vector modes only) → RETRIEVE → ASSEMBLE → GENERATE → RETURN | STREAM
//! ```
//!
//! * **REWRITE** asks the completion model for a search query. It cannot
//!   fail; see [`crate::rewrite`].
//! * **EMBED** embeds the *original* last user turn, not the rewritten
//!   query, and checks the vector length against the provider's dims.
//! * **RETRIEVE** runs [`HybridSearch`] with the rewritten query (text
//!   modes), the vector (vector modes), the caller's `top` and the union of
//!   rewriter and caller filters.
//! * **ASSEMBLE** builds `system, history..., question + sources` within
//!   `token_limit - response_tokens`, dropping the oldest history first.
//! * **GENERATE** calls the completion provider once.
//!
//! Every stage after REWRITE is fatal on failure and nothing is retried.
//! The retrieval trace (`data_points` and four thought steps) is attached
//! to the first choice of a whole response, or to the synthetic first chunk
//! of a streamed one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::chat::{ChatCompletion, CompletionRequest};
use crate::error::{RagError, Result};
use crate::filter::{RawFilter, SearchFilter};
use crate::models::{ChatMessage, RetrievalMode, Role, ScoredItem, ThoughtStep};
use crate::prompt;
use crate::provider::{embed_query_checked, CompletionProvider, EmbeddingProvider};
use crate::rewrite::{QueryRewriter, RewrittenQuery};
use crate::search::{HybridSearch, SearchRequest};
use crate::stream::{self, ResponseStream};
use crate::tokens::{self, TokenCounter, DEFAULT_TOKEN_LIMIT};

pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_RESPONSE_TOKENS: usize = 1024;
pub const DEFAULT_TOP: usize = 3;

/// Per-request knobs supplied under `context.overrides`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overrides {
    /// Absent or `null` means hybrid.
    #[serde(default)]
    pub retrieval_mode: Option<RetrievalMode>,
    #[serde(default)]
    pub top: Option<usize>,
    #[serde(default)]
    pub filters: Vec<RawFilter>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub prompt_template: Option<String>,
    /// Accepted and echoed in the trace; not applied.
    #[serde(default)]
    pub minimum_search_score: Option<f64>,
    /// Accepted and echoed in the trace; not applied.
    #[serde(default)]
    pub minimum_reranker_score: Option<f64>,
}

impl Overrides {
    pub fn retrieval_mode(&self) -> RetrievalMode {
        self.retrieval_mode.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub overrides: Overrides,
}

/// Inbound chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub context: RequestContext,
}

fn default_stream() -> bool {
    true
}

impl ChatRequest {
    /// Single-turn request with default overrides.
    pub fn ask(question: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::user(question)],
            stream: false,
            context: RequestContext::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataPoints {
    pub text: Vec<String>,
}

/// Retrieval trace returned alongside the answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseContext {
    pub data_points: DataPoints,
    pub thoughts: Vec<ThoughtStep>,
}

impl ResponseContext {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Everything GENERATE needs, produced by the earlier stages.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    pub request: CompletionRequest,
    pub context: ResponseContext,
    pub items: Vec<ScoredItem>,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Context window of the chat model.
    pub token_limit: usize,
    /// Tokens reserved for the answer.
    pub response_tokens: usize,
    pub temperature: f32,
    pub top: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            token_limit: DEFAULT_TOKEN_LIMIT,
            response_tokens: DEFAULT_RESPONSE_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top: DEFAULT_TOP,
        }
    }
}

/// The orchestrator. Cheap to share behind an `Arc`; holds no per-request
/// state.
pub struct ChatPipeline {
    search: HybridSearch,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    completion: Arc<dyn CompletionProvider>,
    rewriter: QueryRewriter,
    counter: TokenCounter,
    settings: PipelineSettings,
}

impl ChatPipeline {
    /// Without an embedder, hybrid retrieval runs keyword-only and
    /// vector-only retrieval is rejected as an invalid query.
    pub fn new(
        search: HybridSearch,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        completion: Arc<dyn CompletionProvider>,
        counter: TokenCounter,
        settings: PipelineSettings,
    ) -> Self {
        let rewriter =
            QueryRewriter::new(completion.clone(), counter.clone(), settings.token_limit);
        Self {
            search,
            embedder,
            completion,
            rewriter,
            counter,
            settings,
        }
    }

    /// Run every stage up to GENERATE.
    pub async fn prepare(&self, request: &ChatRequest) -> Result<PreparedTurn> {
        let overrides = &request.context.overrides;
        let (original, past) = split_question(&request.messages)?;
        let caller_filters = validate_caller_filters(&overrides.filters)?;
        let mode = overrides.retrieval_mode();
        let top = overrides.top.unwrap_or(self.settings.top);

        // REWRITE
        let rewritten = self.rewriter.rewrite(&request.messages).await;

        // EMBED
        let query_vector = if mode.has_vector() {
            self.embed(original).await?
        } else {
            None
        };

        // RETRIEVE
        let mut filters = rewritten.filters.clone();
        filters.extend(caller_filters);
        let search_request = SearchRequest {
            query_text: mode.has_text().then(|| rewritten.query_text.clone()),
            query_vector,
            top_k: top,
            filters,
        };
        let items = self.search.search(&search_request).await?;
        tracing::info!(
            mode = mode.as_str(),
            query = %rewritten.query_text,
            hits = items.len(),
            "retrieved sources"
        );

        // ASSEMBLE
        let plain: Vec<_> = items.iter().map(|s| s.item.clone()).collect();
        let system = prompt::system_prompt(overrides.prompt_template.as_deref());
        let messages = tokens::build_messages(
            &self.counter,
            &system,
            &[],
            past,
            &prompt::answer_user_message(original, &plain),
            self.settings
                .token_limit
                .saturating_sub(self.settings.response_tokens),
        );

        let temperature = overrides.temperature.unwrap_or(self.settings.temperature);
        let mut completion_request = CompletionRequest::new(messages, temperature);
        completion_request.max_tokens = Some(self.settings.response_tokens as u32);
        completion_request.stream = request.stream;

        let context = ResponseContext {
            data_points: DataPoints {
                text: plain.iter().map(|i| i.source_line()).collect(),
            },
            thoughts: self.thoughts(
                &rewritten,
                &search_request,
                mode,
                overrides,
                &items,
                &completion_request,
            ),
        };

        Ok(PreparedTurn {
            request: completion_request,
            context,
            items,
        })
    }

    /// Answer one turn with a single completion.
    pub async fn run(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let mut prepared = self.prepare(request).await?;
        prepared.request.stream = false;

        // GENERATE
        let mut completion = self
            .completion
            .complete(&prepared.request)
            .await
            .map_err(|e| RagError::provider("generation", e))?;

        if let Some(choice) = completion.choices.first_mut() {
            choice.context = Some(prepared.context.to_value());
        }
        Ok(completion)
    }

    /// Answer one turn as a chunk stream. Errors before the stream opens
    /// are returned here; later ones arrive as the stream's last item.
    pub async fn run_stream(&self, request: &ChatRequest) -> Result<ResponseStream> {
        let mut prepared = self.prepare(request).await?;
        prepared.request.stream = true;

        // GENERATE
        let upstream = self
            .completion
            .complete_stream(&prepared.request)
            .await
            .map_err(|e| RagError::provider("generation", e))?;

        Ok(stream::adapt(prepared.context.to_value(), upstream))
    }

    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let Some(embedder) = &self.embedder else {
            tracing::debug!("no embedding provider configured, skipping vector search");
            return Ok(None);
        };
        let vector = embed_query_checked(embedder.as_ref(), text).await?;
        Ok(Some(vector))
    }

    fn thoughts(
        &self,
        rewritten: &RewrittenQuery,
        search: &SearchRequest,
        mode: RetrievalMode,
        overrides: &Overrides,
        items: &[ScoredItem],
        answer: &CompletionRequest,
    ) -> Vec<ThoughtStep> {
        let model_props = json!({
            "model": self.completion.model_name(),
            "deployment": self.completion.deployment(),
        });
        vec![
            ThoughtStep::new("Prompt to generate search query", json!(rewritten.prompt))
                .with_props(model_props.clone()),
            ThoughtStep::new(
                "Search using generated search query",
                json!(rewritten.query_text),
            )
            .with_props(json!({
                "top": search.top_k,
                "retrieval_mode": mode.as_str(),
                "filters": search.filters,
                "used_fallback": rewritten.fell_back,
                "has_vector": search.query_vector.is_some(),
                "minimum_search_score": overrides.minimum_search_score,
                "minimum_reranker_score": overrides.minimum_reranker_score,
            })),
            ThoughtStep::new("Search results", json!(items)),
            ThoughtStep::new("Prompt to generate answer", json!(answer.messages))
                .with_props(model_props),
        ]
    }
}

/// History holds system, user and assistant turns only, and the last turn
/// must be a non-empty user message.
fn split_question(messages: &[ChatMessage]) -> Result<(&str, &[ChatMessage])> {
    if messages.iter().any(|m| m.role == Role::Tool) {
        return Err(RagError::InvalidQuery("tool turns are not accepted in chat history".into()));
    }
    match messages.split_last() {
        Some((last, past)) if last.role == Role::User && !last.content.trim().is_empty() => {
            Ok((last.content.as_str(), past))
        }
        Some(_) => Err(RagError::InvalidQuery(
            "the last message must be a non-empty user turn".into(),
        )),
        None => Err(RagError::InvalidQuery("messages must not be empty".into())),
    }
}

fn validate_caller_filters(raw: &[RawFilter]) -> Result<Vec<SearchFilter>> {
    raw.iter()
        .map(|r| {
            SearchFilter::from_raw(r).map_err(|e| RagError::InvalidQuery(e.to_string()))
        })
        .collect()
}
