//! Token counting and budget-aware message assembly.
//!
//! Prompts are assembled as `system, few-shots, history..., new user`.
//! The system message, few-shots and the new user message are always
//! kept; history turns are added newest-first until the next one would
//! overflow the budget, so the oldest turns are the first to go.

use std::sync::Arc;

use anyhow::Result;
use tiktoken_rs::CoreBPE;

use crate::models::ChatMessage;

/// Overhead the chat format adds to every message.
const TOKENS_PER_MESSAGE: usize = 3;

/// Context window used when a model is not in [`model_token_limit`].
pub const DEFAULT_TOKEN_LIMIT: usize = 4000;

/// Known context windows, by model name.
pub fn model_token_limit(model: &str) -> Option<usize> {
    let limit = match model {
        "gpt-35-turbo" | "gpt-3.5-turbo" => 4000,
        "gpt-35-turbo-16k" | "gpt-3.5-turbo-16k" => 16000,
        "gpt-4" => 8100,
        "gpt-4-32k" => 32000,
        "gpt-4v" | "gpt-4-turbo" | "gpt-4o" | "gpt-4o-mini" => 128000,
        _ => return None,
    };
    Some(limit)
}

/// BPE token counter, cheap to clone.
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TokenCounter {
    /// Load the tokenizer for `model`, falling back to `cl100k_base` for
    /// models tiktoken does not know (e.g. Azure deployment names or
    /// Ollama models).
    pub fn for_model(model: &str) -> Result<Self> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(_) => tiktoken_rs::cl100k_base()?,
        };
        Ok(Self { bpe: Arc::new(bpe) })
    }

    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    pub fn count_message(&self, message: &ChatMessage) -> usize {
        TOKENS_PER_MESSAGE + self.count(message.role.as_str()) + self.count(&message.content)
    }

    pub fn count_messages(&self, messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

/// Assemble a message list that fits in `max_tokens` where possible.
///
/// `past` is the prior conversation, oldest first, not including
/// `new_user`. If the fixed parts alone exceed the budget they are still
/// returned; the provider is left to reject the call.
pub fn build_messages(
    counter: &TokenCounter,
    system: &str,
    few_shots: &[ChatMessage],
    past: &[ChatMessage],
    new_user: &str,
    max_tokens: usize,
) -> Vec<ChatMessage> {
    let mut head = Vec::with_capacity(1 + few_shots.len());
    head.push(ChatMessage::system(system));
    head.extend(few_shots.iter().cloned());
    let tail = ChatMessage::user(new_user);

    let mut total = counter.count_messages(&head) + counter.count_message(&tail);
    if total > max_tokens {
        tracing::warn!(
            tokens = total,
            budget = max_tokens,
            "system prompt and question alone exceed the token budget"
        );
    }

    let mut kept: Vec<ChatMessage> = Vec::new();
    for message in past.iter().rev() {
        let tokens = counter.count_message(message);
        if total + tokens > max_tokens {
            break;
        }
        total += tokens;
        kept.push(message.clone());
    }

    let dropped = past.len() - kept.len();
    if dropped > 0 {
        tracing::debug!(dropped, kept = kept.len(), "truncated oldest history turns");
    }

    kept.reverse();
    let mut messages = head;
    messages.extend(kept);
    messages.push(tail);
    messages
}
