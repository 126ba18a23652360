//! Prompt text for the rewrite and answer stages.

use crate::models::{ChatMessage, Item};

/// Reply the rewriter asks for when no search query can be produced.
pub const NO_RESPONSE: &str = "0";

/// Prefix added to the last user turn when asking for a search query.
pub const REWRITE_REQUEST_PREFIX: &str = "Generate search query for: ";

/// A `prompt_template` override starting with this marker is appended to
/// the default system prompt instead of replacing it.
pub const INJECT_MARKER: &str = ">>>";

pub const QUERY_PROMPT: &str = "\
Below is a history of the conversation so far, and a new question asked by the user that needs to be answered by searching a product catalog.
You have access to a database of retail items with the columns id, type, brand, name, description and price.
Generate a search query based on the conversation and the new question.
If the question mentions a price, a brand or a type of item, add filters for them.
Do not include cited source filenames or document names in the search query terms.
Do not include any text inside [] or <<>> in the search query terms.
Do not include any special characters like '+'.
If you cannot generate a search query, return just the number 0.";

pub const ANSWER_PROMPT: &str = "\
Assistant helps customers with questions about products.
Respond as if you are a salesperson helping a customer in a store. Do NOT respond with tables.
Answer ONLY with the product details listed in the products.
If there isn't enough information below, say you don't know.
Do not generate answers that don't use the sources below.
Each product has an ID in brackets followed by colon and the product details.
Always include the product ID for each product you use in the response.
Use square brackets to reference the source, for example [52].
Don't combine citations, list each product separately, for example [27][51].";

/// Few-shot turns shown to the rewriter before the real conversation.
pub fn query_few_shots() -> Vec<ChatMessage> {
    vec![
        ChatMessage::user("How did crypto do last year?"),
        ChatMessage::assistant("Summarize Cryptocurrency Market Dynamics from last year"),
        ChatMessage::user("What are my health plans?"),
        ChatMessage::assistant("Show available health plans"),
    ]
}

/// System prompt for the answer stage, honoring a caller template.
///
/// `None` or an empty template keeps the default. `">>>extra"` appends
/// `extra` to the default. Anything else replaces it.
pub fn system_prompt(template: Option<&str>) -> String {
    match template.filter(|t| !t.is_empty()) {
        None => ANSWER_PROMPT.to_string(),
        Some(t) => match t.strip_prefix(INJECT_MARKER) {
            Some(injected) => format!("{}\n{}", ANSWER_PROMPT, injected.trim_start()),
            None => t.to_string(),
        },
    }
}

/// One `[id]: description` line per item, ranked order, blank line between.
pub fn sources_block(items: &[Item]) -> String {
    items
        .iter()
        .map(|item| format!("{}\n\n", item.source_line()))
        .collect()
}

/// Final user message for the answer stage.
pub fn answer_user_message(question: &str, items: &[Item]) -> String {
    format!("{}\n\nSources:\n{}", question, sources_block(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, description: &str) -> Item {
        Item {
            id,
            item_type: "Footwear".into(),
            brand: "Daybird".into(),
            name: format!("Item {}", id),
            description: description.into(),
            price: 10.0,
            embedding: None,
        }
    }

    #[test]
    fn test_default_prompt() {
        assert_eq!(system_prompt(None), ANSWER_PROMPT);
        assert_eq!(system_prompt(Some("")), ANSWER_PROMPT);
    }

    #[test]
    fn test_injected_prompt_is_appended() {
        let p = system_prompt(Some(">>> Answer in French."));
        assert!(p.starts_with(ANSWER_PROMPT));
        assert!(p.ends_with("Answer in French."));
    }

    #[test]
    fn test_template_replaces_prompt() {
        assert_eq!(system_prompt(Some("Be brief.")), "Be brief.");
    }

    #[test]
    fn test_sources_block() {
        let items = vec![item(3, "Red\nshoes"), item(1, "Blue tent")];
        assert_eq!(
            sources_block(&items),
            "[3]: Red shoes\n\n[1]: Blue tent\n\n"
        );
        assert_eq!(
            answer_user_message("What shoes?", &items[..1]),
            "What shoes?\n\nSources:\n[3]: Red shoes\n\n"
        );
    }
}
