//! Core data models shared by the search engine, the rewriter, and the
//! chat pipeline.
//!
//! Items are read-only during serving. Conversation turns and thought
//! steps exist only for the lifetime of one request.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A catalog entry.
///
/// `description` is both the keyword-indexed text and the main input to
/// the embedding job. `embedding` is `None` for items that have not been
/// embedded yet and is never serialized into responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    #[serde(rename = "type")]
    pub item_type: String,
    pub brand: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Item {
    /// Text fed to the embedding provider by the re-embedding job.
    ///
    /// Price is excluded; numeric columns are served by filters.
    pub fn to_str_for_embedding(&self) -> String {
        format!(
            "Name: {} Description: {} Type: {} Brand: {}",
            self.name, self.description, self.item_type, self.brand
        )
    }

    /// The `"[id]: description"` line used in prompts and data points.
    pub fn source_line(&self) -> String {
        format!("[{}]: {}", self.id, nonewlines(&self.description))
    }
}

/// Replace line breaks so each source stays on one line of the prompt.
pub fn nonewlines(s: &str) -> String {
    s.replace(['\n', '\r'], " ")
}

/// An item id with its fused score, before hydration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankedResult {
    pub item_id: i64,
    pub fused_score: f64,
}

/// A hydrated search hit.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredItem {
    #[serde(flatten)]
    pub item: Item,
    pub score: f64,
}

/// Which sub-queries take part in retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    #[serde(alias = "text-only", alias = "keyword")]
    Text,
    #[serde(alias = "vector", alias = "vector-only", alias = "vectors-only")]
    Vectors,
    #[default]
    Hybrid,
}

impl RetrievalMode {
    pub fn has_text(self) -> bool {
        matches!(self, RetrievalMode::Text | RetrievalMode::Hybrid)
    }

    pub fn has_vector(self) -> bool {
        matches!(self, RetrievalMode::Vectors | RetrievalMode::Hybrid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalMode::Text => "text",
            RetrievalMode::Vectors => "vectors",
            RetrievalMode::Hybrid => "hybrid",
        }
    }
}

impl std::str::FromStr for RetrievalMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" | "text-only" | "keyword" => Ok(RetrievalMode::Text),
            "vectors" | "vector" | "vector-only" | "vectors-only" => Ok(RetrievalMode::Vectors),
            "hybrid" => Ok(RetrievalMode::Hybrid),
            other => Err(format!(
                "unknown retrieval mode '{}': use text, vectors, or hybrid",
                other
            )),
        }
    }
}

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[default]
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A diagnostic record of one pipeline decision.
///
/// Thought steps are attached to responses for observability; nothing in
/// the pipeline reads them back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThoughtStep {
    pub title: String,
    pub description: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub props: Option<Map<String, Value>>,
}

impl ThoughtStep {
    pub fn new(title: impl Into<String>, description: Value) -> Self {
        Self {
            title: title.into(),
            description,
            props: None,
        }
    }

    pub fn with_props(mut self, props: Value) -> Self {
        if let Value::Object(map) = props {
            self.props = Some(map);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shoe() -> Item {
        Item {
            id: 7,
            item_type: "Footwear".into(),
            brand: "Daybird".into(),
            name: "Trail Runner".into(),
            description: "Red shoe\nwith grip".into(),
            price: 89.5,
            embedding: Some(vec![0.1, 0.2]),
        }
    }

    #[test]
    fn test_source_line_strips_newlines() {
        assert_eq!(shoe().source_line(), "[7]: Red shoe with grip");
    }

    #[test]
    fn test_item_serialization_omits_embedding() {
        let json = serde_json::to_value(shoe()).unwrap();
        assert!(json.get("embedding").is_none());
        assert_eq!(json["type"], "Footwear");
    }

    #[test]
    fn test_embedding_text_excludes_price() {
        let text = shoe().to_str_for_embedding();
        assert!(text.contains("Trail Runner"));
        assert!(!text.contains("89.5"));
    }

    #[test]
    fn test_retrieval_mode_aliases() {
        let m: RetrievalMode = serde_json::from_str("\"vector-only\"").unwrap();
        assert_eq!(m, RetrievalMode::Vectors);
        let m: RetrievalMode = serde_json::from_str("\"text\"").unwrap();
        assert!(m.has_text() && !m.has_vector());
        assert_eq!(RetrievalMode::default(), RetrievalMode::Hybrid);
        assert!("bogus".parse::<RetrievalMode>().is_err());
    }
}
