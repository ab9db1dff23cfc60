use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request types (what the chat widget sends TO us)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// Absent means streaming; the widget can opt out per request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    // Catch-all for unknown fields
    #[serde(flatten)]
    pub extra: std::collections::HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Passed through untouched; the upstream service is the authority on
    /// which roles it accepts.
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    /// Images and any other part types are accepted but contribute no text.
    #[serde(other)]
    Unsupported,
}

impl ChatMessage {
    /// Collapse content to a single string: string content passes through,
    /// part sequences concatenate their text parts in order, everything else
    /// is dropped. A missing content field yields the empty string.
    pub fn flattened_content(&self) -> String {
        match &self.content {
            None => String::new(),
            Some(MessageContent::Text(t)) => t.clone(),
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Unsupported => None,
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Response types (what we send BACK to the widget on the non-streaming path)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// Token accounting reported by the upstream provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_content_passes_through() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"user","content":"hello"}"#).unwrap();
        assert_eq!(msg.flattened_content(), "hello");
    }

    #[test]
    fn test_parts_concatenate_in_order_dropping_non_text() {
        let msg: ChatMessage = serde_json::from_str(
            r#"{"role":"user","content":[
                {"type":"text","text":"see "},
                {"type":"image_url","image_url":{"url":"data:..."}},
                {"type":"text","text":"this"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(msg.flattened_content(), "see this");
    }

    #[test]
    fn test_missing_content_yields_empty_string() {
        let msg: ChatMessage = serde_json::from_str(r#"{"role":"user"}"#).unwrap();
        assert_eq!(msg.flattened_content(), "");
    }

    #[test]
    fn test_unknown_role_is_preserved() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role":"narrator","content":"hi"}"#).unwrap();
        assert_eq!(msg.role, "narrator");
    }
}
