//! Build upstream completion requests from browser chat payloads.
//!
//! Content that arrives as a sequence of typed parts is folded into a single
//! string: text parts concatenated in order, everything else dropped (lossy,
//! best-effort). Roles and message order are preserved exactly;
//! nothing is validated here, the upstream service decides what it accepts.

use super::chat_types::ChatRequest;
use super::upstream_types::{CompletionRequest, UpstreamMessage};

/// Translate an inbound chat request into an upstream completions request.
/// Pure function: takes the payload + target model, returns the request.
pub fn chat_to_completion(req: &ChatRequest, model: &str, stream: bool) -> CompletionRequest {
    let messages = req
        .messages
        .iter()
        .map(|msg| UpstreamMessage {
            role: msg.role.clone(),
            content: msg.flattened_content(),
        })
        .collect();

    CompletionRequest {
        model: model.to_string(),
        messages,
        temperature: req.temperature,
        max_tokens: req.max_tokens,
        stream,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::chat_types::{ChatMessage, ContentPart, MessageContent};
    use std::collections::HashMap;

    fn text_message(role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: Some(MessageContent::Text(content.to_string())),
        }
    }

    #[test]
    fn test_order_and_roles_preserved() {
        let req = ChatRequest {
            messages: vec![
                text_message("system", "You are Bruce."),
                text_message("user", "What is market engineering?"),
                text_message("assistant", "A discipline."),
                text_message("user", "Go on."),
            ],
            temperature: Some(0.7),
            max_tokens: Some(512),
            stream: None,
            extra: HashMap::default(),
        };

        let result = chat_to_completion(&req, "concierge-70b", true);

        assert_eq!(result.model, "concierge-70b");
        assert!(result.stream);
        assert_eq!(result.temperature, Some(0.7));
        assert_eq!(result.max_tokens, Some(512));

        let roles: Vec<&str> = result.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(result.messages[3].content, "Go on.");
    }

    #[test]
    fn test_parts_fold_into_single_string() {
        let req = ChatRequest {
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some(MessageContent::Parts(vec![
                    ContentPart::Text {
                        text: "first ".to_string(),
                    },
                    ContentPart::Unsupported,
                    ContentPart::Text {
                        text: "second".to_string(),
                    },
                ])),
            }],
            temperature: None,
            max_tokens: None,
            stream: None,
            extra: HashMap::default(),
        };

        let result = chat_to_completion(&req, "m", true);
        assert_eq!(result.messages[0].content, "first second");
    }

    #[test]
    fn test_missing_content_becomes_empty_string() {
        let req = ChatRequest {
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: None,
            }],
            temperature: None,
            max_tokens: None,
            stream: None,
            extra: HashMap::default(),
        };

        let result = chat_to_completion(&req, "m", false);
        assert!(!result.stream);
        assert_eq!(result.messages[0].content, "");
    }

    #[test]
    fn test_unknown_role_passes_through() {
        let req = ChatRequest {
            messages: vec![text_message("critic", "hm")],
            temperature: None,
            max_tokens: None,
            stream: None,
            extra: HashMap::default(),
        };

        let result = chat_to_completion(&req, "m", true);
        assert_eq!(result.messages[0].role, "critic");
    }
}
