use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

// ─── Content part types ───────────────────────────────────────────────────────

/// A single content part in a message.
///
/// Images are always represented as data URLs (`data:<mime>;base64,<b64>`)
/// or HTTPS URLs for providers that accept remote references.  `Think` parts
/// carry chain-of-thought text streamed by reasoning models; the optional
/// signature is an opaque provider token that must round-trip unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    Think {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self::ImageUrl {
            url: url.into(),
            media_type: None,
        }
    }

    pub fn think(text: impl Into<String>) -> Self {
        Self::Think {
            text: text.into(),
            signature: None,
        }
    }
}

/// One tool invocation requested by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    /// Opaque identifier assigned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object
    pub arguments: String,
}

// ─── Message ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in the conversation history.
///
/// Assistant messages may carry `tool_calls`; tool-role messages carry the
/// `tool_call_id` of the call they answer and nothing else links them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "new_message_id")]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            id: new_message_id(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::text(text)])
    }

    /// Construct a tool-role message answering `tool_call_id`.
    pub fn tool(tool_call_id: impl Into<String>, content: Vec<ContentPart>) -> Self {
        Self {
            id: new_message_id(),
            role: Role::Tool,
            content,
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallRequest>) -> Self {
        self.tool_calls = calls;
        self
    }

    /// The plain text of this message, if it is exactly one text part.
    pub fn as_text(&self) -> Option<&str> {
        match self.content.as_slice() {
            [ContentPart::Text { text }] => Some(text),
            _ => None,
        }
    }

    /// All text parts joined with `sep`.  Think parts and images are skipped.
    pub fn extract_text(&self, sep: &str) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(sep)
    }

    /// Approximate token count used for context management.
    ///
    /// Uses a 4-chars-per-token heuristic for text; images use a fixed
    /// conservative estimate of 765 tokens (a 512×512 tile).
    pub fn approx_tokens(&self) -> usize {
        let mut chars: usize = self
            .content
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.len(),
                ContentPart::Think { text, .. } => text.len(),
                ContentPart::ImageUrl { .. } => 765 * 4,
            })
            .sum();
        chars += self
            .tool_calls
            .iter()
            .map(|tc| tc.name.len() + tc.arguments.len())
            .sum::<usize>();
        (chars / 4).max(1)
    }
}

// ─── Capabilities ─────────────────────────────────────────────────────────────

/// A model feature a message may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Think,
    Image,
    ToolCallStreaming,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Capability::Think => "think",
            Capability::Image => "image",
            Capability::ToolCallStreaming => "tool_call_streaming",
        };
        write!(f, "{s}")
    }
}

/// Return the capabilities `msg` requires but `caps` does not provide.
///
/// The result is ordered so callers can produce a stable diagnostic.
pub fn check_message(msg: &Message, caps: &HashSet<Capability>) -> BTreeSet<Capability> {
    let mut missing = BTreeSet::new();
    for part in &msg.content {
        let needed = match part {
            ContentPart::Text { .. } => continue,
            ContentPart::ImageUrl { .. } => Capability::Image,
            ContentPart::Think { .. } => Capability::Think,
        };
        if !caps.contains(&needed) {
            missing.insert(needed);
        }
    }
    missing
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.as_text(), Some("hello"));
    }

    #[test]
    fn messages_get_unique_ids() {
        assert_ne!(Message::user("a").id, Message::user("a").id);
    }

    #[test]
    fn tool_message_carries_call_id() {
        let m = Message::tool("call-1", vec![ContentPart::text("out")]);
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn as_text_none_for_multi_part() {
        let m = Message::new(
            Role::User,
            vec![ContentPart::text("a"), ContentPart::image("data:image/png;base64,X")],
        );
        assert!(m.as_text().is_none());
        assert_eq!(m.extract_text(" "), "a");
    }

    #[test]
    fn approx_tokens_text_divides_by_four() {
        assert_eq!(Message::user("12345678").approx_tokens(), 2);
    }

    #[test]
    fn approx_tokens_minimum_is_one() {
        assert_eq!(Message::user("hi").approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_counts_tool_calls() {
        let m = Message::assistant("").with_tool_calls(vec![ToolCallRequest {
            id: "id".into(),
            name: "aaaa".into(),
            arguments: "bbbbbbbb".into(),
        }]);
        // 4 + 8 = 12 chars of call payload → 3 tokens
        assert_eq!(m.approx_tokens(), 3);
    }

    #[test]
    fn approx_tokens_image_uses_fixed_estimate() {
        let m = Message::new(Role::User, vec![ContentPart::image("data:image/png;base64,A")]);
        assert_eq!(m.approx_tokens(), 765);
    }

    #[test]
    fn check_message_flags_missing_image_capability() {
        let m = Message::new(Role::User, vec![ContentPart::image("u")]);
        let missing = check_message(&m, &HashSet::new());
        assert!(missing.contains(&Capability::Image));
    }

    #[test]
    fn check_message_empty_when_supported() {
        let m = Message::new(Role::User, vec![ContentPart::image("u")]);
        let caps: HashSet<Capability> = [Capability::Image].into_iter().collect();
        assert!(check_message(&m, &caps).is_empty());
    }

    #[test]
    fn check_message_text_needs_nothing() {
        let m = Message::user("plain");
        assert!(check_message(&m, &HashSet::new()).is_empty());
    }

    #[test]
    fn message_serialises_and_deserialises() {
        let original = Message::user("test payload");
        let json = serde_json::to_string(&original).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.role, Role::User);
        assert_eq!(decoded.as_text(), Some("test payload"));
        assert_eq!(decoded.id, original.id);
    }

    #[test]
    fn empty_tool_calls_not_serialised() {
        let json = serde_json::to_string(&Message::user("x")).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
    }

    #[test]
    fn think_part_round_trips_with_signature() {
        let p = ContentPart::Think {
            text: "reasoning".into(),
            signature: Some("sig".into()),
        };
        let json = serde_json::to_string(&p).unwrap();
        let back: ContentPart = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
