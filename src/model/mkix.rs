//! MkIX wire frames: inbound chat/system frames and outbound post frames.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The free-form payload body carried by every MkIX frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MkIXMessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
}

impl MkIXMessagePayload {
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_meta(key: &str, value: Value) -> Self {
        let mut meta = HashMap::new();
        meta.insert(key.to_string(), value);
        Self {
            meta,
            ..Default::default()
        }
    }

    /// Payload-union operator: meta lists concatenate, content
    /// concatenates, scalar fields favour the first non-empty value.
    pub fn merge(self, other: MkIXMessagePayload) -> MkIXMessagePayload {
        let mut meta = self.meta;
        for (k, v) in other.meta {
            meta.entry(k)
                .and_modify(|existing| {
                    if let (Some(a), Some(b)) = (existing.as_array(), v.as_array()) {
                        let mut combined = a.clone();
                        combined.extend(b.clone());
                        *existing = Value::Array(combined);
                    }
                })
                .or_insert(v);
        }
        MkIXMessagePayload {
            name: self.name.or(other.name),
            size: self.size.or(other.size),
            content: self.content + &other.content,
            meta,
        }
    }
}

/// An inbound chat frame from the MkIX link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MkIXGetMessage {
    pub time: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub group: String,
    #[serde(rename = "isSystemMessage")]
    pub is_system_message: bool,
    #[serde(rename = "senderID")]
    pub sender_id: String,
    pub payload: MkIXMessagePayload,
}

/// An inbound system frame from the MkIX link (echoes, notices, requests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MkIXSystemMessage {
    pub time: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "subType", skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(rename = "targetKey", skip_serializing_if = "Option::is_none")]
    pub target_key: Option<String>,
    #[serde(rename = "isSystemMessage", default = "default_true")]
    pub is_system_message: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(rename = "senderID", skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(rename = "senderKey", skip_serializing_if = "Option::is_none")]
    pub sender_key: Option<String>,
    pub payload: String,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
}

fn default_true() -> bool {
    true
}

/// Which recipient kind an outbound frame targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    Group,
    Friend,
    #[default]
    #[serde(rename = "")]
    Empty,
}

/// An outbound frame headed for the MkIX link.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MkIXPostMessage {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, rename = "groupType")]
    pub group_type: GroupType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<MkIXMessagePayload>,
    /// Raw bytes for `file`/`audio` frames awaiting a `PostFile` upload.
    /// Never part of the wire frame — those types bypass the WS echo path
    /// entirely.
    #[serde(skip)]
    pub raw_bytes: Option<Vec<u8>>,
    /// Set on `at`-derived frames, which are wire `type: "text"` but must
    /// never merge with a genuine adjacent text frame. Never serialized.
    #[serde(skip)]
    pub at_derived: bool,
}

impl MkIXPostMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: Some("text".to_string()),
            payload: Some(MkIXMessagePayload::with_content(content)),
            ..Default::default()
        }
    }

    /// Payload-union operator lifted to whole frames: used to
    /// collapse adjacent text segments produced by the CQ-code codec.
    pub fn merge(self, other: MkIXPostMessage) -> MkIXPostMessage {
        let payload = match (self.payload, other.payload) {
            (Some(a), Some(b)) => Some(a.merge(b)),
            (a, b) => a.or(b),
        };
        MkIXPostMessage {
            kind: self.kind.or(other.kind),
            echo: None,
            group: self.group.or(other.group),
            group_type: if self.group_type == GroupType::Empty {
                other.group_type
            } else {
                self.group_type
            },
            payload,
            raw_bytes: self.raw_bytes.or(other.raw_bytes),
            at_derived: self.at_derived || other.at_derived,
        }
    }

    /// Whether this frame can be merged with `other` (both `text` kind,
    /// neither one an `at`-derived frame — an `at` segment shares the wire
    /// `type: "text"` with real text but must never merge into it).
    pub fn mergeable_with(&self, other: &MkIXPostMessage) -> bool {
        self.kind.as_deref() == Some("text")
            && other.kind.as_deref() == Some("text")
            && !self.at_derived
            && !other.at_derived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_concatenates_content_and_unions_meta() {
        let a = MkIXMessagePayload::with_content("hello ");
        let mut b = MkIXMessagePayload::with_content("world");
        b.meta.insert(
            "at".to_string(),
            Value::Array(vec![Value::String("42".to_string())]),
        );
        let merged = a.merge(b);
        assert_eq!(merged.content, "hello world");
        assert_eq!(
            merged.meta.get("at").unwrap(),
            &Value::Array(vec![Value::String("42".to_string())])
        );
    }

    #[test]
    fn post_message_merge_favours_first_non_empty_scalar() {
        let a = MkIXPostMessage {
            kind: Some("text".to_string()),
            group: None,
            ..Default::default()
        };
        let b = MkIXPostMessage {
            group: Some("g1".to_string()),
            ..Default::default()
        };
        let merged = a.merge(b);
        assert_eq!(merged.kind.as_deref(), Some("text"));
        assert_eq!(merged.group.as_deref(), Some("g1"));
    }
}
