//! OneBot v11 message segments.
//!
//! Trimmed to the subset the codec actually produces and consumes:
//! `text`, `image`, `record`, `file`, `at`, `face`. `file` shares
//! `record`'s shape — both carry a single `file` URI/path/base64 string —
//! but are kept as distinct variants since they map to distinct MkIX
//! `type`s (`file` vs `audio`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextData {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLikeData {
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtData {
    pub qq: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceData {
    pub id: String,
}

/// A single OneBot v11 message segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Segment {
    Text(TextData),
    Image(FileLikeData),
    Record(FileLikeData),
    File(FileLikeData),
    At(AtData),
    Face(FaceData),
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text(TextData { text: text.into() })
    }

    pub fn image(file: impl Into<String>) -> Self {
        Segment::Image(FileLikeData { file: file.into() })
    }

    pub fn record(file: impl Into<String>) -> Self {
        Segment::Record(FileLikeData { file: file.into() })
    }

    pub fn at(qq: impl Into<String>) -> Self {
        Segment::At(AtData { qq: qq.into() })
    }

    /// Renders the segment into its CQ-code string form.
    pub fn to_cq_code(&self) -> String {
        match self {
            Segment::Text(d) => escape_cq_text(&d.text),
            Segment::Image(d) => format!("[CQ:image,file={}]", escape_cq_value(&d.file)),
            Segment::Record(d) => format!("[CQ:record,file={}]", escape_cq_value(&d.file)),
            Segment::File(d) => format!("[CQ:file,file={}]", escape_cq_value(&d.file)),
            Segment::At(d) => format!("[CQ:at,qq={}]", escape_cq_value(&d.qq)),
            Segment::Face(d) => format!("[CQ:face,id={}]", escape_cq_value(&d.id)),
        }
    }
}

/// Escapes plain text appearing outside of a CQ code: `&`, `[`, `]`.
pub fn escape_cq_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('[', "&#91;")
        .replace(']', "&#93;")
}

/// Escapes a CQ-code parameter value: as above, plus `,`.
pub fn escape_cq_value(value: &str) -> String {
    escape_cq_text(value).replace(',', "&#44;")
}

/// Reverses [`escape_cq_text`]/[`escape_cq_value`].
pub fn unescape_cq_value(value: &str) -> String {
    value
        .replace("&#44;", ",")
        .replace("&#91;", "[")
        .replace("&#93;", "]")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping_round_trips() {
        let original = "a&b[c]d,e";
        let escaped = escape_cq_value(original);
        assert_eq!(unescape_cq_value(&escaped), original);
    }

    #[test]
    fn cq_code_rendering() {
        assert_eq!(Segment::at("42").to_cq_code(), "[CQ:at,qq=42]");
        assert_eq!(
            Segment::image("data:image/png;base64,AA").to_cq_code(),
            "[CQ:image,file=data:image/png;base64&#44;AA]"
        );
    }

    #[test]
    fn array_serialization_shape() {
        let seg = Segment::text("hi");
        let json = serde_json::to_value(&seg).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["data"]["text"], "hi");
    }
}
