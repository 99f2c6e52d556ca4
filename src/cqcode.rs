//! CQ-code codec: MkIX frame ↔ OneBot segment translation.

use base64::Engine;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use crate::config::Config;
use crate::error::{BridgeError, BridgeResult};
use crate::model::mkix::{GroupType, MkIXGetMessage, MkIXMessagePayload, MkIXPostMessage};
use crate::model::segment::{unescape_cq_value, Segment};

fn base64_engine() -> impl Engine {
    base64::engine::general_purpose::STANDARD
}

/// Which kind of chat a serialized message is headed to — governs the
/// `group`/`user` segment in file/record download URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientKind {
    Group,
    Private,
}

/// Serializes one MkIX inbound frame into its OneBot segment list.
/// `file`/`audio` require `config` and `kind` to build a download URL.
pub fn serialize(
    message: &MkIXGetMessage,
    config: &Config,
    kind: RecipientKind,
) -> BridgeResult<Vec<Segment>> {
    let mut segments = Vec::new();

    if let Some(at_list) = message.payload.meta.get("at").and_then(Value::as_array) {
        for at in at_list {
            if let Some(qq) = at.as_str() {
                segments.push(Segment::at(qq));
            }
        }
    }

    match message.kind.as_str() {
        "text" => segments.push(Segment::text(message.payload.content.clone())),
        "image" => segments.push(Segment::image(message.payload.content.clone())),
        "file" | "audio" => {
            let recipient = match kind {
                RecipientKind::Group => "group",
                RecipientKind::Private => "user",
            };
            let url = format!(
                "{}/v1/{}/{}/download/{}",
                config.server_url, recipient, message.group, message.payload.content
            );
            if message.kind == "file" {
                segments.push(Segment::File(crate::model::segment::FileLikeData {
                    file: url,
                }));
            } else {
                segments.push(Segment::record(url));
            }
        }
        other => {
            return Err(BridgeError::Usage(format!(
                "cannot serialize MkIX message type {other} into a CQ segment"
            )))
        }
    }

    Ok(segments)
}

/// Renders a segment list as an inline CQ-code string.
pub fn segments_to_cq_string(segments: &[Segment]) -> String {
    segments.iter().map(Segment::to_cq_code).collect()
}

/// Deserializes an OneBot `message` field (string or segment array) into
/// MkIX post-frames, merging adjacent text frames.
pub async fn deserialize(
    message: &Value,
    auto_escape: bool,
    client: &reqwest::Client,
) -> BridgeResult<Vec<MkIXPostMessage>> {
    let segments = match message {
        Value::String(s) => {
            if auto_escape {
                vec![Segment::text(s.clone())]
            } else {
                parse_cq_string(s)?
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|v| serde_json::from_value::<Segment>(v.clone()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BridgeError::Usage(format!("invalid segment array: {e}")))?,
        other => {
            return Err(BridgeError::Usage(format!(
                "message must be a string or array, got {other}"
            )))
        }
    };

    let mut frames: Vec<MkIXPostMessage> = Vec::new();
    for segment in segments {
        let frame = segment_to_post_message(segment, client).await?;
        push_merging(&mut frames, frame);
    }
    Ok(frames)
}

fn push_merging(frames: &mut Vec<MkIXPostMessage>, frame: MkIXPostMessage) {
    if let Some(last) = frames.last() {
        if last.mergeable_with(&frame) {
            let prev = frames.pop().expect("checked non-empty above");
            frames.push(prev.merge(frame));
            return;
        }
    }
    frames.push(frame);
}

/// Splits a CQ-code string into literal-text and `[CQ:...]` runs, mirroring
/// Python's `re.split(r"(\[.*?])", s)` (non-greedy bracket matching).
fn split_cq_runs(input: &str) -> Vec<&str> {
    let mut runs = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find('[') {
        if start > 0 {
            runs.push(&rest[..start]);
        }
        if let Some(end_rel) = rest[start..].find(']') {
            let end = start + end_rel + 1;
            runs.push(&rest[start..end]);
            rest = &rest[end..];
        } else {
            runs.push(rest);
            rest = "";
            break;
        }
    }
    if !rest.is_empty() {
        runs.push(rest);
    }
    runs
}

fn parse_cq_string(input: &str) -> BridgeResult<Vec<Segment>> {
    let mut segments = Vec::new();
    for run in split_cq_runs(input) {
        if run.is_empty() {
            continue;
        }
        if run.starts_with("[CQ:") && run.ends_with(']') {
            let inner = &run[1..run.len() - 1];
            let mut parts = inner.split(',');
            let func = parts.next().unwrap_or("").trim_start_matches("CQ:");
            let mut params = std::collections::HashMap::new();
            for part in parts {
                if let Some((k, v)) = part.split_once('=') {
                    params.insert(k.to_string(), unescape_cq_value(v));
                }
            }
            segments.push(cq_params_to_segment(func, &params)?);
        } else {
            segments.push(Segment::text(unescape_cq_value(run)));
        }
    }
    Ok(segments)
}

fn cq_params_to_segment(
    func: &str,
    params: &std::collections::HashMap<String, String>,
) -> BridgeResult<Segment> {
    let get = |k: &str| -> BridgeResult<String> {
        params
            .get(k)
            .cloned()
            .ok_or_else(|| BridgeError::Usage(format!("CQ:{func} missing required param {k}")))
    };
    Ok(match func {
        "at" => Segment::at(get("qq")?),
        "text" => Segment::text(get("text")?),
        "image" => Segment::image(get("file")?),
        "file" => Segment::File(crate::model::segment::FileLikeData { file: get("file")? }),
        "record" => Segment::record(get("file")?),
        "audio" => Segment::record(get("file")?),
        "face" => Segment::Face(crate::model::segment::FaceData { id: get("id")? }),
        other => {
            return Err(BridgeError::Usage(format!(
                "unsupported CQ code function: {other}"
            )))
        }
    })
}

async fn segment_to_post_message(
    segment: Segment,
    client: &reqwest::Client,
) -> BridgeResult<MkIXPostMessage> {
    match segment {
        Segment::At(d) => Ok(MkIXPostMessage {
            kind: Some("text".to_string()),
            payload: Some(MkIXMessagePayload::with_meta(
                "at",
                Value::Array(vec![Value::String(d.qq)]),
            )),
            at_derived: true,
            ..Default::default()
        }),
        Segment::Text(d) => Ok(MkIXPostMessage {
            kind: Some("text".to_string()),
            payload: Some(MkIXMessagePayload::with_content(d.text)),
            ..Default::default()
        }),
        Segment::Face(d) => {
            let emoji = face_lookup(&d.id)?;
            Ok(MkIXPostMessage {
                kind: Some("text".to_string()),
                payload: Some(MkIXMessagePayload::with_content(emoji)),
                ..Default::default()
            })
        }
        Segment::Image(d) => {
            let resolved = resolve_file(&d.file, client).await?;
            let mime = resolved.mime.unwrap_or_else(|| "application/octet-stream".to_string());
            let data_uri = format!(
                "data:{mime};base64,{}",
                base64_engine().encode(&resolved.bytes)
            );
            Ok(MkIXPostMessage {
                kind: Some("image".to_string()),
                payload: Some(MkIXMessagePayload::with_content(data_uri)),
                ..Default::default()
            })
        }
        Segment::File(d) => {
            let resolved = resolve_file(&d.file, client).await?;
            let mut frame = MkIXPostMessage {
                kind: Some("file".to_string()),
                ..Default::default()
            };
            frame.raw_bytes = Some(resolved.bytes);
            Ok(frame)
        }
        Segment::Record(d) => {
            let resolved = resolve_file(&d.file, client).await?;
            let mut frame = MkIXPostMessage {
                kind: Some("audio".to_string()),
                ..Default::default()
            };
            frame.raw_bytes = Some(resolved.bytes);
            Ok(frame)
        }
    }
}

struct ResolvedFile {
    bytes: Vec<u8>,
    mime: Option<String>,
}

fn extract_scheme(file: &str) -> Option<&str> {
    file.find("://").map(|idx| &file[..idx])
}

/// Resolves `base64://`, `file:`/schemeless, and `http[s]://` file
/// references.
async fn resolve_file(file: &str, client: &reqwest::Client) -> BridgeResult<ResolvedFile> {
    if let Some(rest) = file.strip_prefix("base64://") {
        let bytes = base64_engine()
            .decode(rest)
            .map_err(|e| BridgeError::Usage(format!("invalid base64 payload: {e}")))?;
        return Ok(ResolvedFile {
            bytes,
            mime: Some("application/octet-stream".to_string()),
        });
    }

    match extract_scheme(file) {
        Some("http") | Some("https") => {
            let resp = client
                .get(file)
                .send()
                .await
                .map_err(|e| BridgeError::NotFound(format!("{file}: {e}")))?;
            if !resp.status().is_success() {
                return Err(BridgeError::NotFound(file.to_string()));
            }
            let mime = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| BridgeError::Io(std::io::Error::other(e)))?
                .to_vec();
            Ok(ResolvedFile { bytes, mime })
        }
        Some("file") | None => {
            let path = file.strip_prefix("file://").unwrap_or(file);
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    let mime = mime_guess::from_path(path).first().map(|m| m.to_string());
                    Ok(ResolvedFile { bytes, mime })
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(BridgeError::NotFound(path.to_string()))
                }
                Err(e) => Err(BridgeError::Io(e)),
            }
        }
        Some(other) => Err(BridgeError::Usage(format!(
            "unsupported file scheme: {other}"
        ))),
    }
}

/// Fixed 23×10 legacy face-id → emoji table. Blank cells are legacy ids
/// with no modern mapping and raise
/// `usage_error`, same as an out-of-range id.
const FACE_TABLE: [[&str; 10]; 23] = [
    ["😲", "😖", "🥰", "🥲", "😎", "😭", "😊", "🤐", "😪", "😢"],
    ["😡", "🤬", "😛", "😁", "😊", "😣", "😎", " ", "😫", "🤮"],
    ["🫢", "😊", "😶", "😕", "😜", "🥱", "😰", "😅", "😀", "🤠"],
    ["🤓", "🤪", "🤔", "🤫", "😵", "😵", "🥶", "💀", "😰", "🤗"],
    [" ", "🫨", "💓", "🤣", " ", " ", "🐷", " ", " ", "🤗"],
    [" ", " ", " ", "🎂", "⚡", "💣", "🔪", "⚽", " ", "💩"],
    ["☕", "🍚", "💊", "🌹", "🥀", " ", "❤️", "💔", " ", "🎁"],
    [" ", " ", "✉️", " ", "☀️", "🌙", "👍", "👎", "🤝", "✌️"],
    [" ", " ", " ", " ", " ", "😘", "🤪", " ", " ", "🍉"],
    ["🌧️", "☁️", " ", " ", " ", " ", "😥", "😓", "🙄", "👏"],
    ["😥", "😁", "😏", "😏", "🫢", "👎", "😔", "😔", "😅", "😘"],
    ["😲", "🥹", "🔪", "🍺", "🏀", "🏓", "👄", "🐞", "👍", "🫵"],
    ["✊", "👆", "🤘", "👆", "👌", "😉", "☺️", "😏", "🙂", "👋"],
    ["😂", "😮", "🫢", "🙂", "🙂", " ", "❤️", "🧨", "🏮", "🤑"],
    ["🎤", "💼", "✉️", "🔴", "💐", "🕯️", "💢", "🍭", "🍼", "🍜"],
    ["🍌", "✈️", "🚙", "🚅", "🚅", "🚅", "☁️", "🌧️", "💵", "🐼"],
    ["💡", "🪁", "⏰", "☂️", "🎈", "💍", "🛋️", "🧻", "💊", "🔫"],
    ["🐸", "🍵", "😜", "😢", "😛", "😝", "😌", "😡", "😊", "😗"],
    ["😲", "🥺", "😂", "😝", "🦀", "🦙", "🌰", "👻", "🥚", "📱"],
    ["🏵️", "🧼", "🧧", "🤤", "😕", " ", " ", "🙄", "🫢", "👏"],
    ["🙏", "👍", "😊", "😛", "😯", "🌹", "😅", "🥰", "😡", " "],
    ["😂", "🫣", "😐", "😘", "💩", "👊", "😐", "😛", "🥳", "🥸"],
    ["👍", " ", " ", " ", " ", " ", " ", " ", " ", " "],
];

fn face_lookup(id: &str) -> BridgeResult<&'static str> {
    let id: u32 = id
        .parse()
        .map_err(|_| BridgeError::Usage(format!("invalid face id: {id}")))?;
    let row = (id / 10) as usize;
    let col = (id % 10) as usize;
    let emoji = FACE_TABLE
        .get(row)
        .map(|r| r[col])
        .filter(|e| *e != " ")
        .ok_or_else(|| BridgeError::Usage(format!("invalid face_id: {id}")))?;
    Ok(emoji)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_table_is_total_over_valid_range() {
        for id in 0..230u32 {
            let row = (id / 10) as usize;
            let col = (id % 10) as usize;
            if FACE_TABLE[row][col] != " " {
                assert!(face_lookup(&id.to_string()).is_ok());
            }
        }
        assert!(face_lookup("230").is_err());
        assert!(face_lookup("9999").is_err());
    }

    #[test]
    fn blank_face_cells_are_usage_errors() {
        // row 4, col 0 is blank in the table.
        assert!(face_lookup("40").is_err());
    }

    #[test]
    fn split_cq_runs_separates_text_and_codes() {
        let runs = split_cq_runs("hello [CQ:at,qq=1] world");
        assert_eq!(runs, vec!["hello ", "[CQ:at,qq=1]", " world"]);
    }

    #[test]
    fn parse_cq_string_merges_adjacent_text_only_via_push_merging() {
        let segments = parse_cq_string("hello [CQ:at,qq=1] world").unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::text("hello "));
        assert_eq!(segments[1], Segment::at("1"));
        assert_eq!(segments[2], Segment::text(" world"));
    }

    #[tokio::test]
    async fn text_merge_law_adjacent_text_runs_merge_into_one_frame() {
        let client = reqwest::Client::new();
        let frames = deserialize(&Value::String("ab".to_string() + "cd"), false, &client)
            .await
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref().unwrap().content, "abcd");
    }

    #[tokio::test]
    async fn auto_escape_treats_whole_string_as_literal_text() {
        let client = reqwest::Client::new();
        let input = Value::String("hi[CQ:at,qq=42]!".to_string());
        let frames = deserialize(&input, true, &client).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].payload.as_ref().unwrap().content,
            "hi[CQ:at,qq=42]!"
        );
    }

    #[tokio::test]
    async fn at_segment_splits_surrounding_text_without_merging_across_it() {
        let client = reqwest::Client::new();
        let input = Value::String("hi[CQ:at,qq=42]!".to_string());
        let frames = deserialize(&input, false, &client).await.unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload.as_ref().unwrap().content, "hi");
        assert_eq!(frames[2].payload.as_ref().unwrap().content, "!");
    }
}
