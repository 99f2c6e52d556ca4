//! Action dispatcher: runs a parsed `Action` against the MkIX HTTP client
//! and message pipeline, producing an OneBot action reply.

use serde_json::{json, Value};

use crate::config::Config;
use crate::cqcode;
use crate::error::{BridgeError, BridgeResult};
use crate::http_client::HttpClient;
use crate::memo::{MessageMemo, RequestMemo, RequestTarget};
use crate::model::action::{Action, ActionReply};
use crate::model::mkix::{GroupType, MkIXMessagePayload, MkIXPostMessage};
use crate::profile::SharedProfile;

fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Flattens `messages[*].data.content` into a single segment array,
/// discarding the nested-forward-node wrapper.
fn flatten_forward(messages: &Value) -> Value {
    let mut combined = Vec::new();
    if let Some(items) = messages.as_array() {
        for item in items {
            match item.get("data").and_then(|d| d.get("content")) {
                Some(Value::Array(segments)) => combined.extend(segments.clone()),
                Some(Value::String(text)) => {
                    combined.push(json!({ "type": "text", "data": { "text": text } }));
                }
                _ => {}
            }
        }
    }
    Value::Array(combined)
}

/// Parses `action_name`/`params` and runs it, producing the OneBot reply
/// envelope. Never panics: every failure becomes a `failed` reply.
pub async fn dispatch(
    action_name: &str,
    params: Value,
    echo: Value,
    config: &Config,
    http: &HttpClient,
    profile: &SharedProfile,
    memo: &MessageMemo,
    requests: &RequestMemo,
    client: &reqwest::Client,
) -> ActionReply {
    let action = match Action::parse(action_name, params) {
        Ok(a) => a,
        Err(e) => return ActionReply::failed(e.to_string(), e.retcode(), echo),
    };

    match run(action, config, http, profile, memo, requests, client).await {
        Ok(data) => ActionReply::ok(data, echo),
        Err(e) => ActionReply::failed(e.to_string(), e.retcode(), echo),
    }
}

async fn run(
    action: Action,
    config: &Config,
    http: &HttpClient,
    profile: &SharedProfile,
    memo: &MessageMemo,
    requests: &RequestMemo,
    client: &reqwest::Client,
) -> BridgeResult<Value> {
    match action {
        Action::SendPrivateMsg(p) => {
            let frames = cqcode::deserialize(&p.message, p.auto_escape, client).await?;
            let message_id = memo
                .post_messages(coerce(&p.user_id), GroupType::Friend, frames)
                .await?;
            Ok(json!({ "message_id": message_id }))
        }
        Action::SendGroupMsg(p) => {
            let frames = cqcode::deserialize(&p.message, p.auto_escape, client).await?;
            let message_id = memo
                .post_messages(coerce(&p.group_id), GroupType::Group, frames)
                .await?;
            Ok(json!({ "message_id": message_id }))
        }
        Action::SendMsg(p) => {
            let frames = cqcode::deserialize(&p.message, p.auto_escape, client).await?;
            let (target, group_type) = resolve_send_msg_target(&p)?;
            let message_id = memo.post_messages(target, group_type, frames).await?;
            Ok(json!({ "message_id": message_id }))
        }
        Action::SendGroupForwardMsg(p) => {
            let flattened = flatten_forward(&p.messages);
            let frames = cqcode::deserialize(&flattened, false, client).await?;
            let group_id = p
                .group_id
                .as_ref()
                .map(coerce)
                .ok_or_else(|| BridgeError::Usage("send_group_forward_msg requires group_id".into()))?;
            let message_id = memo.post_messages(group_id, GroupType::Group, frames).await?;
            Ok(json!({ "message_id": message_id }))
        }
        Action::SendPrivateForwardMsg(p) => {
            let flattened = flatten_forward(&p.messages);
            let frames = cqcode::deserialize(&flattened, false, client).await?;
            let user_id = p
                .user_id
                .as_ref()
                .map(coerce)
                .ok_or_else(|| BridgeError::Usage("send_private_forward_msg requires user_id".into()))?;
            let message_id = memo.post_messages(user_id, GroupType::Friend, frames).await?;
            Ok(json!({ "message_id": message_id }))
        }
        Action::DeleteMsg(p) => {
            let (group, group_type, frame) = memo
                .get_storage(&p.message_id)
                .ok_or_else(|| BridgeError::NotFound(p.message_id.clone()))?;
            let revoke = MkIXPostMessage {
                kind: Some("revokeRequest".to_string()),
                group: Some(group),
                group_type,
                payload: Some(MkIXMessagePayload::with_meta(
                    "time",
                    Value::String(frame.time),
                )),
                ..Default::default()
            };
            memo.post_messages(revoke.group.clone().unwrap_or_default(), revoke.group_type, vec![revoke])
                .await?;
            Ok(json!({}))
        }
        Action::SetGroupKick(p) => {
            http.group_kick(&p.group_id, &p.user_id).await?;
            Ok(json!({}))
        }
        Action::SetGroupBan(p) => {
            http.group_ban(&p.group_id, &p.user_id, p.duration).await?;
            Ok(json!({}))
        }
        Action::SetGroupAdmin(p) => {
            http.group_admin(&p.group_id, &p.user_id, p.enable).await?;
            Ok(json!({}))
        }
        Action::SetGroupName(p) => {
            http.group_name(&p.group_id, &p.group_name).await?;
            Ok(json!({}))
        }
        Action::SetGroupLeave(p) => {
            http.group_leave(&p.group_id, p.is_dismiss).await?;
            Ok(json!({}))
        }
        Action::SetFriendAddRequest(p) => {
            let target = requests
                .take(&p.flag)
                .ok_or_else(|| BridgeError::Usage(format!("unknown request flag: {}", p.flag)))?;
            let user_id = match target {
                RequestTarget::Friend { user_id } => user_id,
                RequestTarget::Group { .. } => {
                    return Err(BridgeError::Usage(format!("{} is not a friend request", p.flag)))
                }
            };
            http.friend_add_request(&user_id, &p.flag, p.approve).await?;
            if p.approve {
                profile.lock().friends.insert(user_id);
            }
            Ok(json!({}))
        }
        Action::SetGroupAddRequest(p) => {
            let target = requests
                .take(&p.flag)
                .ok_or_else(|| BridgeError::Usage(format!("unknown request flag: {}", p.flag)))?;
            let group_id = match target {
                RequestTarget::Group { group_id, .. } => group_id,
                RequestTarget::Friend { .. } => {
                    return Err(BridgeError::Usage(format!("{} is not a group request", p.flag)))
                }
            };
            http.group_add_request(&group_id, &p.flag, p.approve).await?;
            if p.approve {
                profile.lock().groups.insert(group_id);
            }
            Ok(json!({}))
        }
        Action::GetLoginInfo => http.login_info().await,
        Action::GetStrangerInfo(p) => http.stranger_info(&p.user_id).await,
        Action::GetFriendList => http.friend_list().await,
        Action::GetGroupInfo(p) => http.group_info(&p.group_id).await,
        Action::GetGroupList => http.group_list().await,
        Action::GetGroupMemberInfo(p) => http.group_member_info(&p.group_id, &p.user_id).await,
        Action::GetGroupMemberList(p) => http.group_member_list(&p.group_id).await,
        Action::GetRecord(p) => fetch_media(http, &p.file).await,
        Action::GetImage(p) => fetch_media(http, &p.file).await,
        Action::GetStatus => Ok(http.status(true).await),
        Action::GetVersionInfo => Ok(http.version_info().await),
    }
}

fn resolve_send_msg_target(p: &crate::model::action::SendMsgParams) -> BridgeResult<(String, GroupType)> {
    match p.message_type.as_deref() {
        Some("group") => {
            let group_id = p
                .group_id
                .as_ref()
                .ok_or_else(|| BridgeError::Usage("send_msg with message_type group requires group_id".into()))?;
            Ok((coerce(group_id), GroupType::Group))
        }
        Some("private") => {
            let user_id = p
                .user_id
                .as_ref()
                .ok_or_else(|| BridgeError::Usage("send_msg with message_type private requires user_id".into()))?;
            Ok((coerce(user_id), GroupType::Friend))
        }
        _ => {
            if let Some(group_id) = &p.group_id {
                Ok((coerce(group_id), GroupType::Group))
            } else if let Some(user_id) = &p.user_id {
                Ok((coerce(user_id), GroupType::Friend))
            } else {
                Err(BridgeError::Usage(
                    "send_msg requires group_id or user_id".to_string(),
                ))
            }
        }
    }
}

async fn fetch_media(http: &HttpClient, file: &str) -> BridgeResult<Value> {
    let bytes = http.get_file(file).await?;
    let path = std::env::temp_dir().join(format!("mkxi-bridge-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(BridgeError::Io)?;
    Ok(json!({ "file": path.to_string_lossy() }))
}
