//! Event classifier: MkIX inbound frame + `MyProfile` → typed OneBot
//! event, or `None` when the frame is dropped.

use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::cqcode::{self, RecipientKind};
use crate::memo::{MessageMemo, RequestMemo, RequestTarget};
use crate::model::event::*;
use crate::model::mkix::{GroupType, MkIXGetMessage, MkIXSystemMessage};
use crate::profile::SharedProfile;

/// Classifies one inbound MkIX frame. Returns `None` when the frame is
/// dropped: malformed, from before `launch_time`, or self-authored.
pub fn classify(
    raw: &Value,
    launch_time: i64,
    config: &Config,
    profile: &SharedProfile,
    memo: &MessageMemo,
    requests: &RequestMemo,
) -> Option<OutboundEvent> {
    let is_system = raw.get("isSystemMessage").and_then(Value::as_bool).unwrap_or(false);
    let time: i64 = raw
        .get("time")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    if time < launch_time {
        return None;
    }

    if is_system {
        let frame: MkIXSystemMessage = match serde_json::from_value(raw.clone()) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "dropping unparsable system frame");
                return None;
            }
        };
        classify_system(frame, config, profile, requests)
    } else {
        let frame: MkIXGetMessage = match serde_json::from_value(raw.clone()) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "dropping unparsable chat frame");
                return None;
            }
        };
        if profile.lock().is_self(&frame.sender_id) {
            return None;
        }
        classify_chat(frame, config, profile, memo)
    }
}

/// Dispatches a non-system `MkIXGetMessage` on `frame.kind`: `"system"`
/// carries group membership/admin/ban notices, `"file"`/`"revoke"` carry
/// upload/recall notices, anything else is an ordinary chat message.
fn classify_chat(
    mut frame: MkIXGetMessage,
    config: &Config,
    profile: &SharedProfile,
    memo: &MessageMemo,
) -> Option<OutboundEvent> {
    if let Some(key) = config.encrypt.get(&frame.group) {
        if let Some(iv_hex) = frame.payload.meta.get("iv").and_then(Value::as_str) {
            match crate::memo::decrypt(key.as_bytes(), iv_hex, &frame.payload.content) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => frame.payload.content = text,
                    Err(e) => {
                        warn!(error = %e, "dropping message with non-UTF8 decrypted body");
                        return None;
                    }
                },
                Err(e) => {
                    warn!(error = %e, "dropping message that failed to decrypt");
                    return None;
                }
            }
        }
    }

    let self_id = config.account.clone();
    let is_group = profile.lock().groups.contains(&frame.group);

    match frame.kind.as_str() {
        "system" => {
            // Group-membership/admin/ban notices only make sense in a
            // group chat; system frames arriving in a private chat are
            // dropped.
            if is_group {
                classify_group_system(&frame, profile, &self_id)
            } else {
                None
            }
        }
        // Private uploads reuse the group-upload event shape too, which
        // does not match OneBot v11 strictly but matches this bridge's
        // observed behavior.
        "file" => Some(group_file_upload_event(&frame, &self_id)),
        "revoke" => Some(if is_group {
            group_recall_event(&frame, &self_id)
        } else {
            friend_recall_event(&frame, &self_id)
        }),
        _ => classify_message(frame, config, memo, is_group, &self_id),
    }
}

fn classify_message(
    frame: MkIXGetMessage,
    config: &Config,
    memo: &MessageMemo,
    is_group: bool,
    self_id: &str,
) -> Option<OutboundEvent> {
    let kind = if is_group {
        RecipientKind::Group
    } else {
        RecipientKind::Private
    };

    let segments = match cqcode::serialize(&frame, config, kind) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "dropping message the codec could not serialize");
            return None;
        }
    };
    let raw_message = cqcode::segments_to_cq_string(&segments);
    let group_type = if is_group { GroupType::Group } else { GroupType::Friend };
    let message_id = memo.receive_chat(frame.group.clone(), group_type, frame.clone());
    let sender = Sender {
        user_id: frame.sender_id.clone(),
    };

    if is_group {
        Some(OutboundEvent::GroupMessage(GroupMessageEvent {
            time: frame.time.parse().unwrap_or(0),
            self_id: self_id.to_string(),
            post_type: "message",
            message_type: "group",
            sub_type: "normal",
            message_id,
            group_id: frame.group,
            user_id: frame.sender_id,
            anonymous: None,
            message: segments,
            raw_message,
            message_format: "array",
            font: 0,
            sender,
        }))
    } else {
        Some(OutboundEvent::PrivateMessage(PrivateMessageEvent {
            time: frame.time.parse().unwrap_or(0),
            self_id: self_id.to_string(),
            post_type: "message",
            message_type: "private",
            sub_type: "friend",
            message_id,
            user_id: frame.sender_id,
            message: segments,
            raw_message,
            message_format: "array",
            font: 0,
            sender,
        }))
    }
}

/// Handles a group chat frame of `type="system"`, dispatching on
/// `payload.meta.operation`. Mutates `profile.groups` on self-join/leave.
fn classify_group_system(
    frame: &MkIXGetMessage,
    profile: &SharedProfile,
    self_id: &str,
) -> Option<OutboundEvent> {
    let time: i64 = frame.time.parse().unwrap_or(0);
    let operation = frame
        .payload
        .meta
        .get("operation")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let operator_id = frame.sender_id.clone();
    let group_id = frame.group.clone();
    let affected_user = frame
        .payload
        .meta
        .get("user_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| operator_id.clone());

    match operation {
        "group_increase" => {
            let sub_type = frame
                .payload
                .meta
                .get("sub_type")
                .and_then(Value::as_str)
                .unwrap_or("approve");
            if profile.lock().uuid == affected_user {
                profile.lock().groups.insert(group_id.clone());
            }
            Some(OutboundEvent::GroupIncrease(GroupIncreaseEvent {
                time,
                self_id: self_id.to_string(),
                post_type: "notice",
                notice_type: "group_increase",
                sub_type: if sub_type == "invite" { "invite" } else { "approve" },
                group_id,
                operator_id,
                user_id: affected_user,
            }))
        }
        "group_decrease" => {
            let sub_type = match frame.payload.meta.get("sub_type").and_then(Value::as_str) {
                Some("kick") => "kick",
                Some("kick_me") => "kick_me",
                _ => "leave",
            };
            if profile.lock().uuid == affected_user {
                profile.lock().groups.remove(&group_id);
            }
            Some(OutboundEvent::GroupDecrease(GroupDecreaseEvent {
                time,
                self_id: self_id.to_string(),
                post_type: "notice",
                notice_type: "group_decrease",
                sub_type,
                group_id,
                operator_id,
                user_id: affected_user,
            }))
        }
        "group_ban" => {
            let sub_type = match frame.payload.meta.get("sub_type").and_then(Value::as_str) {
                Some("lift_ban") => "lift_ban",
                _ => "ban",
            };
            let duration = frame.payload.meta.get("duration").and_then(Value::as_i64).unwrap_or(0);
            Some(OutboundEvent::GroupBan(GroupBanEvent {
                time,
                self_id: self_id.to_string(),
                post_type: "notice",
                notice_type: "group_ban",
                sub_type,
                group_id,
                operator_id,
                user_id: affected_user,
                duration,
            }))
        }
        other => {
            warn!(operation = other, "dropping unrecognized group system operation");
            None
        }
    }
}

fn group_file_upload_event(frame: &MkIXGetMessage, self_id: &str) -> OutboundEvent {
    OutboundEvent::GroupFileUpload(GroupFileUploadEvent {
        time: frame.time.parse().unwrap_or(0),
        self_id: self_id.to_string(),
        post_type: "notice",
        notice_type: "group_upload",
        group_id: frame.group.clone(),
        user_id: frame.sender_id.clone(),
        file: uploaded_file(frame),
    })
}

fn uploaded_file(frame: &MkIXGetMessage) -> UploadedFile {
    UploadedFile {
        id: frame
            .payload
            .meta
            .get("file_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        name: frame
            .payload
            .meta
            .get("file_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        size: frame.payload.meta.get("file_size").and_then(Value::as_u64),
        busid: 0,
    }
}

fn recalled_message_id(frame: &MkIXGetMessage) -> String {
    frame
        .payload
        .meta
        .get("message_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn group_recall_event(frame: &MkIXGetMessage, self_id: &str) -> OutboundEvent {
    OutboundEvent::GroupRecall(GroupRecallEvent {
        time: frame.time.parse().unwrap_or(0),
        self_id: self_id.to_string(),
        post_type: "notice",
        notice_type: "group_recall",
        group_id: frame.group.clone(),
        user_id: frame.sender_id.clone(),
        operator_id: frame.sender_id.clone(),
        message_id: recalled_message_id(frame),
    })
}

fn friend_recall_event(frame: &MkIXGetMessage, self_id: &str) -> OutboundEvent {
    OutboundEvent::FriendRecall(FriendRecallEvent {
        time: frame.time.parse().unwrap_or(0),
        self_id: self_id.to_string(),
        post_type: "notice",
        notice_type: "friend_recall",
        user_id: frame.sender_id.clone(),
        message_id: recalled_message_id(frame),
    })
}

/// Dispatches an `MkIXSystemMessage` on `type`: `echo` is consumed by the
/// pipeline before reaching here, `notice` carries admin/friend-accept
/// events keyed by `meta.operation`, and `join`/`friend` in the waiting
/// state become pending requests.
fn classify_system(
    frame: MkIXSystemMessage,
    config: &Config,
    profile: &SharedProfile,
    requests: &RequestMemo,
) -> Option<OutboundEvent> {
    let time: i64 = frame.time.parse().unwrap_or(0);
    let self_id = config.account.clone();
    let sender_id = frame.sender_id.clone().unwrap_or_default();

    match frame.kind.as_str() {
        "echo" => None,
        "notice" => {
            let operation = frame.meta.get("operation").and_then(Value::as_str).unwrap_or_default();
            match operation {
                "friend_request_accepted" => {
                    profile.lock().friends.insert(sender_id.clone());
                    Some(OutboundEvent::FriendAdd(FriendAddEvent {
                        time,
                        self_id,
                        post_type: "notice",
                        notice_type: "friend_add",
                        user_id: sender_id,
                    }))
                }
                "group_admin_set" | "group_admin_unset" => Some(OutboundEvent::GroupAdmin(GroupAdminEvent {
                    time,
                    self_id,
                    post_type: "notice",
                    notice_type: "group_admin",
                    sub_type: if operation == "group_admin_set" { "set" } else { "unset" },
                    group_id: frame.target.clone().unwrap_or_default(),
                    user_id: frame.target_key.clone().unwrap_or_default(),
                })),
                other => {
                    warn!(operation = other, "dropping unrecognized notice operation");
                    None
                }
            }
        }
        "join" => {
            if frame.state.as_deref() != Some("等待审核") {
                return None;
            }
            let flag = frame.time.clone();
            let group_id = frame.target.clone().unwrap_or_default();
            let sub_type = match frame.sub_type.as_deref() {
                Some("invite") => "invite",
                _ => "add",
            };
            requests.insert(
                flag.clone(),
                RequestTarget::Group {
                    group_id: group_id.clone(),
                    sub_type: sub_type.to_string(),
                },
            );
            Some(OutboundEvent::GroupRequest(GroupRequestEvent {
                time,
                self_id,
                post_type: "request",
                request_type: "group",
                sub_type,
                group_id,
                user_id: sender_id,
                comment: frame.payload.clone(),
                flag,
            }))
        }
        "friend" => {
            if frame.state.as_deref() != Some("等待审核") {
                return None;
            }
            let flag = frame.time.clone();
            requests.insert(
                flag.clone(),
                RequestTarget::Friend {
                    user_id: sender_id.clone(),
                },
            );
            Some(OutboundEvent::FriendRequest(FriendRequestEvent {
                time,
                self_id,
                post_type: "request",
                request_type: "friend",
                user_id: sender_id,
                comment: frame.payload.clone(),
                flag,
            }))
        }
        other => {
            warn!(kind = other, "dropping unrecognized system frame kind");
            None
        }
    }
}
