//! OneBot v11 events emitted onto the OneBot link.
//!
//! Each event type is a plain struct carrying the envelope fields
//! (`time`, `self_id`, `post_type`, and its own `*_type` tag) plus its
//! type-specific fields. This bridge has one consumer (an OneBot client)
//! and constructs these procedurally rather than through a generic
//! `Event`/`FromEvent` trait hierarchy.

use serde::Serialize;
use serde_json::Value;

use super::segment::Segment;

#[derive(Debug, Clone, Serialize)]
pub struct Sender {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrivateMessageEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub message_type: &'static str,
    pub sub_type: &'static str,
    pub message_id: String,
    pub user_id: String,
    pub message: Vec<Segment>,
    pub raw_message: String,
    pub message_format: &'static str,
    pub font: i32,
    pub sender: Sender,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMessageEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub message_type: &'static str,
    pub sub_type: &'static str,
    pub message_id: String,
    pub group_id: String,
    pub user_id: String,
    pub anonymous: Option<Value>,
    pub message: Vec<Segment>,
    pub raw_message: String,
    pub message_format: &'static str,
    pub font: i32,
    pub sender: Sender,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedFile {
    pub id: String,
    pub name: Option<String>,
    pub size: Option<u64>,
    pub busid: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupFileUploadEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub notice_type: &'static str,
    pub group_id: String,
    pub user_id: String,
    pub file: UploadedFile,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupAdminEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub notice_type: &'static str,
    pub sub_type: &'static str,
    pub group_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupDecreaseEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub notice_type: &'static str,
    pub sub_type: &'static str,
    pub group_id: String,
    pub operator_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupIncreaseEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub notice_type: &'static str,
    pub sub_type: &'static str,
    pub group_id: String,
    pub operator_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupBanEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub notice_type: &'static str,
    pub sub_type: &'static str,
    pub group_id: String,
    pub operator_id: String,
    pub user_id: String,
    pub duration: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendAddEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub notice_type: &'static str,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupRecallEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub notice_type: &'static str,
    pub group_id: String,
    pub user_id: String,
    pub operator_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendRecallEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub notice_type: &'static str,
    pub user_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FriendRequestEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub request_type: &'static str,
    pub user_id: String,
    pub comment: String,
    pub flag: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupRequestEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub request_type: &'static str,
    pub sub_type: &'static str,
    pub group_id: String,
    pub user_id: String,
    pub comment: String,
    pub flag: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub meta_event_type: &'static str,
    pub sub_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatStatus {
    pub online: bool,
    pub good: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatEvent {
    pub time: i64,
    pub self_id: String,
    pub post_type: &'static str,
    pub meta_event_type: &'static str,
    pub status: HeartbeatStatus,
    pub interval: i64,
}

/// Any event the classifier or WS session layer may emit onto the OneBot
/// link. Untagged: each variant already carries its own `post_type`/
/// `*_type` discriminators as plain fields, matching the wire shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundEvent {
    PrivateMessage(PrivateMessageEvent),
    GroupMessage(GroupMessageEvent),
    GroupFileUpload(GroupFileUploadEvent),
    GroupAdmin(GroupAdminEvent),
    GroupDecrease(GroupDecreaseEvent),
    GroupIncrease(GroupIncreaseEvent),
    GroupBan(GroupBanEvent),
    FriendAdd(FriendAddEvent),
    GroupRecall(GroupRecallEvent),
    FriendRecall(FriendRecallEvent),
    FriendRequest(FriendRequestEvent),
    GroupRequest(GroupRequestEvent),
    Lifecycle(LifecycleEvent),
    Heartbeat(HeartbeatEvent),
}
