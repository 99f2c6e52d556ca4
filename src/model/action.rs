//! OneBot action requests and the dispatch-time `Action` enum: one
//! constructor per action name, parsed by `Action::parse`. The matching
//! `dispatch()` lives in `crate::dispatcher`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};

/// The raw frame received on the OneBot link: `{action, params, echo}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub params: Value,
    pub echo: Value,
}

fn default_true() -> bool {
    true
}

fn default_duration() -> i64 {
    1800
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageParams {
    #[serde(default)]
    pub auto_escape: bool,
    pub message: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendPrivateMsgParams {
    pub user_id: Value,
    #[serde(default)]
    pub auto_escape: bool,
    pub message: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendGroupMsgParams {
    pub group_id: Value,
    #[serde(default)]
    pub auto_escape: bool,
    pub message: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMsgParams {
    pub message_type: Option<String>,
    pub user_id: Option<Value>,
    pub group_id: Option<Value>,
    #[serde(default)]
    pub auto_escape: bool,
    pub message: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendForwardMsgParams {
    pub user_id: Option<Value>,
    pub group_id: Option<Value>,
    pub messages: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteMsgParams {
    pub message_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetGroupKickParams {
    pub group_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetGroupBanParams {
    pub group_id: String,
    pub user_id: String,
    #[serde(default = "default_duration")]
    pub duration: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetGroupAdminParams {
    pub group_id: String,
    pub user_id: String,
    #[serde(default = "default_true")]
    pub enable: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetGroupNameParams {
    pub group_id: String,
    pub group_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetGroupLeaveParams {
    pub group_id: String,
    #[serde(default)]
    pub is_dismiss: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetFriendAddRequestParams {
    pub flag: String,
    #[serde(default = "default_true")]
    pub approve: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetGroupAddRequestParams {
    pub flag: String,
    #[serde(default = "default_true")]
    pub approve: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrangerInfoParams {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupInfoParams {
    pub group_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupMemberInfoParams {
    pub group_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupMemberListParams {
    pub group_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordParams {
    pub file: String,
    #[serde(default)]
    pub out_format: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageParams {
    pub file: String,
    #[serde(default)]
    pub out_format: Option<String>,
}

/// The dispatch-time action, one variant per supported OneBot action name.
#[derive(Debug, Clone)]
pub enum Action {
    SendPrivateMsg(SendPrivateMsgParams),
    SendGroupMsg(SendGroupMsgParams),
    SendMsg(SendMsgParams),
    SendGroupForwardMsg(SendForwardMsgParams),
    SendPrivateForwardMsg(SendForwardMsgParams),
    DeleteMsg(DeleteMsgParams),
    SetGroupKick(SetGroupKickParams),
    SetGroupBan(SetGroupBanParams),
    SetGroupAdmin(SetGroupAdminParams),
    SetGroupName(SetGroupNameParams),
    SetGroupLeave(SetGroupLeaveParams),
    SetFriendAddRequest(SetFriendAddRequestParams),
    SetGroupAddRequest(SetGroupAddRequestParams),
    GetLoginInfo,
    GetStrangerInfo(StrangerInfoParams),
    GetFriendList,
    GetGroupInfo(GroupInfoParams),
    GetGroupList,
    GetGroupMemberInfo(GroupMemberInfoParams),
    GetGroupMemberList(GroupMemberListParams),
    GetRecord(RecordParams),
    GetImage(ImageParams),
    GetStatus,
    GetVersionInfo,
}

impl Action {
    /// Parses `{action, params}` into a typed [`Action`]. Unknown actions
    /// return a `usage_error`, which the dispatcher turns into a
    /// `status:failed, retcode:1400` reply.
    pub fn parse(action: &str, params: Value) -> BridgeResult<Action> {
        let from = |p: Value| -> BridgeResult<_> {
            serde_json::from_value(p)
                .map_err(|e| BridgeError::Usage(format!("bad params for {action}: {e}")))
        };
        Ok(match action {
            "send_private_msg" => Action::SendPrivateMsg(from(params)?),
            "send_group_msg" => Action::SendGroupMsg(from(params)?),
            "send_msg" => Action::SendMsg(from(params)?),
            "send_group_forward_msg" => Action::SendGroupForwardMsg(from(params)?),
            "send_private_forward_msg" => Action::SendPrivateForwardMsg(from(params)?),
            "delete_msg" => Action::DeleteMsg(from(params)?),
            "set_group_kick" => Action::SetGroupKick(from(params)?),
            "set_group_ban" => Action::SetGroupBan(from(params)?),
            "set_group_admin" => Action::SetGroupAdmin(from(params)?),
            "set_group_name" => Action::SetGroupName(from(params)?),
            "set_group_leave" => Action::SetGroupLeave(from(params)?),
            "set_friend_add_request" => Action::SetFriendAddRequest(from(params)?),
            "set_group_add_request" => Action::SetGroupAddRequest(from(params)?),
            "get_login_info" => Action::GetLoginInfo,
            "get_stranger_info" => Action::GetStrangerInfo(from(params)?),
            "get_friend_list" => Action::GetFriendList,
            "get_group_info" => Action::GetGroupInfo(from(params)?),
            "get_group_list" => Action::GetGroupList,
            "get_group_member_info" => Action::GetGroupMemberInfo(from(params)?),
            "get_group_member_list" => Action::GetGroupMemberList(from(params)?),
            "get_record" => Action::GetRecord(from(params)?),
            "get_image" => Action::GetImage(from(params)?),
            "get_status" => Action::GetStatus,
            "get_version_info" => Action::GetVersionInfo,
            other => {
                return Err(BridgeError::Usage(format!("unsupported action: {other}")));
            }
        })
    }
}

/// Standard OneBot action reply envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ActionReply {
    pub status: &'static str,
    pub retcode: i64,
    pub data: Value,
    pub echo: Value,
}

impl ActionReply {
    pub fn ok(data: Value, echo: Value) -> Self {
        Self {
            status: "ok",
            retcode: 0,
            data,
            echo,
        }
    }

    pub fn failed(detail: impl Into<String>, retcode: i64, echo: Value) -> Self {
        Self {
            status: "failed",
            retcode,
            data: serde_json::json!({ "detail": detail.into() }),
            echo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_action_is_usage_error() {
        let err = Action::parse("not_a_real_action", Value::Null).unwrap_err();
        assert!(matches!(err, BridgeError::Usage(_)));
    }

    #[test]
    fn defaults_apply_when_omitted() {
        let action = Action::parse(
            "set_group_ban",
            serde_json::json!({"group_id": "1", "user_id": "2"}),
        )
        .unwrap();
        match action {
            Action::SetGroupBan(p) => assert_eq!(p.duration, 1800),
            _ => panic!("wrong variant"),
        }
    }
}
