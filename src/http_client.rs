//! MkIX HTTP API client.
//!
//! One async method per endpoint, sharing a single response-handling path
//! (status ≥500 → `server_error`, ≥300 → `protocol_error`, 5s default
//! timeout, `ssl_check`-gated TLS verification).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{BridgeError, BridgeResult};
use crate::model::mkix::GroupType;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpClient {
    client: Client,
    config: Config,
    token: RwLock<Option<String>>,
}

impl HttpClient {
    pub fn new(config: Config) -> BridgeResult<Arc<Self>> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.ssl_check)
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Arc::new(Self {
            client,
            config,
            token: RwLock::new(None),
        }))
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token.read().clone() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.server_url.trim_end_matches('/'), path)
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> BridgeResult<T> {
        let resp = builder
            .send()
            .await
            .map_err(|e| BridgeError::Server {
                status: 0,
                body: e.to_string(),
            })?;
        let status = resp.status();
        if status.as_u16() >= 500 {
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Server {
                status: status.as_u16(),
                body,
            });
        }
        if status.as_u16() >= 300 {
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Protocol {
                status: status.as_u16(),
                detail: body,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| BridgeError::Protocol {
                status: status.as_u16(),
                detail: format!("cannot parse response body: {e}"),
            })
    }

    /// `POST /v1/user/token`: exchanges account/password for a session,
    /// stashing the bearer token for subsequent calls.
    pub async fn login(&self) -> BridgeResult<()> {
        let body = json!({
            "account": self.config.account,
            "password": self.config.password,
        });
        let resp: Value = self
            .fetch(self.client.post(self.url("/v1/user/token")).json(&body))
            .await?;
        let token = resp
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::Auth("login response missing access_token".to_string()))?;
        *self.token.write() = Some(token.to_string());
        Ok(())
    }

    /// `GET /v1/user/wsToken`: short-lived token for opening a new WS link.
    pub async fn ws_token(&self) -> BridgeResult<String> {
        let resp: Value = self
            .fetch(self.authed(
                self.client.get(self.url("/v1/user/wsToken")).query(&[("device", "00000000")]),
            ))
            .await?;
        resp.get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Auth("ws_token response missing token".to_string()))
    }

    /// `GET /v1/user/profile/me`: this bridge's own MkIX identity.
    pub async fn my_profile(&self) -> BridgeResult<crate::profile::MyProfile> {
        self.fetch(self.authed(self.client.get(self.url("/v1/user/profile/me"))))
            .await
    }

    /// `POST /v1/{group|user}/{id}/upload`: multipart upload used instead
    /// of the WS echo path for `file`/`audio` frames, returning the
    /// server-assigned `time` that becomes the frame's message id.
    pub async fn post_file(
        &self,
        group: &str,
        group_type: GroupType,
        bytes: &[u8],
        kind: &str,
    ) -> BridgeResult<String> {
        let mime = if kind == "audio" {
            "audio/amr"
        } else {
            "application/octet-stream"
        };
        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name("upload.bin")
            .mime_str(mime)
            .map_err(|e| BridgeError::Usage(format!("bad mime type: {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let segment = match group_type {
            GroupType::Friend => "user",
            _ => "group",
        };
        let resp: Value = self
            .fetch(
                self.authed(
                    self.client
                        .post(self.url(&format!("/v1/{segment}/{group}/upload")))
                        .multipart(form),
                ),
            )
            .await?;
        resp.get("time")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Protocol {
                status: 200,
                detail: "upload response missing time".to_string(),
            })
    }

    /// `GET` of a previously uploaded file. Attaches the bearer token only
    /// when `url` shares the server's origin.
    pub async fn get_file(&self, url: &str) -> BridgeResult<Vec<u8>> {
        let builder = if url.starts_with(&self.config.server_url) {
            self.authed(self.client.get(url))
        } else {
            self.client.get(url)
        };
        let resp = builder
            .send()
            .await
            .map_err(|e| BridgeError::NotFound(format!("{url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(BridgeError::NotFound(url.to_string()));
        }
        Ok(resp
            .bytes()
            .await
            .map_err(|e| BridgeError::Io(std::io::Error::other(e)))?
            .to_vec())
    }

    /// `DELETE /v1/group/{g}/members/{u}`.
    pub async fn group_kick(&self, group_id: &str, user_id: &str) -> BridgeResult<()> {
        self.action_call(
            Method::DELETE,
            &format!("/v1/group/{group_id}/members/{user_id}"),
            json!({}),
        )
        .await
    }

    /// `POST /v1/group/{g}/members/{u}/ban` `{duration}`.
    pub async fn group_ban(&self, group_id: &str, user_id: &str, duration: i64) -> BridgeResult<()> {
        self.action_call(
            Method::POST,
            &format!("/v1/group/{group_id}/members/{user_id}/ban"),
            json!({ "duration": duration }),
        )
        .await
    }

    /// `POST`/`DELETE /v1/group/{g}/members/admin/{u}`, chosen by `enable`.
    pub async fn group_admin(&self, group_id: &str, user_id: &str, enable: bool) -> BridgeResult<()> {
        let method = if enable { Method::POST } else { Method::DELETE };
        self.action_call(
            method,
            &format!("/v1/group/{group_id}/members/admin/{user_id}"),
            json!({}),
        )
        .await
    }

    /// `PATCH /v1/group/{g}/info/name` `{name}`.
    pub async fn group_name(&self, group_id: &str, group_name: &str) -> BridgeResult<()> {
        self.action_call(
            Method::PATCH,
            &format!("/v1/group/{group_id}/info/name"),
            json!({ "name": group_name }),
        )
        .await
    }

    /// `DELETE /v1/group/{g}` when dismissing, `DELETE /v1/group/{g}/members/me` otherwise.
    pub async fn group_leave(&self, group_id: &str, is_dismiss: bool) -> BridgeResult<()> {
        let path = if is_dismiss {
            format!("/v1/group/{group_id}")
        } else {
            format!("/v1/group/{group_id}/members/me")
        };
        self.action_call(Method::DELETE, &path, json!({})).await
    }

    /// `POST`/`DELETE /v1/user/{u}/verify/request/{flag}`, chosen by `approve`.
    pub async fn friend_add_request(&self, user_id: &str, flag: &str, approve: bool) -> BridgeResult<()> {
        let method = if approve { Method::POST } else { Method::DELETE };
        self.action_call(
            method,
            &format!("/v1/user/{user_id}/verify/request/{flag}"),
            json!({}),
        )
        .await
    }

    /// `POST`/`DELETE /v1/group/{g}/verify/request/{flag}`, chosen by `approve`.
    pub async fn group_add_request(&self, group_id: &str, flag: &str, approve: bool) -> BridgeResult<()> {
        let method = if approve { Method::POST } else { Method::DELETE };
        self.action_call(
            method,
            &format!("/v1/group/{group_id}/verify/request/{flag}"),
            json!({}),
        )
        .await
    }

    /// `get_login_info` is this bridge's own profile, same endpoint as
    /// [`Self::my_profile`] but returned as a raw JSON value.
    pub async fn login_info(&self) -> BridgeResult<Value> {
        self.fetch(self.authed(self.client.get(self.url("/v1/user/profile/me"))))
            .await
    }

    /// `GET /v1/user/{id}/profile`.
    pub async fn stranger_info(&self, user_id: &str) -> BridgeResult<Value> {
        self.fetch(self.authed(self.client.get(self.url(&format!("/v1/user/{user_id}/profile")))))
            .await
    }

    /// No dedicated endpoint exists; derived from this bridge's own
    /// profile, same as [`Self::my_profile`].
    pub async fn friend_list(&self) -> BridgeResult<Value> {
        let profile: crate::profile::MyProfile = self.my_profile().await?;
        Ok(Value::Array(
            profile
                .friends
                .into_iter()
                .map(|user_id| json!({ "user_id": user_id }))
                .collect(),
        ))
    }

    /// `GET /v1/group/{g}/info` composed with `GET /v1/group/{g}/members`.
    pub async fn group_info(&self, group_id: &str) -> BridgeResult<Value> {
        let mut info: Value = self
            .fetch(self.authed(self.client.get(self.url(&format!("/v1/group/{group_id}/info")))))
            .await?;
        let members = self.group_member_list(group_id).await?;
        if let Value::Object(map) = &mut info {
            map.insert("members".to_string(), members);
        }
        Ok(info)
    }

    /// No dedicated endpoint exists; derived from this bridge's own
    /// profile, same as [`Self::my_profile`].
    pub async fn group_list(&self) -> BridgeResult<Value> {
        let profile: crate::profile::MyProfile = self.my_profile().await?;
        Ok(Value::Array(
            profile
                .groups
                .into_iter()
                .map(|group_id| json!({ "group_id": group_id }))
                .collect(),
        ))
    }

    /// No dedicated single-member endpoint exists; found by scanning
    /// `GET /v1/group/{g}/members`.
    pub async fn group_member_info(&self, group_id: &str, user_id: &str) -> BridgeResult<Value> {
        let members = self.group_member_list(group_id).await?;
        members
            .as_array()
            .and_then(|list| list.iter().find(|m| m.get("user_id").and_then(Value::as_str) == Some(user_id)))
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("group {group_id} member {user_id}")))
    }

    /// `GET /v1/group/{g}/members`.
    pub async fn group_member_list(&self, group_id: &str) -> BridgeResult<Value> {
        self.fetch(self.authed(self.client.get(self.url(&format!("/v1/group/{group_id}/members")))))
            .await
    }

    pub async fn status(&self, ws_ready: bool) -> Value {
        json!({ "online": ws_ready, "good": ws_ready })
    }

    /// Static identity; never hits the network.
    pub async fn version_info(&self) -> Value {
        json!({
            "app_name": "MkXI",
            "app_version": "1.0.0",
            "protocol_version": "v11",
        })
    }

    async fn action_call(&self, method: Method, path: &str, body: Value) -> BridgeResult<()> {
        let _: Value = self
            .fetch(self.authed(self.client.request(method, self.url(path)).json(&body)))
            .await?;
        Ok(())
    }
}
