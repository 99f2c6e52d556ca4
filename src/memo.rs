//! Message Memo and Request Memo: the outbound pipeline that turns
//! dispatcher-produced MkIX post-frames into delivered chat, and the
//! short-lived flag→target map used to resolve add-requests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use parking_lot::Mutex;
use rand::RngCore;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{BridgeError, BridgeResult};
use crate::http_client::HttpClient;
use crate::model::mkix::{GroupType, MkIXGetMessage, MkIXPostMessage};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const QUEUE_CAPACITY: usize = 64;
const OVERALL_DEADLINE: Duration = Duration::from_secs(30);

fn timeout_for(kind: &str) -> Duration {
    match kind {
        "text" | "revokeRequest" => Duration::from_secs(1),
        "image" => Duration::from_secs(3),
        _ => Duration::from_secs(10),
    }
}

/// AES-CBC-encrypts `plaintext` under `key` with a random IV, returning
/// `(base64 ciphertext, hex IV)` for `payload.content`/`payload.meta.iv`.
fn encrypt(key: &[u8], plaintext: &[u8]) -> BridgeResult<(String, String)> {
    use aes::cipher::block_padding::Pkcs7;

    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = match key.len() {
        16 => Aes128CbcEnc::new_from_slices(key, &iv)
            .map_err(|e| BridgeError::Crypto(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => Aes192CbcEnc::new_from_slices(key, &iv)
            .map_err(|e| BridgeError::Crypto(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => Aes256CbcEnc::new_from_slices(key, &iv)
            .map_err(|e| BridgeError::Crypto(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        other => {
            return Err(BridgeError::Crypto(format!(
                "unsupported AES key length: {other}"
            )))
        }
    };

    let b64 = base64::engine::general_purpose::STANDARD.encode(ciphertext);
    let hex_iv = iv.iter().map(|b| format!("{b:02x}")).collect();
    Ok((b64, hex_iv))
}

/// Reverses [`encrypt`]: decrypts a base64 ciphertext under `key` given a
/// hex-encoded IV.
pub fn decrypt(key: &[u8], iv_hex: &str, ciphertext_b64: &str) -> BridgeResult<Vec<u8>> {
    use aes::cipher::block_padding::Pkcs7;

    let iv = hex_decode(iv_hex)?;
    if iv.len() != 16 {
        return Err(BridgeError::Crypto(format!(
            "expected a 16-byte IV, got {}",
            iv.len()
        )));
    }
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(ciphertext_b64)
        .map_err(|e| BridgeError::Crypto(format!("invalid base64 ciphertext: {e}")))?;

    let plaintext = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, &iv)
            .map_err(|e| BridgeError::Crypto(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| BridgeError::Crypto(e.to_string()))?,
        24 => Aes192CbcDec::new_from_slices(key, &iv)
            .map_err(|e| BridgeError::Crypto(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| BridgeError::Crypto(e.to_string()))?,
        32 => Aes256CbcDec::new_from_slices(key, &iv)
            .map_err(|e| BridgeError::Crypto(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| BridgeError::Crypto(e.to_string()))?,
        other => {
            return Err(BridgeError::Crypto(format!(
                "unsupported AES key length: {other}"
            )))
        }
    };
    Ok(plaintext)
}

fn hex_decode(s: &str) -> BridgeResult<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(BridgeError::Crypto("odd-length hex IV".to_string()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| BridgeError::Crypto(e.to_string())))
        .collect()
}

struct OutboundJob {
    group: String,
    group_type: GroupType,
    frames: Vec<MkIXPostMessage>,
    done: oneshot::Sender<BridgeResult<String>>,
}

/// One inbound MkIX chat frame retained under a synthetic OneBot
/// `message_id`, so `delete_msg` can resolve the frame it needs to revoke.
struct StoredChunk {
    group: String,
    group_type: GroupType,
    frame: MkIXGetMessage,
}

/// Outbound pipeline: bounded queue, single consumer, echo correlation,
/// per-type timeout, bounded inbound retention for `delete_msg` lookups.
pub struct MessageMemo {
    job_tx: mpsc::Sender<OutboundJob>,
    echo_counter: Arc<AtomicU64>,
    echo_waiters: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    chunks: Arc<Mutex<HashMap<String, StoredChunk>>>,
    chunk_order: Arc<Mutex<VecDeque<String>>>,
    max_memo_size: usize,
}

impl MessageMemo {
    /// Spawns the consumer task and returns a handle. `link_tx` carries
    /// serialized frames out to the MkIX websocket writer.
    pub fn spawn(config: Config, http: Arc<HttpClient>, link_tx: mpsc::Sender<String>) -> Arc<Self> {
        let (job_tx, job_rx) = mpsc::channel(QUEUE_CAPACITY);
        let memo = Arc::new(Self {
            job_tx,
            echo_counter: Arc::new(AtomicU64::new(1)),
            echo_waiters: Arc::new(Mutex::new(HashMap::new())),
            chunks: Arc::new(Mutex::new(HashMap::new())),
            chunk_order: Arc::new(Mutex::new(VecDeque::new())),
            max_memo_size: config.max_memo_size,
        });
        tokio::spawn(Self::consume(job_rx, config, http, link_tx, memo.clone()));
        memo
    }

    async fn consume(
        mut job_rx: mpsc::Receiver<OutboundJob>,
        config: Config,
        http: Arc<HttpClient>,
        link_tx: mpsc::Sender<String>,
        memo: Arc<MessageMemo>,
    ) {
        while let Some(job) = job_rx.recv().await {
            // A full-batch timeout is itself a successful reply carrying
            // the failure sentinel, not an error.
            let result = tokio::time::timeout(
                OVERALL_DEADLINE,
                memo.process_job(&job, &config, &http, &link_tx),
            )
            .await
            .unwrap_or_else(|_| Ok("-1".to_string()));
            let _ = job.done.send(result);
        }
    }

    /// Sends every frame in the job, attempting all of them even if some
    /// time out, and returns the first id any of them acknowledged (or
    /// `"-1"` if none did). Only a hard transport fault short-circuits.
    async fn process_job(
        &self,
        job: &OutboundJob,
        config: &Config,
        http: &HttpClient,
        link_tx: &mpsc::Sender<String>,
    ) -> BridgeResult<String> {
        let mut first_id: Option<String> = None;
        for frame in &job.frames {
            let mut frame = frame.clone();
            frame.group = Some(job.group.clone());
            frame.group_type = job.group_type;
            if let Some(id) = self.send_one(frame, config, http, link_tx).await? {
                if first_id.is_none() {
                    first_id = Some(id);
                }
            }
        }
        Ok(first_id.unwrap_or_else(|| "-1".to_string()))
    }

    /// Sends one frame. Returns `Ok(Some(time))` on a successful ack,
    /// `Ok(None)` on a soft per-frame timeout (treated as a failed id,
    /// not an error), and `Err` only for a hard transport fault.
    async fn send_one(
        &self,
        mut frame: MkIXPostMessage,
        config: &Config,
        http: &HttpClient,
        link_tx: &mpsc::Sender<String>,
    ) -> BridgeResult<Option<String>> {
        let kind = frame.kind.clone().unwrap_or_default();

        if kind == "file" || kind == "audio" {
            let bytes = frame.raw_bytes.take().unwrap_or_default();
            let group = frame.group.clone().unwrap_or_default();
            let time = http.post_file(&group, frame.group_type, &bytes, &kind).await?;
            return Ok(Some(time));
        }

        if let Some(payload) = frame.payload.as_mut() {
            if let Some(group) = frame.group.as_ref() {
                if let Some(key) = config.encrypt.get(group) {
                    let (ciphertext, iv_hex) = encrypt(key.as_bytes(), payload.content.as_bytes())?;
                    payload.content = ciphertext;
                    payload
                        .meta
                        .insert("iv".to_string(), Value::String(iv_hex));
                }
            }
        }

        let echo_id = self.echo_counter.fetch_add(1, Ordering::SeqCst);
        frame.echo = Some(echo_id);

        let (tx, rx) = oneshot::channel();
        self.echo_waiters.lock().insert(echo_id, tx);

        let body = serde_json::to_string(&frame)
            .map_err(|e| BridgeError::Usage(format!("cannot serialize post frame: {e}")))?;
        link_tx
            .send(body)
            .await
            .map_err(|_| BridgeError::Io(std::io::Error::other("MkIX link closed")))?;

        match tokio::time::timeout(timeout_for(&kind), rx).await {
            Ok(Ok(ack)) => Ok(ack.get("time").and_then(Value::as_str).map(str::to_string)),
            Ok(Err(_)) => Err(BridgeError::Io(std::io::Error::other(
                "echo waiter dropped before reply",
            ))),
            Err(_) => {
                self.echo_waiters.lock().remove(&echo_id);
                warn!(echo_id, kind = %kind, "MkIX echo timed out");
                Ok(None)
            }
        }
    }

    /// Enqueues `frames` for delivery and awaits the overall outcome,
    /// bounded by a 30s deadline for the whole batch. Always resolves
    /// successfully: on total failure the id is the `"-1"` sentinel.
    pub async fn post_messages(
        &self,
        group: String,
        group_type: GroupType,
        frames: Vec<MkIXPostMessage>,
    ) -> BridgeResult<String> {
        let (done, wait) = oneshot::channel();
        self.job_tx
            .send(OutboundJob {
                group,
                group_type,
                frames,
                done,
            })
            .await
            .map_err(|_| BridgeError::Io(std::io::Error::other("memo consumer task died")))?;
        wait.await
            .map_err(|_| BridgeError::Io(std::io::Error::other("memo consumer task died")))?
    }

    /// Resolves a pending `echo` reply (called from the MkIX reader loop
    /// on a `type: "echo"` system message).
    pub fn receive_echo(&self, echo_id: u64, value: Value) {
        if let Some(tx) = self.echo_waiters.lock().remove(&echo_id) {
            let _ = tx.send(value);
        } else {
            debug!(echo_id, "echo arrived with no pending waiter");
        }
    }

    /// Retains an inbound chat frame under a fresh synthetic message id,
    /// evicting the oldest entry once `max_memo_size` is exceeded.
    pub fn receive_chat(&self, group: String, group_type: GroupType, frame: MkIXGetMessage) -> String {
        let message_id = Uuid::new_v4().to_string();
        let mut chunks = self.chunks.lock();
        let mut order = self.chunk_order.lock();
        chunks.insert(
            message_id.clone(),
            StoredChunk {
                group,
                group_type,
                frame,
            },
        );
        order.push_back(message_id.clone());
        while order.len() > self.max_memo_size {
            if let Some(evicted) = order.pop_front() {
                chunks.remove(&evicted);
            }
        }
        message_id
    }

    /// Looks up a previously retained chat frame by OneBot `message_id`.
    pub fn get_storage(&self, message_id: &str) -> Option<(String, GroupType, MkIXGetMessage)> {
        self.chunks
            .lock()
            .get(message_id)
            .map(|c| (c.group.clone(), c.group_type, c.frame.clone()))
    }
}

/// Which side a pending add-request targets.
#[derive(Debug, Clone)]
pub enum RequestTarget {
    Friend { user_id: String },
    Group { group_id: String, sub_type: String },
}

/// Request Memo: short-lived `flag` → target map so
/// `set_friend_add_request`/`set_group_add_request` can resolve the flag
/// OneBot hands back into the group/user the request concerns.
#[derive(Default)]
pub struct RequestMemo {
    pending: Mutex<HashMap<String, RequestTarget>>,
}

impl RequestMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, flag: String, target: RequestTarget) {
        self.pending.lock().insert(flag, target);
    }

    pub fn take(&self, flag: &str) -> Option<RequestTarget> {
        self.pending.lock().remove(flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_round_trip_length_is_block_aligned() {
        let key = [0u8; 16];
        let (ciphertext_b64, iv_hex) = encrypt(&key, b"hello world").unwrap();
        let raw = base64::engine::general_purpose::STANDARD
            .decode(ciphertext_b64)
            .unwrap();
        assert_eq!(raw.len() % 16, 0);
        assert_eq!(iv_hex.len(), 32);
    }

    #[test]
    fn rejects_bad_key_length() {
        assert!(encrypt(&[0u8; 10], b"x").is_err());
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = b"0123456789abcdef";
        let (ciphertext, iv_hex) = encrypt(key, b"hello bridge").unwrap();
        let plaintext = decrypt(key, &iv_hex, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello bridge");
    }

    #[test]
    fn request_memo_round_trips() {
        let memo = RequestMemo::new();
        memo.insert(
            "flag1".to_string(),
            RequestTarget::Friend {
                user_id: "42".to_string(),
            },
        );
        assert!(matches!(
            memo.take("flag1"),
            Some(RequestTarget::Friend { user_id }) if user_id == "42"
        ));
        assert!(memo.take("flag1").is_none());
    }

    #[tokio::test]
    async fn chunk_store_evicts_oldest_beyond_capacity() {
        let (job_tx, _job_rx) = mpsc::channel(1);
        let memo = MessageMemo {
            job_tx,
            echo_counter: Arc::new(AtomicU64::new(1)),
            echo_waiters: Arc::new(Mutex::new(HashMap::new())),
            chunks: Arc::new(Mutex::new(HashMap::new())),
            chunk_order: Arc::new(Mutex::new(VecDeque::new())),
            max_memo_size: 2,
        };
        let frame = |sender: &str| MkIXGetMessage {
            time: "0".to_string(),
            kind: "text".to_string(),
            group: "g".to_string(),
            is_system_message: false,
            sender_id: sender.to_string(),
            payload: crate::model::mkix::MkIXMessagePayload::with_content("hi"),
        };
        let a = memo.receive_chat("g".to_string(), GroupType::Group, frame("a"));
        let _b = memo.receive_chat("g".to_string(), GroupType::Group, frame("b"));
        let _c = memo.receive_chat("g".to_string(), GroupType::Group, frame("c"));
        assert!(memo.get_storage(&a).is_none());
    }
}
