//! Configuration schema and loader.
//!
//! Loads `config.yaml` (or the path named by `MKXI_CONFIG`), expands
//! `${VAR}` / `${VAR:-default}` references against the process
//! environment, then parses and validates the result. Any failure here is
//! fatal — the orchestrator logs it and exits.

use std::collections::HashMap;
use std::env;
use std::path::Path;

use md5::{Digest, Md5};
use serde::{Deserialize, Deserializer};

use crate::error::{BridgeError, BridgeResult};

fn deserialize_account<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(i64),
    }

    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => Ok(s),
        StringOrNumber::Number(n) => Ok(n.to_string()),
    }
}

fn deserialize_password<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(md5_hex(&raw))
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Bridge configuration, as loaded from `config.yaml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_account")]
    pub account: String,

    #[serde(deserialize_with = "deserialize_password")]
    pub password: String,

    pub server_url: String,

    #[serde(rename = "OneBot_url")]
    pub onebot_url: String,

    pub max_memo_size: usize,

    #[serde(default)]
    pub ssl_check: bool,

    #[serde(default)]
    pub webp: bool,

    /// MkIX group id → AES key (16/24/32 raw bytes encoded as UTF-8 text).
    #[serde(default)]
    pub encrypt: HashMap<String, String>,
}

impl Config {
    /// Loads configuration from `path`, or `$MKXI_CONFIG`, or `./config.yaml`,
    /// falling back to `$XDG_CONFIG_HOME/mkxi-bridge/config.yaml` (or the
    /// platform equivalent) when neither is present.
    pub fn load(path: Option<&Path>) -> BridgeResult<Config> {
        let resolved = match path {
            Some(p) => p.to_path_buf(),
            None => match env::var("MKXI_CONFIG") {
                Ok(p) => Path::new(&p).to_path_buf(),
                Err(_) => {
                    let cwd_config = Path::new("config.yaml");
                    if cwd_config.exists() {
                        cwd_config.to_path_buf()
                    } else {
                        dirs::config_dir()
                            .map(|d| d.join("mkxi-bridge").join("config.yaml"))
                            .unwrap_or_else(|| cwd_config.to_path_buf())
                    }
                }
            },
        };

        let raw = std::fs::read_to_string(&resolved).map_err(|e| {
            BridgeError::Config(format!("cannot read {}: {e}", resolved.display()))
        })?;
        let expanded = expand_env_vars(&raw);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| BridgeError::Config(format!("cannot parse config: {e}")))?;
        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &Config) -> BridgeResult<()> {
    if config.max_memo_size == 0 {
        return Err(BridgeError::Config(
            "max_memo_size must be a positive integer".to_string(),
        ));
    }
    if config.server_url.is_empty() {
        return Err(BridgeError::Config("server_url must not be empty".to_string()));
    }
    if config.onebot_url.is_empty() {
        return Err(BridgeError::Config("OneBot_url must not be empty".to_string()));
    }
    for (group, key) in &config.encrypt {
        let len = key.as_bytes().len();
        if !matches!(len, 16 | 24 | 32) {
            return Err(BridgeError::Config(format!(
                "encrypt key for group {group} must be 16, 24, or 32 bytes, got {len}"
            )));
        }
    }
    Ok(())
}

/// Expands `${VAR}` and `${VAR:-default}` references against the process
/// environment. Unset variables with no default expand to the empty
/// string.
fn expand_env_vars(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(end) = input[i + 2..].find('}') {
                let inner = &input[i + 2..i + 2 + end];
                let (name, default) = match inner.split_once(":-") {
                    Some((n, d)) => (n, Some(d)),
                    None => (inner, None),
                };
                let value = env::var(name).ok().or_else(|| default.map(str::to_string));
                output.push_str(&value.unwrap_or_default());
                i += 2 + end + 1;
                continue;
            }
        }
        output.push(bytes[i] as char);
        i += 1;
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_md5_digested() {
        let yaml = r#"
account: 123456
password: hunter2
server_url: http://localhost:8000
OneBot_url: ws://localhost:6700
max_memo_size: 100
ssl_check: false
webp: false
encrypt: {}
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.account, "123456");
        assert_eq!(config.password, md5_hex("hunter2"));
    }

    #[test]
    fn env_var_expansion_with_default() {
        std::env::remove_var("MKXI_TEST_UNSET");
        assert_eq!(expand_env_vars("${MKXI_TEST_UNSET:-fallback}"), "fallback");
        std::env::set_var("MKXI_TEST_SET", "value");
        assert_eq!(expand_env_vars("${MKXI_TEST_SET}"), "value");
        std::env::remove_var("MKXI_TEST_SET");
    }

    #[test]
    fn rejects_bad_encrypt_key_length() {
        let yaml = r#"
account: "1"
password: "x"
server_url: http://localhost
OneBot_url: ws://localhost
max_memo_size: 10
encrypt:
  g1: short
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(validate(&config).is_err());
    }
}
