//! GMCP（Generic MUD Communication Protocol）
//!
//! 以子協商 `IAC SB 201 <訊息> IAC SE` 傳送的結構化訊息，
//! 內容格式為 `"Namespace.Verb <json>"`。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::telnet::{subnegotiation, GMCP, IAC, SB, SE};

/// GMCP 錯誤
#[derive(Debug, Error)]
pub enum GmcpError {
    #[error("GMCP 訊息不是有效的 UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("GMCP 訊息缺少識別碼")]
    MissingId,

    #[error("GMCP 訊息 '{id}' 的資料無法解析: {source}")]
    InvalidData {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("預期 '{expected}'，收到 '{actual}'")]
    UnexpectedId { expected: &'static str, actual: String },
}

/// 包成 GMCP 子協商，內容中的 `IAC` 會被跳脫
pub fn wrap(message: &[u8]) -> Vec<u8> {
    subnegotiation(GMCP, message)
}

/// 從 GMCP 子協商取出訊息內容；不是 GMCP 時回傳 `None`
pub fn unwrap(command: &[u8]) -> Option<Vec<u8>> {
    let payload = command
        .strip_prefix(&[IAC, SB, GMCP])?
        .strip_suffix(&[IAC, SE])?;

    let mut data = Vec::with_capacity(payload.len());
    let mut escaped = false;
    for &b in payload {
        if b == IAC && !escaped {
            escaped = true;
            continue;
        }
        escaped = false;
        data.push(b);
    }
    Some(data)
}

/// 一則 GMCP 訊息
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// 例如 `Core.Hello`
    pub id: String,
    /// JSON 資料
    pub data: Option<Value>,
}

impl Message {
    /// 創建沒有資料的訊息
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: None,
        }
    }

    /// 創建帶資料的訊息
    pub fn with_data(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data: Some(data),
        }
    }

    /// 從位元組解析
    pub fn parse(payload: &[u8]) -> Result<Self, GmcpError> {
        std::str::from_utf8(payload)?.parse()
    }

    /// 包成可直接送出的子協商
    pub fn to_command(&self) -> Vec<u8> {
        wrap(self.to_string().as_bytes())
    }

    /// 把資料反序列化為指定型別
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, GmcpError> {
        let value = self.data.clone().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|source| GmcpError::InvalidData {
            id: self.id.clone(),
            source,
        })
    }
}

impl FromStr for Message {
    type Err = GmcpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (id, data) = match s.split_once(char::is_whitespace) {
            Some((id, data)) => (id, data.trim()),
            None => (s, ""),
        };
        if id.is_empty() {
            return Err(GmcpError::MissingId);
        }

        let data = if data.is_empty() {
            None
        } else {
            let value = serde_json::from_str(data).map_err(|source| GmcpError::InvalidData {
                id: id.to_string(),
                source,
            })?;
            Some(value)
        };

        Ok(Self {
            id: id.to_string(),
            data,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(data) => write!(f, "{} {}", self.id, data),
            None => f.write_str(&self.id),
        }
    }
}

/// 用戶端送出的 GMCP 訊息
pub trait ClientMessage {
    /// 訊息識別碼
    const ID: &'static str;

    /// 轉成通用訊息
    fn to_message(&self) -> Message;

    /// 包成可直接送出的子協商
    fn to_command(&self) -> Vec<u8> {
        self.to_message().to_command()
    }
}

/// 識別用戶端，必須是第一則送出的訊息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreHello {
    pub client: String,
    pub version: String,
}

impl ClientMessage for CoreHello {
    const ID: &'static str = "Core.Hello";

    fn to_message(&self) -> Message {
        Message::with_data(
            Self::ID,
            serde_json::json!({ "client": self.client, "version": self.version }),
        )
    }
}

/// 宣告支援的模組與版本
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreSupportsSet(pub BTreeMap<String, u32>);

impl CoreSupportsSet {
    /// 從 `["Char 1", "Room 1"]` 格式的訊息解析
    pub fn from_message(message: &Message) -> Result<Self, GmcpError> {
        if message.id != Self::ID {
            return Err(GmcpError::UnexpectedId {
                expected: Self::ID,
                actual: message.id.clone(),
            });
        }

        let list: Vec<String> = message.data_as()?;
        let modules = list
            .iter()
            .map(|item| match item.split_once(' ') {
                Some((module, version)) => {
                    (module.to_string(), version.trim().parse().unwrap_or(1))
                }
                None => (item.clone(), 1),
            })
            .collect();
        Ok(Self(modules))
    }
}

impl ClientMessage for CoreSupportsSet {
    const ID: &'static str = "Core.Supports.Set";

    fn to_message(&self) -> Message {
        let list: Vec<Value> = self
            .0
            .iter()
            .map(|(module, version)| Value::String(format!("{} {}", module, version)))
            .collect();
        Message::with_data(Self::ID, Value::Array(list))
    }
}

impl<S: Into<String>> FromIterator<(S, u32)> for CoreSupportsSet {
    fn from_iter<I: IntoIterator<Item = (S, u32)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(m, v)| (m.into(), v)).collect())
    }
}

/// 重設伺服器的逾時計時
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreKeepAlive;

impl ClientMessage for CoreKeepAlive {
    const ID: &'static str = "Core.KeepAlive";

    fn to_message(&self) -> Message {
        Message::new(Self::ID)
    }
}

/// 測量延遲，可附上上一次的延遲毫秒數
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorePing {
    pub latency: Option<u64>,
}

impl ClientMessage for CorePing {
    const ID: &'static str = "Core.Ping";

    fn to_message(&self) -> Message {
        match self.latency {
            Some(latency) => Message::with_data(Self::ID, Value::from(latency)),
            None => Message::new(Self::ID),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrap_and_unwrap() {
        let wrapped = wrap(b"Core.Ping");
        let mut expected = vec![IAC, SB, GMCP];
        expected.extend_from_slice(b"Core.Ping");
        expected.extend_from_slice(&[IAC, SE]);
        assert_eq!(wrapped, expected);
        assert_eq!(unwrap(&wrapped), Some(b"Core.Ping".to_vec()));
    }

    #[test]
    fn test_iac_in_payload_is_escaped() {
        let wrapped = wrap(&[b'x', IAC, b'y']);
        assert_eq!(wrapped, vec![IAC, SB, GMCP, b'x', IAC, IAC, b'y', IAC, SE]);
        assert_eq!(unwrap(&wrapped), Some(vec![b'x', IAC, b'y']));
    }

    #[test]
    fn test_unwrap_rejects_other_commands() {
        assert_eq!(unwrap(&[IAC, SB, 24, b'x', IAC, SE]), None);
        assert_eq!(unwrap(&[IAC, 251, GMCP]), None);
        assert_eq!(unwrap(b"plain text"), None);
    }

    #[test]
    fn test_parse_message() {
        let message = Message::parse(br#"Char.Vitals {"hp": "100", "maxhp": "120"}"#).unwrap();
        assert_eq!(message.id, "Char.Vitals");
        assert_eq!(message.data, Some(json!({"hp": "100", "maxhp": "120"})));

        let bare = Message::parse(b"Core.Goodbye").unwrap();
        assert_eq!(bare, Message::new("Core.Goodbye"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Message::parse(b""), Err(GmcpError::MissingId)));
        assert!(matches!(
            Message::parse(b"Char.Vitals {broken"),
            Err(GmcpError::InvalidData { .. })
        ));
        assert!(matches!(
            Message::parse(&[0xff, 0xfe]),
            Err(GmcpError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        let message = Message::with_data("Comm.Channel.Text", json!({"text": "hi"}));
        let text = message.to_string();
        assert_eq!(text, r#"Comm.Channel.Text {"text":"hi"}"#);
        assert_eq!(text.parse::<Message>().unwrap(), message);
    }

    #[test]
    fn test_core_hello() {
        let hello = CoreHello {
            client: "mudlark".to_string(),
            version: "0.1.0".to_string(),
        };
        let message = hello.to_message();
        assert_eq!(message.id, "Core.Hello");
        assert_eq!(message.data_as::<CoreHello>().unwrap(), hello);
        assert_eq!(
            unwrap(&hello.to_command()),
            Some(br#"Core.Hello {"client":"mudlark","version":"0.1.0"}"#.to_vec())
        );
    }

    #[test]
    fn test_core_supports_set() {
        let supports: CoreSupportsSet = [("Room", 1), ("Char", 1), ("Comm.Channel", 1)]
            .into_iter()
            .collect();
        let message = supports.to_message();
        assert_eq!(message.to_string(), r#"Core.Supports.Set ["Char 1","Comm.Channel 1","Room 1"]"#);

        let parsed = CoreSupportsSet::from_message(&message).unwrap();
        assert_eq!(parsed, supports);

        let other = Message::new("Core.Hello");
        assert!(CoreSupportsSet::from_message(&other).is_err());
    }

    #[test]
    fn test_keepalive_and_ping() {
        assert_eq!(CoreKeepAlive.to_message().to_string(), "Core.KeepAlive");
        assert_eq!(CorePing::default().to_message().to_string(), "Core.Ping");
        assert_eq!(
            CorePing { latency: Some(42) }.to_message().to_string(),
            "Core.Ping 42"
        );
    }
}
