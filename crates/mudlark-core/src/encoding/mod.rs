//! 文字編碼模組
//!
//! MUD 伺服器送出的位元組不一定是 UTF-8（台灣的伺服器多半是 Big5），
//! 這裡依 WHATWG 標籤選擇 `encoding_rs` 的編碼。

use std::borrow::Cow;
use std::fmt;

use encoding_rs::{Encoding, UTF_8};
use thiserror::Error;

/// 未知的編碼標籤
#[derive(Debug, Error, PartialEq, Eq)]
#[error("未知的文字編碼: {0}")]
pub struct UnknownCharset(pub String);

/// 連線使用的文字編碼
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Charset {
    encoding: &'static Encoding,
}

impl Charset {
    /// 依 WHATWG 標籤選擇編碼，例如 `utf-8`、`big5`、`windows-1252`
    pub fn for_label(label: &str) -> Result<Self, UnknownCharset> {
        Encoding::for_label(label.trim().as_bytes())
            .map(|encoding| Self { encoding })
            .ok_or_else(|| UnknownCharset(label.to_string()))
    }

    /// 編碼名稱
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// 解碼為 UTF-8（無效字元會被替換為 U+FFFD）
    ///
    /// # Example
    /// ```
    /// use mudlark_core::encoding::Charset;
    ///
    /// let big5 = Charset::for_label("big5").unwrap();
    /// let text = big5.decode(&[0xb4, 0xfa, 0xa6, 0xb4]); // "測試" in Big5
    /// assert_eq!(text, "測試");
    /// ```
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        let (decoded, _, _) = self.encoding.decode(bytes);
        decoded
    }

    /// 由 UTF-8 編碼（無法編碼的字元會被替換）
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        let (encoded, _, _) = self.encoding.encode(text);
        encoded
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self { encoding: UTF_8 }
    }
}

impl fmt::Debug for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Charset").field(&self.name()).finish()
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
