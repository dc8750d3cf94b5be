//! 訊息讀取器
//!
//! 把 [`Nvt`] 輸出的純文字依訊息邊界切開。

use std::io::{self, Read, Write};

use bytes::BytesMut;
use tracing::warn;

use super::nvt::Nvt;

/// 讀取緩衝區每次擴充的大小
const READ_CHUNK: usize = 4096;

/// 單一訊息的最大長度，超過時強制切分
pub const MAX_MESSAGE: usize = 64 * 1024;

/// 依 `GA`（以及啟用 Suppress Go Ahead 時的 CRLF）切分訊息的讀取器
pub struct MessageReader<C> {
    nvt: Nvt<C>,
    buffer: BytesMut,
    eof: bool,
}

impl<C: Read + Write> MessageReader<C> {
    /// 包裝 NVT
    pub fn new(nvt: Nvt<C>) -> Self {
        Self {
            nvt,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            eof: false,
        }
    }

    /// NVT 本身（用於送出資料）
    pub fn nvt_mut(&mut self) -> &mut Nvt<C> {
        &mut self.nvt
    }

    /// NVT 本身
    pub fn nvt(&self) -> &Nvt<C> {
        &self.nvt
    }

    /// 讀取下一個完整訊息
    ///
    /// 回傳 `Ok(None)` 代表連線已結束且沒有剩餘資料。
    /// 底層連線暫時沒有資料時回傳 `WouldBlock`，已緩衝的部分會保留。
    pub fn next_message(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(len) = self.nvt.split_message(&self.buffer, self.eof) {
                return Ok(Some(self.buffer.split_to(len).to_vec()));
            }
            if self.eof {
                return Ok(None);
            }
            if self.buffer.len() >= MAX_MESSAGE {
                warn!("訊息超過 {} 位元組仍沒有邊界，強制切分", MAX_MESSAGE);
                return Ok(Some(self.buffer.split_to(MAX_MESSAGE).to_vec()));
            }

            let start = self.buffer.len();
            self.buffer.resize(start + READ_CHUNK, 0);
            match self.nvt.read(&mut self.buffer[start..]) {
                Ok(0) => {
                    self.buffer.truncate(start);
                    self.eof = true;
                }
                Ok(n) => self.buffer.truncate(start + n),
                Err(e) => {
                    self.buffer.truncate(start);
                    return Err(e);
                }
            }
        }
    }
}
