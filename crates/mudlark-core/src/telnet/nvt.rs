//! NVT（Network Virtual Terminal）
//!
//! 包裝一條雙向位元組連線：讀取時把控制序列從文字中分離、
//! 自動回應選項協商；寫入時補上 CRLF 並追蹤送出的協商命令。

use std::borrow::Cow;
use std::collections::VecDeque;
use std::error::Error as StdError;
use std::io::{self, Read, Write};

use thiserror::Error;
use tracing::{debug, warn};

use super::options::{NegotiationPolicy, OptionState, OptionTable, Side};
use super::protocol::{
    hex, CommandAssembler, Sequence, TelnetCommand, TelnetOption, GA, IAC, SB, SE,
    SUPPRESS_GO_AHEAD,
};

/// 預設每次從底層連線讀取的位元組數
pub const DEFAULT_READ_SIZE: usize = 4096;

/// 命令回呼可回傳的錯誤
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// 命令回呼：收到完整的協商或子協商序列時呼叫
///
/// 第二個參數是連線本身，可用來回覆（例如 GMCP 握手）。
pub type CommandFn = Box<dyn FnMut(&[u8], &mut dyn Write) -> Result<(), BoxError> + Send>;

/// 協定錯誤
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("回應 {received} {option} 時送出 {reply} 失敗: {source}")]
    Negotiation {
        received: TelnetCommand,
        reply: TelnetCommand,
        option: TelnetOption,
        #[source]
        source: io::Error,
    },

    #[error("命令處理失敗: {0}")]
    Command(#[source] BoxError),
}

impl ProtocolError {
    /// 轉為 `io::Error`，保留底層錯誤種類
    pub fn into_io(self) -> io::Error {
        let kind = match &self {
            Self::Negotiation { source, .. } => source.kind(),
            Self::Command(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}

/// Telnet 協定引擎
pub struct Nvt<C> {
    conn: C,
    options: OptionTable,
    policy: NegotiationPolicy,
    assembler: CommandAssembler,
    /// 從連線讀入但尚未處理的原始位元組
    raw: Vec<u8>,
    raw_pos: usize,
    read_size: usize,
    /// 插入輸出流的診斷文字
    diagnostics: VecDeque<u8>,
    last_cr: bool,
    /// 已有輸出時發生的錯誤，留到下一次讀取回報
    deferred: Option<io::Error>,
    command_fn: Option<CommandFn>,
}

impl<C> Nvt<C> {
    /// 以預設協商策略包裝連線
    pub fn new(conn: C) -> Self {
        Self::with_policy(conn, NegotiationPolicy::default())
    }

    /// 以指定的協商策略包裝連線
    pub fn with_policy(conn: C, policy: NegotiationPolicy) -> Self {
        Self {
            conn,
            options: OptionTable::new(),
            policy,
            assembler: CommandAssembler::new(),
            raw: Vec::new(),
            raw_pos: 0,
            read_size: DEFAULT_READ_SIZE,
            diagnostics: VecDeque::new(),
            last_cr: false,
            deferred: None,
            command_fn: None,
        }
    }

    /// 設定每次從連線讀取的大小
    pub fn with_read_size(mut self, size: usize) -> Self {
        self.read_size = size.max(1);
        self
    }

    /// 註冊命令回呼
    pub fn set_command_fn<F>(&mut self, f: F)
    where
        F: FnMut(&[u8], &mut dyn Write) -> Result<(), BoxError> + Send + 'static,
    {
        self.command_fn = Some(Box::new(f));
    }

    /// 選項表
    pub fn options(&self) -> &OptionTable {
        &self.options
    }

    /// 我方是否已啟用該選項
    pub fn is_local_on(&self, option: u8) -> bool {
        self.options.is_on(Side::Local, option)
    }

    /// 對方是否已啟用該選項
    pub fn is_remote_on(&self, option: u8) -> bool {
        self.options.is_on(Side::Remote, option)
    }

    /// 協商策略
    pub fn policy(&self) -> &NegotiationPolicy {
        &self.policy
    }

    /// 底層連線
    pub fn get_ref(&self) -> &C {
        &self.conn
    }

    /// 可變的底層連線
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    /// 取回底層連線
    pub fn into_inner(self) -> C {
        self.conn
    }

    /// 訊息邊界函式
    ///
    /// 回傳下一個訊息的長度（含邊界位元組）。`GA` 永遠是邊界；
    /// `\r\n` 只在對方啟用 Suppress Go Ahead 時才是邊界。
    /// 資料結束時剩下的位元組自成一個訊息。
    pub fn split_message(&self, data: &[u8], at_eof: bool) -> Option<usize> {
        if at_eof && data.is_empty() {
            return None;
        }

        let suppressed = self.is_remote_on(SUPPRESS_GO_AHEAD);
        let mut last_cr = false;
        for (i, &b) in data.iter().enumerate() {
            if last_cr && b == b'\n' && suppressed {
                return Some(i + 1);
            }
            last_cr = b == b'\r';

            if b == GA {
                return Some(i + 1);
            }
        }

        if at_eof {
            Some(data.len())
        } else {
            None
        }
    }

    /// 記錄送出的協商命令，樂觀地更新選項狀態
    fn track_outbound(&mut self, data: &[u8]) {
        let mut i = 0;
        while i < data.len() {
            if data[i] != IAC {
                i += 1;
                continue;
            }

            match data.get(i + 1).copied() {
                Some(SB) => match find_subnegotiation_end(data, i + 2) {
                    Some(end) => i = end,
                    None => break,
                },
                Some(byte) => match TelnetCommand::from_byte(byte) {
                    Some(verb) => {
                        if let Some(&option) = data.get(i + 2) {
                            self.mark_outbound(verb, option);
                        }
                        i += 3;
                    }
                    None => i += 2,
                },
                None => break,
            }
        }
    }

    fn mark_outbound(&mut self, verb: TelnetCommand, option: u8) {
        let (side, on) = match verb {
            TelnetCommand::Will => (Side::Local, true),
            TelnetCommand::Do => (Side::Remote, true),
            TelnetCommand::Wont => (Side::Local, false),
            TelnetCommand::Dont => (Side::Remote, false),
        };

        let current = self.options.get(side, option);
        if on && current.is_off() {
            self.options.set(side, option, OptionState::Enabling);
        } else if !on && current.is_on() {
            self.options.set(side, option, OptionState::Disabling);
        }
    }
}

impl<C: Read + Write> Nvt<C> {
    /// 送出資料
    ///
    /// 不是以 `IAC` 開頭的資料一律以單一個 CRLF 結尾。
    pub fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let framed = frame(data);
        self.track_outbound(&framed);
        self.conn.write_all(&framed)?;
        self.conn.flush()
    }

    /// 送出 `IAC WILL <option>`
    pub fn will(&mut self, option: u8) -> io::Result<()> {
        self.send(&TelnetCommand::Will.sequence(option))
    }

    /// 送出 `IAC WONT <option>`
    pub fn wont(&mut self, option: u8) -> io::Result<()> {
        self.send(&TelnetCommand::Wont.sequence(option))
    }

    /// 送出 `IAC DO <option>`
    pub fn do_(&mut self, option: u8) -> io::Result<()> {
        self.send(&TelnetCommand::Do.sequence(option))
    }

    /// 送出 `IAC DONT <option>`
    pub fn dont(&mut self, option: u8) -> io::Result<()> {
        self.send(&TelnetCommand::Dont.sequence(option))
    }

    /// 送出子協商 `IAC SB <option> <payload> IAC SE`
    pub fn subnegotiate(&mut self, option: u8, payload: &[u8]) -> io::Result<()> {
        self.send(&subnegotiation(option, payload))
    }

    fn reply(
        &mut self,
        received: TelnetCommand,
        reply: TelnetCommand,
        option: u8,
    ) -> Result<(), ProtocolError> {
        debug!(
            "協商: 收到 {} {}，回應 {}",
            received,
            TelnetOption::from_byte(option),
            reply
        );
        self.send(&reply.sequence(option))
            .map_err(|source| ProtocolError::Negotiation {
                received,
                reply,
                option: TelnetOption::from_byte(option),
                source,
            })
    }

    /// 回應收到的協商命令
    fn negotiate(&mut self, verb: TelnetCommand, option: u8) -> Result<(), ProtocolError> {
        match verb {
            TelnetCommand::Do => {
                if self.is_local_on(option) {
                    return Ok(());
                }
                if !self.policy.accepts(Side::Local, option) {
                    return self.reply(verb, TelnetCommand::Wont, option);
                }
                // 送出 WILL 時狀態已標記為 Enabling
                self.reply(verb, TelnetCommand::Will, option)
            }
            TelnetCommand::Will => {
                if self.is_remote_on(option) {
                    return Ok(());
                }
                if !self.policy.accepts(Side::Remote, option) {
                    return self.reply(verb, TelnetCommand::Dont, option);
                }
                self.reply(verb, TelnetCommand::Do, option)?;
                self.options
                    .set(Side::Remote, option, OptionState::Enabled);
                Ok(())
            }
            TelnetCommand::Dont => {
                if !self.is_local_on(option) {
                    return Ok(());
                }
                self.reply(verb, TelnetCommand::Wont, option)?;
                self.options
                    .set(Side::Local, option, OptionState::Disabled);
                Ok(())
            }
            TelnetCommand::Wont => {
                if !self.is_remote_on(option) {
                    return Ok(());
                }
                self.reply(verb, TelnetCommand::Dont, option)?;
                self.options
                    .set(Side::Remote, option, OptionState::Disabled);
                Ok(())
            }
        }
    }

    /// 把完整的命令交給回呼
    fn notify(&mut self, raw: &[u8]) -> io::Result<()> {
        let Some(mut f) = self.command_fn.take() else {
            return Ok(());
        };
        let result = f(raw, self);
        self.command_fn = Some(f);

        result.map_err(|e| ProtocolError::Command(e).into_io())
    }

    /// 從連線補充原始位元組，回傳讀到的數量（0 代表連線結束）
    fn fill(&mut self) -> io::Result<usize> {
        self.raw.resize(self.read_size, 0);
        self.raw_pos = 0;

        loop {
            match self.conn.read(&mut self.raw) {
                Ok(n) => {
                    self.raw.truncate(n);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.raw.clear();
                    return Err(e);
                }
            }
        }
    }

    /// 已有輸出時延後回報錯誤；WouldBlock 不需要保留
    fn fail(&mut self, count: usize, err: io::Error) -> io::Result<usize> {
        if count == 0 {
            return Err(err);
        }
        if err.kind() != io::ErrorKind::WouldBlock {
            self.deferred = Some(err);
        }
        Ok(count)
    }

    fn handle(&mut self, sequence: Sequence) -> io::Result<()> {
        match sequence {
            Sequence::Negotiation(verb, option) => {
                self.negotiate(verb, option)
                    .map_err(ProtocolError::into_io)?;
                self.notify(&verb.sequence(option))
            }
            Sequence::Subnegotiation(raw) => self.notify(&raw),
            Sequence::Invalid(raw) => {
                warn!("收到無效的命令序列: {}", hex(&raw));
                let notice = format!("[無效的 Telnet 命令序列: {}]\r\n", hex(&raw));
                self.diagnostics.extend(notice.into_bytes());
                Ok(())
            }
            // 這兩種由 read 直接輸出
            Sequence::Escaped | Sequence::GoAhead => Ok(()),
        }
    }
}

impl<C: Read + Write> Read for Nvt<C> {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        if buffer.is_empty() {
            return Ok(0);
        }

        let mut count = 0;
        while count < buffer.len() {
            if let Some(b) = self.diagnostics.pop_front() {
                buffer[count] = b;
                count += 1;
                continue;
            }

            if self.raw_pos >= self.raw.len() {
                match self.fill() {
                    Ok(0) => {
                        if !self.assembler.is_idle() {
                            let dropped = self.assembler.reset();
                            warn!("連線結束，丟棄未完成的命令序列: {}", hex(&dropped));
                        }
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => return self.fail(count, e),
                }
            }

            let b = self.raw[self.raw_pos];
            self.raw_pos += 1;

            if b != IAC && self.assembler.is_idle() {
                buffer[count] = b;
                count += 1;

                let boundary = self.last_cr && b == b'\n' && self.is_remote_on(SUPPRESS_GO_AHEAD);
                self.last_cr = b == b'\r';
                if boundary {
                    break;
                }
                continue;
            }

            let Some(sequence) = self.assembler.push(b) else {
                continue;
            };
            self.last_cr = false;

            match sequence {
                Sequence::Escaped => {
                    buffer[count] = IAC;
                    count += 1;
                }
                Sequence::GoAhead => {
                    buffer[count] = GA;
                    count += 1;
                    break;
                }
                other => {
                    if let Err(e) = self.handle(other) {
                        return self.fail(count, e);
                    }
                }
            }
        }

        Ok(count)
    }
}

impl<C: Read + Write> Write for Nvt<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.conn.flush()
    }
}

/// 補上 CRLF 結尾（以 `IAC` 開頭的命令除外）
fn frame(data: &[u8]) -> Cow<'_, [u8]> {
    if data.first() == Some(&IAC) {
        return Cow::Borrowed(data);
    }

    let body = data.strip_suffix(b"\r\n").unwrap_or(data);
    let mut framed = Vec::with_capacity(body.len() + 2);
    framed.extend_from_slice(body);
    framed.extend_from_slice(b"\r\n");
    Cow::Owned(framed)
}

/// 從 `start` 開始尋找未跳脫的 `IAC SE`，回傳其後的位置
fn find_subnegotiation_end(data: &[u8], start: usize) -> Option<usize> {
    let mut j = start;
    while j + 1 < data.len() {
        if data[j] == IAC {
            if data[j + 1] == SE {
                return Some(j + 2);
            }
            j += 2;
            continue;
        }
        j += 1;
    }
    None
}

/// 組出子協商序列，內容中的 `IAC` 會被跳脫
pub fn subnegotiation(option: u8, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 5);
    data.extend_from_slice(&[IAC, SB, option]);
    for &b in payload {
        if b == IAC {
            data.push(IAC);
        }
        data.push(b);
    }
    data.extend_from_slice(&[IAC, SE]);
    data
}
