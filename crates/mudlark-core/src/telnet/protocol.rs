//! Telnet 協定常數與控制序列組裝
//!
//! 實作 RFC 854 的命令位元組，以及把原始位元組逐一餵入、
//! 組合成完整控制序列的 [`CommandAssembler`]。

use std::fmt;

/// Telnet IAC (Interpret As Command) - 0xFF
pub const IAC: u8 = 255;
/// Don't
pub const DONT: u8 = 254;
/// Do
pub const DO: u8 = 253;
/// Won't
pub const WONT: u8 = 252;
/// Will
pub const WILL: u8 = 251;
/// Sub-negotiation Begin
pub const SB: u8 = 250;
/// Go Ahead，這裡當作訊息邊界使用
pub const GA: u8 = 249;
/// Sub-negotiation End
pub const SE: u8 = 240;

/// Echo 選項
pub const ECHO: u8 = 1;
/// Suppress Go Ahead 選項
pub const SUPPRESS_GO_AHEAD: u8 = 3;
/// GMCP (Generic MUD Communication Protocol)
pub const GMCP: u8 = 201;

/// 子協商內容的上限，超過視為未結束的序列
pub const MAX_SUBNEGOTIATION: usize = 64 * 1024;

/// 協商動詞
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TelnetCommand {
    /// Will
    Will = WILL,
    /// Won't
    Wont = WONT,
    /// Do
    Do = DO,
    /// Don't
    Dont = DONT,
}

impl TelnetCommand {
    /// 從位元組解析協商動詞
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            WILL => Some(Self::Will),
            WONT => Some(Self::Wont),
            DO => Some(Self::Do),
            DONT => Some(Self::Dont),
            _ => None,
        }
    }

    /// 獲取動詞的位元組值
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// 組出 `IAC <verb> <option>` 三位元組命令
    pub fn sequence(self, option: u8) -> [u8; 3] {
        [IAC, self.as_byte(), option]
    }
}

impl fmt::Display for TelnetCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Will => "WILL",
            Self::Wont => "WONT",
            Self::Do => "DO",
            Self::Dont => "DONT",
        };
        f.write_str(name)
    }
}

/// Telnet 選項（僅用於日誌與除錯顯示）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetOption {
    /// Echo
    Echo,
    /// Suppress Go Ahead
    SuppressGoAhead,
    /// Terminal Type
    TerminalType,
    /// Window Size (NAWS)
    Naws,
    /// MCCP2
    Mccp2,
    /// ATCP
    Atcp,
    /// GMCP
    Gmcp,
    /// 未知選項
    Unknown(u8),
}

impl TelnetOption {
    /// 從位元組解析 Telnet 選項
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            ECHO => Self::Echo,
            SUPPRESS_GO_AHEAD => Self::SuppressGoAhead,
            24 => Self::TerminalType,
            31 => Self::Naws,
            86 => Self::Mccp2,
            200 => Self::Atcp,
            GMCP => Self::Gmcp,
            other => Self::Unknown(other),
        }
    }

    /// 獲取選項的位元組值
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::Echo => ECHO,
            Self::SuppressGoAhead => SUPPRESS_GO_AHEAD,
            Self::TerminalType => 24,
            Self::Naws => 31,
            Self::Mccp2 => 86,
            Self::Atcp => 200,
            Self::Gmcp => GMCP,
            Self::Unknown(b) => *b,
        }
    }
}

impl fmt::Display for TelnetOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(b) => write!(f, "{}", b),
            known => write!(f, "{:?}", known),
        }
    }
}

/// 一個組裝完成的控制序列
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sequence {
    /// `IAC IAC`，代表一個字面上的 0xFF
    Escaped,
    /// `IAC GA`
    GoAhead,
    /// `IAC <WILL|WONT|DO|DONT> <option>`
    Negotiation(TelnetCommand, u8),
    /// `IAC SB <option> ... IAC SE`，保留完整原始位元組
    Subnegotiation(Vec<u8>),
    /// 無法辨識或過長的序列
    Invalid(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Command,
    Verb,
    Sub { iac: bool },
}

/// 控制序列組裝器
///
/// 逐位元組餵入 `IAC` 之後的資料，直到序列完整為止。
/// 序列完成或無效時緩衝區即被清空。
#[derive(Debug)]
pub struct CommandAssembler {
    buffer: Vec<u8>,
    stage: Stage,
}

impl CommandAssembler {
    /// 創建新的組裝器
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            stage: Stage::Idle,
        }
    }

    /// 是否沒有正在組裝的序列
    pub fn is_idle(&self) -> bool {
        self.stage == Stage::Idle
    }

    /// 目前已累積的位元組
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// 丟棄未完成的序列，回傳被丟棄的位元組
    pub fn reset(&mut self) -> Vec<u8> {
        self.stage = Stage::Idle;
        std::mem::take(&mut self.buffer)
    }

    /// 餵入一個位元組
    ///
    /// 閒置時只接受 `IAC`；其他位元組應由呼叫端當作一般文字處理。
    pub fn push(&mut self, byte: u8) -> Option<Sequence> {
        self.buffer.push(byte);

        match self.stage {
            Stage::Idle => {
                debug_assert_eq!(byte, IAC);
                self.stage = Stage::Command;
                None
            }
            Stage::Command => match byte {
                IAC => {
                    self.reset();
                    Some(Sequence::Escaped)
                }
                GA => {
                    self.reset();
                    Some(Sequence::GoAhead)
                }
                WILL | WONT | DO | DONT => {
                    self.stage = Stage::Verb;
                    None
                }
                SB => {
                    self.stage = Stage::Sub { iac: false };
                    None
                }
                _ => Some(Sequence::Invalid(self.reset())),
            },
            Stage::Verb => {
                let raw = self.reset();
                // Stage::Verb 只會在動詞位元組之後進入
                TelnetCommand::from_byte(raw[1])
                    .map(|verb| Sequence::Negotiation(verb, byte))
                    .or(Some(Sequence::Invalid(raw)))
            }
            Stage::Sub { iac } => {
                if iac && byte == SE {
                    return Some(Sequence::Subnegotiation(self.reset()));
                }

                // IAC IAC 在子協商中是跳脫的資料
                self.stage = Stage::Sub {
                    iac: !iac && byte == IAC,
                };

                if self.buffer.len() > MAX_SUBNEGOTIATION {
                    return Some(Sequence::Invalid(self.reset()));
                }
                None
            }
        }
    }
}

impl Default for CommandAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// 把位元組格式化為十六進位字串，用於診斷訊息
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(bytes: &[u8]) -> Vec<Sequence> {
        let mut assembler = CommandAssembler::new();
        bytes.iter().filter_map(|&b| assembler.push(b)).collect()
    }

    #[test]
    fn test_escaped_iac() {
        assert_eq!(feed(&[IAC, IAC]), vec![Sequence::Escaped]);
    }

    #[test]
    fn test_go_ahead() {
        assert_eq!(feed(&[IAC, GA]), vec![Sequence::GoAhead]);
    }

    #[test]
    fn test_negotiation() {
        assert_eq!(
            feed(&[IAC, WILL, ECHO]),
            vec![Sequence::Negotiation(TelnetCommand::Will, ECHO)]
        );
        assert_eq!(
            feed(&[IAC, DONT, 123]),
            vec![Sequence::Negotiation(TelnetCommand::Dont, 123)]
        );
    }

    #[test]
    fn test_subnegotiation_keeps_raw_bytes() {
        let raw = [IAC, SB, GMCP, b'x', IAC, IAC, b'y', IAC, SE];
        assert_eq!(feed(&raw), vec![Sequence::Subnegotiation(raw.to_vec())]);
    }

    #[test]
    fn test_escaped_se_does_not_terminate() {
        // IAC IAC SE：第二個 IAC 是資料，SE 不是結尾
        let mut assembler = CommandAssembler::new();
        for &b in &[IAC, SB, GMCP, IAC, IAC, SE] {
            assert_eq!(assembler.push(b), None);
        }
        assert!(!assembler.is_idle());
    }

    #[test]
    fn test_invalid_command() {
        assert_eq!(feed(&[IAC, 241]), vec![Sequence::Invalid(vec![IAC, 241])]);
    }

    #[test]
    fn test_oversized_subnegotiation() {
        let mut raw = vec![IAC, SB, GMCP];
        raw.resize(MAX_SUBNEGOTIATION + 1, b'x');
        let sequences = feed(&raw);
        assert_eq!(sequences.len(), 1);
        assert!(matches!(sequences[0], Sequence::Invalid(_)));
    }

    #[test]
    fn test_reset_returns_partial() {
        let mut assembler = CommandAssembler::new();
        assembler.push(IAC);
        assembler.push(DO);
        assert_eq!(assembler.reset(), vec![IAC, DO]);
        assert!(assembler.is_idle());
    }

    #[test]
    fn test_telnet_option_roundtrip() {
        for byte in 0..=255u8 {
            assert_eq!(TelnetOption::from_byte(byte).as_byte(), byte);
        }
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[IAC, 241]), "ff f1");
    }
}
