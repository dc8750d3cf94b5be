//! MUD Core Library
//!
//! 提供 MUD 客戶端的核心功能：
//! - `telnet`: Telnet NVT 協商、訊息切分與 TCP 連線
//! - `pattern`: 簡易樣式比對
//! - `inoutput`: 輸入/輸出行的不可變模型
//! - `trigger`: 觸發器系統
//! - `builtin`: 內建觸發器與宣告式觸發動作
//! - `gmcp`: GMCP 訊息
//! - `encoding`: 文字編碼
//! - `engine`: 串接連線、觸發器與畫面的引擎

pub mod builtin;
pub mod encoding;
pub mod engine;
pub mod gmcp;
pub mod inoutput;
pub mod pattern;
pub mod telnet;
pub mod trigger;

pub use builtin::{repeat_input, split_input, TriggerAction};
pub use encoding::Charset;
pub use engine::{Engine, EngineConfig, EngineError, Ui};
pub use inoutput::{Exput, Inoutput, IoKind, Line};
pub use telnet::{Nvt, TelnetClient};
pub use trigger::{Match, Trigger, TriggerSet};
