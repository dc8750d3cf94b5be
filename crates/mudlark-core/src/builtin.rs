//! 內建觸發器與宣告式觸發動作

use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

use crate::inoutput::{Exput, Inoutput, IoKind};
use crate::trigger::{Match, Trigger};

/// 以分隔符號切開輸入，例如 `"n;e;s"` 變成三個命令
pub fn split_input(sep: impl Into<Vec<u8>>) -> Trigger {
    let sep = sep.into();
    Trigger::new("split-input", IoKind::Input, "*", move |_, inout| {
        let input = trim_lines(inout.input.split(&sep));
        Ok(inout.with_exput(IoKind::Input, input))
    })
}

fn trim_lines(mut exput: Exput) -> Exput {
    for i in 0..exput.len() {
        let Some(line) = exput.get(i) else {
            continue;
        };
        let trimmed = line.text.trim_ascii();
        if trimmed.len() != line.text.len() {
            let trimmed = trimmed.to_vec();
            exput = exput.replace(i, trimmed);
        }
    }
    exput
}

/// 單行命令可重複的最大次數
pub const MAX_REPEAT: usize = 1000;

/// 展開數字前綴，例如 `"3 kick"` 變成三次 `kick`；`0` 會抑制該行
///
/// 超過 [`MAX_REPEAT`] 的次數不展開，整行原樣送出。
pub fn repeat_input() -> Trigger {
    Trigger::new("repeat-input", IoKind::Input, "{^} {*}", |matches, inout| {
        let mut input = inout.input.clone();
        for m in matches {
            let (Some(count), Some(command)) = (m.capture(0), m.capture(1)) else {
                continue;
            };
            let Some(count) = parse_count(count) else {
                continue;
            };

            if count == 0 {
                input = input.omit(m.index);
                continue;
            }
            if count > MAX_REPEAT {
                warn!("重複次數 {} 超過上限 {}，不展開", count, MAX_REPEAT);
                continue;
            }

            input = input
                .replace(m.index, command)
                .repeat_after(m.index, command, count - 1);
        }
        Ok(inout.with_exput(IoKind::Input, input))
    })
}

fn parse_count(digits: &[u8]) -> Option<usize> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// 觸發動作解析錯誤
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("未知的觸發動作: {0}")]
    Unknown(String),

    #[error("觸發動作 '{0}' 缺少內容")]
    MissingTemplate(String),
}

/// 宣告式觸發動作
///
/// 文字格式為 `send:<樣板>`、`gag`、`replace:<樣板>`、`echo:<樣板>`；
/// 樣板中的 `$1`..`$9` 會換成對應的擷取內容。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
    /// 送出命令到伺服器
    Send(String),
    /// 抑制符合的行
    Gag,
    /// 取代符合的行
    Replace(String),
    /// 在畫面上附加一行
    Echo(String),
}

impl FromStr for TriggerAction {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (verb, template) = match s.split_once(':') {
            Some((verb, template)) => (verb.trim(), Some(template)),
            None => (s.trim(), None),
        };

        let template = |verb: &str| {
            template
                .map(str::to_string)
                .ok_or_else(|| ActionError::MissingTemplate(verb.to_string()))
        };

        match verb {
            "send" => Ok(Self::Send(template(verb)?)),
            "gag" => Ok(Self::Gag),
            "replace" => Ok(Self::Replace(template(verb)?)),
            "echo" => Ok(Self::Echo(template(verb)?)),
            other => Err(ActionError::Unknown(other.to_string())),
        }
    }
}

impl TriggerAction {
    /// 建立執行此動作的觸發器
    pub fn into_trigger(
        self,
        name: impl Into<String>,
        kind: IoKind,
        pattern: impl Into<Vec<u8>>,
    ) -> Trigger {
        Trigger::new(name, kind, pattern, move |matches, inout| {
            Ok(self.perform(matches, inout))
        })
    }

    fn perform(&self, matches: &[Match], mut inout: Inoutput) -> Inoutput {
        for m in matches {
            inout = match self {
                Self::Send(template) => inout.add_input(expand(template, m)),
                Self::Gag => {
                    let exput = inout.exput(m.kind).omit(m.index);
                    inout.with_exput(m.kind, exput)
                }
                Self::Replace(template) => {
                    let exput = inout.exput(m.kind).replace(m.index, expand(template, m));
                    inout.with_exput(m.kind, exput)
                }
                Self::Echo(template) => match m.kind {
                    IoKind::Output => {
                        let output = inout.output.add_after(m.index, expand(template, m));
                        inout.with_exput(IoKind::Output, output)
                    }
                    IoKind::Input => inout.add_output(expand(template, m)),
                },
            };
        }
        inout
    }
}

/// 把樣板中的 `$1`..`$9` 換成擷取內容，不存在的擷取換成空字串
pub fn expand(template: &str, m: &Match) -> Vec<u8> {
    let bytes = template.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'$' {
            if let Some(&digit @ b'1'..=b'9') = bytes.get(i + 1) {
                let n = usize::from(digit - b'1');
                out.extend_from_slice(m.capture(n).unwrap_or_default());
                i += 2;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    out
}
