//! Trigger（觸發器）模組
//!
//! 以樣式比對待處理的輸入或輸出行，符合時呼叫回呼改寫 [`Inoutput`]。
//! 觸發器依註冊順序逐一套用，每個回呼都看得到前面觸發器的結果。

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::inoutput::{Exput, Inoutput, IoKind};
use crate::pattern;
use crate::telnet::BoxError;

/// 觸發器回呼
pub type Callback = Arc<dyn Fn(&[Match], Inoutput) -> Result<Inoutput, BoxError> + Send + Sync>;

/// 單行的比對結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// 比對的方向
    pub kind: IoKind,
    /// 擷取內容，依樣式中的順序
    pub captures: Vec<Vec<u8>>,
    /// 符合的行在 [`Exput`] 中的位置
    pub index: usize,
    /// 符合的樣式在觸發器中的位置
    pub pattern: usize,
}

impl Match {
    /// 第 `n` 個擷取（從 0 開始）
    pub fn capture(&self, n: usize) -> Option<&[u8]> {
        self.captures.get(n).map(Vec::as_slice)
    }
}

/// 觸發器失敗
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("觸發器 '{trigger}' 執行失敗: {source}")]
    Callback {
        trigger: String,
        #[source]
        source: BoxError,
    },

    #[error("觸發器 '{trigger}' 發生 panic: {message}")]
    Panicked { trigger: String, message: String },
}

impl TriggerError {
    /// 失敗的觸發器名稱
    pub fn trigger(&self) -> &str {
        match self {
            Self::Callback { trigger, .. } | Self::Panicked { trigger, .. } => trigger,
        }
    }
}

/// 處理中斷，保留中斷前已套用的結果
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Interrupted {
    #[source]
    pub error: TriggerError,
    /// 失敗前最後一個成功的結果
    pub inoutput: Inoutput,
}

/// 觸發器定義
#[derive(Clone)]
pub struct Trigger {
    /// 觸發器名稱
    pub name: String,
    /// 比對輸入或輸出
    pub kind: IoKind,
    /// 樣式列表，每行取第一個符合的
    pub patterns: Vec<Vec<u8>>,
    /// 是否啟用
    pub enabled: bool,
    callback: Callback,
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field(
                "patterns",
                &self
                    .patterns
                    .iter()
                    .map(|p| String::from_utf8_lossy(p))
                    .collect::<Vec<_>>(),
            )
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl Trigger {
    /// 創建新的觸發器
    pub fn new<F>(
        name: impl Into<String>,
        kind: IoKind,
        pattern: impl Into<Vec<u8>>,
        callback: F,
    ) -> Self
    where
        F: Fn(&[Match], Inoutput) -> Result<Inoutput, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            patterns: vec![pattern.into()],
            enabled: true,
            callback: Arc::new(callback),
        }
    }

    /// 添加樣式
    pub fn with_pattern(mut self, pattern: impl Into<Vec<u8>>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// 找出所有符合的行
    ///
    /// 比對去色後的文字，被抑制的行也會比對。
    pub fn find_matches(&self, exput: &Exput) -> Vec<Match> {
        let mut matches = Vec::new();

        for (index, line) in exput.lines().iter().enumerate() {
            let clean = line.clean();
            for (n, pattern) in self.patterns.iter().enumerate() {
                if let Some(captures) = pattern::matches(pattern, &clean) {
                    matches.push(Match {
                        kind: self.kind,
                        captures: captures.into_iter().map(<[u8]>::to_vec).collect(),
                        index,
                        pattern: n,
                    });
                    break;
                }
            }
        }

        matches
    }

    /// 套用觸發器
    ///
    /// 沒有任何符合時原樣回傳，不呼叫回呼。
    pub fn apply(&self, inout: Inoutput) -> Result<Inoutput, TriggerError> {
        let exput = inout.exput(self.kind);
        if exput.is_empty() {
            return Ok(inout);
        }

        let matches = self.find_matches(exput);
        if matches.is_empty() {
            return Ok(inout);
        }
        self.invoke(&matches, inout)
    }

    fn invoke(&self, matches: &[Match], inout: Inoutput) -> Result<Inoutput, TriggerError> {
        debug!("觸發器 '{}' 符合 {} 行", self.name, matches.len());

        let callback = &self.callback;
        match catch_unwind(AssertUnwindSafe(|| callback(matches, inout))) {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(source)) => Err(TriggerError::Callback {
                trigger: self.name.clone(),
                source,
            }),
            Err(payload) => Err(TriggerError::Panicked {
                trigger: self.name.clone(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知的 panic".to_string()
    }
}

/// 觸發器集合，保持註冊順序
#[derive(Debug, Clone, Default)]
pub struct TriggerSet {
    triggers: Vec<Trigger>,
}

impl TriggerSet {
    /// 創建新的觸發器集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加觸發器；同名時原地取代
    pub fn add(&mut self, trigger: Trigger) {
        match self.triggers.iter_mut().find(|t| t.name == trigger.name) {
            Some(existing) => *existing = trigger,
            None => self.triggers.push(trigger),
        }
    }

    /// 移除觸發器
    pub fn remove(&mut self, name: &str) -> Option<Trigger> {
        let pos = self.triggers.iter().position(|t| t.name == name)?;
        Some(self.triggers.remove(pos))
    }

    /// 獲取觸發器
    pub fn get(&self, name: &str) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.name == name)
    }

    /// 獲取可變觸發器
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Trigger> {
        self.triggers.iter_mut().find(|t| t.name == name)
    }

    /// 啟用或停用觸發器，回傳是否找到
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.get_mut(name) {
            Some(trigger) => {
                trigger.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// 依註冊順序列出所有觸發器
    pub fn list(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// 依序套用所有啟用中的觸發器
    ///
    /// 第一個失敗的觸發器會中止處理，錯誤中帶有到那時為止的結果。
    pub fn apply(&self, mut inout: Inoutput) -> Result<Inoutput, Interrupted> {
        for trigger in self.triggers.iter().filter(|t| t.enabled) {
            let matches = trigger.find_matches(inout.exput(trigger.kind));
            if matches.is_empty() {
                continue;
            }

            let snapshot = inout.clone();
            inout = trigger
                .invoke(&matches, inout)
                .map_err(|error| Interrupted {
                    error,
                    inoutput: snapshot,
                })?;
        }
        Ok(inout)
    }
}

impl FromIterator<Trigger> for TriggerSet {
    fn from_iter<I: IntoIterator<Item = Trigger>>(iter: I) -> Self {
        let mut set = Self::new();
        for trigger in iter {
            set.add(trigger);
        }
        set
    }
}
