//! 設定檔持久化模組
//!
//! 每個帳號/伺服器一個 `Profile`，以 JSON 存在
//! `<config_dir>/mudlark/profiles/<name>.json`。

use std::fs;
use std::path::{Path, PathBuf};

use mudlark_core::builtin::{repeat_input, split_input, ActionError, TriggerAction};
use mudlark_core::encoding::{Charset, UnknownCharset};
use mudlark_core::{IoKind, Trigger, TriggerSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 設定錯誤
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("無法存取設定檔 {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("設定檔 {path} 格式錯誤: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("觸發器 '{name}' 設定錯誤: {source}")]
    InvalidTrigger {
        name: String,
        #[source]
        source: ActionError,
    },

    #[error(transparent)]
    Charset(#[from] UnknownCharset),

    #[error("找不到設定目錄")]
    NoConfigDir,
}

/// 觸發器設定（可序列化版本）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub name: String,
    /// 比對輸入或輸出
    #[serde(default = "default_kind")]
    pub kind: IoKind,
    pub pattern: String,
    /// `send:<樣板>`、`gag`、`replace:<樣板>`、`echo:<樣板>`
    pub action: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl TriggerConfig {
    /// 建立觸發器
    pub fn to_trigger(&self) -> Result<Trigger, ConfigError> {
        let action: TriggerAction =
            self.action
                .parse()
                .map_err(|source| ConfigError::InvalidTrigger {
                    name: self.name.clone(),
                    source,
                })?;

        let mut trigger = action.into_trigger(self.name.as_str(), self.kind, self.pattern.as_str());
        trigger.enabled = self.enabled;
        Ok(trigger)
    }
}

/// 連線設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_kind() -> IoKind {
    IoKind::Output
}

fn default_port() -> u16 {
    23
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_separator() -> String {
    ";".to_string()
}

/// 單一帳號/伺服器的完整設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile 識別名稱（用於檔名，僅限 ASCII）
    pub name: String,
    /// 顯示名稱（可含中文）
    #[serde(default)]
    pub display_name: String,
    /// 連線資訊
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// 伺服器使用的文字編碼（WHATWG 標籤）
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// 輸入的命令分隔符號，空字串代表不切分
    #[serde(default = "default_separator")]
    pub split_input: String,
    /// 是否展開 `"3 kick"` 這類重複命令
    #[serde(default = "default_true")]
    pub repeat_input: bool,
    /// Profile 專屬觸發器
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            display_name: "預設".to_string(),
            connection: ConnectionConfig::default(),
            encoding: default_encoding(),
            split_input: default_separator(),
            repeat_input: true,
            triggers: Vec::new(),
        }
    }
}

impl Profile {
    /// 建立新 Profile
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            ..Default::default()
        }
    }

    /// 設定連線資訊
    pub fn with_connection(mut self, host: &str, port: u16) -> Self {
        self.connection = ConnectionConfig {
            host: host.to_string(),
            port,
        };
        self
    }

    /// 從檔案載入
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 儲存到檔案
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        ensure_parent_dir(path).map_err(io_error)?;
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(io_error)
    }

    /// 文字編碼
    pub fn charset(&self) -> Result<Charset, ConfigError> {
        Ok(Charset::for_label(&self.encoding)?)
    }

    /// 依設定建立觸發器，內建的輸入處理排在最前面
    pub fn build_triggers(&self) -> Result<TriggerSet, ConfigError> {
        let mut triggers = TriggerSet::new();
        if !self.split_input.is_empty() {
            triggers.add(split_input(self.split_input.as_str()));
        }
        if self.repeat_input {
            triggers.add(repeat_input());
        }
        for config in &self.triggers {
            triggers.add(config.to_trigger()?);
        }
        Ok(triggers)
    }
}

/// Profile 存放目錄
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    /// 使用指定目錄
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// 使用系統設定目錄
    pub fn open_default() -> Result<Self, ConfigError> {
        Ok(Self::new(config_dir()?.join("profiles")))
    }

    /// Profile 檔案路徑
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// 載入 Profile
    pub fn load(&self, name: &str) -> Result<Profile, ConfigError> {
        Profile::load(&self.path(name))
    }

    /// 新增或更新 Profile
    pub fn save(&self, profile: &Profile) -> Result<(), ConfigError> {
        profile.save(&self.path(&profile.name))
    }

    /// 取得 Profile 名稱列表（排序）
    pub fn names(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut names: Vec<String> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| Some(path.file_stem()?.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }
}

/// 獲取設定目錄
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("mudlark"))
        .ok_or(ConfigError::NoConfigDir)
}

/// 確保目錄存在
fn ensure_parent_dir(path: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
