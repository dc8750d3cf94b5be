//! 選項協商狀態
//!
//! Telnet 是對稱協定：雙方都可以各自啟用選項，
//! 所以每個選項都要分別記錄「我方」與「對方」的狀態。

/// 選項所屬的一方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// 我方（我們送出 WILL/WONT）
    Local,
    /// 對方（我們送出 DO/DONT）
    Remote,
}

/// 單一選項在單一方的狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptionState {
    /// 預設狀態，尚未達成啟用協議
    #[default]
    Disabled,
    /// 已送出請求，樂觀地視為啟用
    Enabling,
    /// 已啟用
    Enabled,
    /// 正在停用
    Disabling,
}

impl OptionState {
    /// 是否視為啟用中
    pub fn is_on(self) -> bool {
        matches!(self, Self::Enabled | Self::Enabling)
    }

    /// 是否視為停用中
    pub fn is_off(self) -> bool {
        !self.is_on()
    }
}

/// 每個連線的選項表，任何 (選項, 方) 組合都恰有一個狀態
#[derive(Debug, Clone)]
pub struct OptionTable {
    local: [OptionState; 256],
    remote: [OptionState; 256],
}

impl OptionTable {
    /// 創建所有選項皆停用的選項表
    pub fn new() -> Self {
        Self {
            local: [OptionState::Disabled; 256],
            remote: [OptionState::Disabled; 256],
        }
    }

    /// 查詢狀態
    pub fn get(&self, side: Side, option: u8) -> OptionState {
        match side {
            Side::Local => self.local[option as usize],
            Side::Remote => self.remote[option as usize],
        }
    }

    /// 設定狀態
    pub fn set(&mut self, side: Side, option: u8, state: OptionState) {
        match side {
            Side::Local => self.local[option as usize] = state,
            Side::Remote => self.remote[option as usize] = state,
        }
    }

    /// 選項在該方是否啟用
    pub fn is_on(&self, side: Side, option: u8) -> bool {
        self.get(side, option).is_on()
    }
}

impl Default for OptionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// 協商策略：哪些選項允許在哪一方啟用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationPolicy {
    /// 對方要求我方啟用時（DO）可以接受的選項
    pub local: Vec<u8>,
    /// 對方提議啟用時（WILL）可以接受的選項
    pub remote: Vec<u8>,
}

impl NegotiationPolicy {
    /// 該方是否接受此選項
    pub fn accepts(&self, side: Side, option: u8) -> bool {
        match side {
            Side::Local => self.local.contains(&option),
            Side::Remote => self.remote.contains(&option),
        }
    }
}

impl Default for NegotiationPolicy {
    fn default() -> Self {
        use super::protocol::{ECHO, GMCP, SUPPRESS_GO_AHEAD};

        Self {
            local: vec![ECHO],
            remote: vec![ECHO, SUPPRESS_GO_AHEAD, GMCP],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telnet::protocol::{ECHO, GMCP, SUPPRESS_GO_AHEAD};

    #[test]
    fn test_unknown_options_default_disabled() {
        let table = OptionTable::new();
        for option in 0..=255u8 {
            assert_eq!(table.get(Side::Local, option), OptionState::Disabled);
            assert_eq!(table.get(Side::Remote, option), OptionState::Disabled);
        }
    }

    #[test]
    fn test_sides_are_independent() {
        let mut table = OptionTable::new();
        table.set(Side::Remote, ECHO, OptionState::Enabled);

        assert!(table.is_on(Side::Remote, ECHO));
        assert!(!table.is_on(Side::Local, ECHO));
    }

    #[test]
    fn test_state_predicates() {
        assert!(OptionState::Enabling.is_on());
        assert!(OptionState::Enabled.is_on());
        assert!(OptionState::Disabling.is_off());
        assert!(OptionState::Disabled.is_off());
    }

    #[test]
    fn test_default_policy() {
        let policy = NegotiationPolicy::default();
        assert!(policy.accepts(Side::Local, ECHO));
        assert!(!policy.accepts(Side::Local, GMCP));
        assert!(policy.accepts(Side::Remote, SUPPRESS_GO_AHEAD));
        assert!(policy.accepts(Side::Remote, GMCP));
        assert!(!policy.accepts(Side::Remote, 24));
    }
}
