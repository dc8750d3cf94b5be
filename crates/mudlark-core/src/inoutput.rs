//! 輸入輸出緩衝
//!
//! 一次處理流程中待送出的玩家輸入與待顯示的遊戲輸出。
//! 所有操作都不修改原值，而是回傳新的值。

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};

use crate::telnet::IAC;

/// ANSI SGR 顏色序列
static ANSI_SGR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("ANSI 樣式無效"));

/// 資料方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoKind {
    /// 玩家輸入
    Input,
    /// 伺服器輸出
    Output,
}

/// 一行文字與附帶的前後行
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Line {
    /// 原始文字（可能含 ANSI 序列）
    pub text: Vec<u8>,
    /// 在此行之前送出的行
    pub before: Vec<Vec<u8>>,
    /// 在此行之後送出的行
    pub after: Vec<Vec<u8>>,
    /// 被抑制，不會出現在最終輸出，但仍可被比對
    pub omitted: bool,
}

impl Line {
    /// 創建新的行
    pub fn new(text: impl Into<Vec<u8>>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// 移除 ANSI 顏色後的文字
    pub fn clean(&self) -> Cow<'_, [u8]> {
        ANSI_SGR.replace_all(&self.text, &b""[..])
    }
}

/// 有序的行集合
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Exput(Vec<Line>);

impl Exput {
    /// 創建空集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 行數
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否沒有任何行
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 所有行
    pub fn lines(&self) -> &[Line] {
        &self.0
    }

    /// 取得第 `i` 行
    pub fn get(&self, i: usize) -> Option<&Line> {
        self.0.get(i)
    }

    /// 在結尾加入一行
    pub fn add(&self, data: impl Into<Vec<u8>>) -> Self {
        let mut lines = self.0.clone();
        lines.push(Line::new(data));
        Self(lines)
    }

    /// 在位置 `i` 插入一行，之後的行往後移
    pub fn insert(&self, i: usize, data: impl Into<Vec<u8>>) -> Self {
        let mut lines = self.0.clone();
        if i <= lines.len() {
            lines.insert(i, Line::new(data));
        }
        Self(lines)
    }

    /// 移除第 `i` 行
    pub fn remove(&self, i: usize) -> Self {
        let mut lines = self.0.clone();
        if i < lines.len() {
            lines.remove(i);
        }
        Self(lines)
    }

    /// 移除去色後與 `data` 相同的行
    pub fn remove_matching(&self, data: &[u8]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|line| line.clean().as_ref() != data)
                .cloned()
                .collect(),
        )
    }

    /// 替換第 `i` 行的文字
    pub fn replace(&self, i: usize, data: impl Into<Vec<u8>>) -> Self {
        self.update(i, |line| line.text = data.into())
    }

    /// 抑制第 `i` 行
    pub fn omit(&self, i: usize) -> Self {
        self.update(i, |line| line.omitted = true)
    }

    /// 在第 `i` 行之前附加一行，不影響其他行的位置
    pub fn add_before(&self, i: usize, data: impl Into<Vec<u8>>) -> Self {
        self.update(i, |line| line.before.push(data.into()))
    }

    /// 在第 `i` 行之後附加一行，不影響其他行的位置
    pub fn add_after(&self, i: usize, data: impl Into<Vec<u8>>) -> Self {
        self.update(i, |line| line.after.push(data.into()))
    }

    /// 在第 `i` 行之後附加 `count` 行相同的文字
    pub fn repeat_after(&self, i: usize, data: &[u8], count: usize) -> Self {
        self.update(i, |line| line.after.extend((0..count).map(|_| data.to_vec())))
    }

    fn update(&self, i: usize, f: impl FnOnce(&mut Line)) -> Self {
        let mut lines = self.0.clone();
        if let Some(line) = lines.get_mut(i) {
            f(line);
        }
        Self(lines)
    }

    /// 依分隔符號切開每一行
    ///
    /// 第一段留在原位置，其餘依序緊接在後。`before` 留在第一段，
    /// `after` 移到最後一段。
    pub fn split(&self, sep: &[u8]) -> Self {
        if sep.is_empty() {
            return self.clone();
        }

        let mut lines = Vec::with_capacity(self.0.len());
        for line in &self.0 {
            let parts = split_bytes(&line.text, sep);
            if parts.len() == 1 {
                lines.push(line.clone());
                continue;
            }

            let last = parts.len() - 1;
            for (n, part) in parts.into_iter().enumerate() {
                lines.push(Line {
                    text: part.to_vec(),
                    before: if n == 0 { line.before.clone() } else { Vec::new() },
                    after: if n == last { line.after.clone() } else { Vec::new() },
                    omitted: line.omitted,
                });
            }
        }
        Self(lines)
    }

    /// 展開成最終送出的位元組序列，略過被抑制的行
    pub fn bytes(&self) -> Vec<&[u8]> {
        let mut out = Vec::new();
        for line in &self.0 {
            out.extend(line.before.iter().map(Vec::as_slice));
            if !line.omitted {
                out.push(line.text.as_slice());
            }
            out.extend(line.after.iter().map(Vec::as_slice));
        }
        out
    }
}

impl<T: Into<Vec<u8>>> FromIterator<T> for Exput {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Line::new).collect())
    }
}

fn split_bytes<'a>(data: &'a [u8], sep: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + sep.len() <= data.len() {
        if &data[i..i + sep.len()] == sep {
            parts.push(&data[start..i]);
            i += sep.len();
            start = i;
        } else {
            i += 1;
        }
    }
    parts.push(&data[start..]);
    parts
}

/// 一次處理流程中的輸入與輸出
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Inoutput {
    /// 待送出的玩家輸入
    pub input: Exput,
    /// 待顯示的伺服器輸出
    pub output: Exput,
}

impl Inoutput {
    /// 由輸入與輸出資料創建
    pub fn new<I, O>(input: I, output: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Vec<u8>>,
        O: IntoIterator,
        O::Item: Into<Vec<u8>>,
    {
        Self {
            input: input.into_iter().collect(),
            output: output.into_iter().collect(),
        }
    }

    /// 只有一行輸入
    pub fn from_input(data: impl Into<Vec<u8>>) -> Self {
        Self {
            input: Exput::new().add(data),
            output: Exput::new(),
        }
    }

    /// 只有輸出行
    pub fn from_output<O>(lines: O) -> Self
    where
        O: IntoIterator,
        O::Item: Into<Vec<u8>>,
    {
        Self {
            input: Exput::new(),
            output: lines.into_iter().collect(),
        }
    }

    /// 取得指定方向的行集合
    pub fn exput(&self, kind: IoKind) -> &Exput {
        match kind {
            IoKind::Input => &self.input,
            IoKind::Output => &self.output,
        }
    }

    /// 替換指定方向的行集合
    pub fn with_exput(mut self, kind: IoKind, exput: Exput) -> Self {
        match kind {
            IoKind::Input => self.input = exput,
            IoKind::Output => self.output = exput,
        }
        self
    }

    pub fn add_input(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.input = self.input.add(data);
        self
    }

    pub fn add_output(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.output = self.output.add(data);
        self
    }

    pub fn replace_input(mut self, i: usize, data: impl Into<Vec<u8>>) -> Self {
        self.input = self.input.replace(i, data);
        self
    }

    pub fn replace_output(mut self, i: usize, data: impl Into<Vec<u8>>) -> Self {
        self.output = self.output.replace(i, data);
        self
    }

    pub fn omit_input(mut self, i: usize) -> Self {
        self.input = self.input.omit(i);
        self
    }

    pub fn omit_output(mut self, i: usize) -> Self {
        self.output = self.output.omit(i);
        self
    }

    pub fn remove_input(mut self, i: usize) -> Self {
        self.input = self.input.remove(i);
        self
    }

    pub fn remove_output(mut self, i: usize) -> Self {
        self.output = self.output.remove(i);
        self
    }

    /// 輸出中是否有去色後與 `data` 相同的行
    pub fn has_output(&self, data: &[u8]) -> bool {
        self.output
            .lines()
            .iter()
            .any(|line| line.clean().as_ref() == data)
    }

    /// 輸出中以 `IAC` 開頭的 Telnet 命令
    pub fn commands(&self) -> Vec<&[u8]> {
        self.output
            .lines()
            .iter()
            .filter(|line| line.text.first() == Some(&IAC))
            .map(|line| line.text.as_slice())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(bytes: Vec<&[u8]>) -> Vec<String> {
        bytes
            .into_iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect()
    }

    fn texts(exput: &Exput) -> Vec<String> {
        strs(exput.lines().iter().map(|l| l.text.as_slice()).collect())
    }

    #[test]
    fn test_add() {
        let exput = Exput::new().add("asdf").add("qwer").add("zxcv");
        assert_eq!(texts(&exput), vec!["asdf", "qwer", "zxcv"]);
    }

    #[test]
    fn test_split_preserves_order() {
        let exput = Exput::new().add("asdf");
        assert_eq!(texts(&exput.split(b"d")), vec!["as", "f"]);

        let exput = Exput::new().add("asdf").add("qwer");
        assert_eq!(texts(&exput.split(b"d")), vec!["as", "f", "qwer"]);
    }

    #[test]
    fn test_split_inserts_after_line() {
        let exput = Exput::new().add("as;df;gh").add("qwer");
        assert_eq!(
            texts(&exput.split(b";")),
            vec!["as", "df", "gh", "qwer"]
        );
    }

    #[test]
    fn test_split_keeps_attachments_on_ends() {
        let exput = Exput::new()
            .add("a;b")
            .add_before(0, "pre")
            .add_after(0, "post");
        let split = exput.split(b";");

        assert_eq!(split.lines()[0].before, vec![b"pre".to_vec()]);
        assert!(split.lines()[0].after.is_empty());
        assert_eq!(split.lines()[1].after, vec![b"post".to_vec()]);
        assert_eq!(strs(split.bytes()), vec!["pre", "a", "b", "post"]);
    }

    #[test]
    fn test_split_with_empty_separator_is_noop() {
        let exput = Exput::new().add("asdf");
        assert_eq!(exput.split(b""), exput);
    }

    #[test]
    fn test_operations_do_not_mutate() {
        let original = Exput::new().add("asdf").add("qwer");
        let snapshot = original.clone();

        let _ = original.add("zxcv");
        let _ = original.add_before(0, "x");
        let _ = original.add_after(1, "y");
        let _ = original.replace(0, "replaced");
        let _ = original.split(b"s");
        let _ = original.omit(1);
        let _ = original.insert(0, "first");
        let _ = original.remove(0);
        let _ = original.remove_matching(b"asdf");

        assert_eq!(original, snapshot);
    }

    #[test]
    fn test_replace_keeps_positions() {
        let exput = Exput::new().add("a").add("b").add("c");
        let replaced = exput.replace(1, "B");
        assert_eq!(texts(&replaced), vec!["a", "B", "c"]);
    }

    #[test]
    fn test_bytes_order_and_omit() {
        let exput = Exput::new()
            .add("one")
            .add("two")
            .add("three")
            .add_before(1, "before two")
            .add_after(1, "after two")
            .omit(2);

        assert_eq!(
            strs(exput.bytes()),
            vec!["one", "before two", "two", "after two"]
        );
        // 被抑制的行仍保留
        assert_eq!(exput.len(), 3);
    }

    #[test]
    fn test_out_of_range_is_unchanged() {
        let exput = Exput::new().add("a");
        assert_eq!(exput.replace(5, "x"), exput);
        assert_eq!(exput.omit(5), exput);
        assert_eq!(exput.add_before(5, "x"), exput);
        assert_eq!(exput.remove(5), exput);
        assert_eq!(exput.insert(5, "x"), exput);
    }

    #[test]
    fn test_insert_and_remove() {
        let exput = Exput::new().add("a").add("c");
        let inserted = exput.insert(1, "b");
        assert_eq!(texts(&inserted), vec!["a", "b", "c"]);
        assert_eq!(texts(&inserted.remove(0)), vec!["b", "c"]);
        assert_eq!(texts(&exput.insert(2, "d")), vec!["a", "c", "d"]);
    }

    #[test]
    fn test_remove_matching_ignores_colors() {
        let exput = Exput::new().add("\x1b[31mhp low\x1b[0m").add("ok").add("hp low");
        assert_eq!(texts(&exput.remove_matching(b"hp low")), vec!["ok"]);
    }

    #[test]
    fn test_repeat_after() {
        let exput = Exput::new().add("a").add_after(0, "x").add("b");
        let repeated = exput.repeat_after(0, b"r", 2);
        assert_eq!(strs(repeated.bytes()), vec!["a", "x", "r", "r", "b"]);
        assert_eq!(exput.repeat_after(5, b"r", 2), exput);
    }

    #[test]
    fn test_ansi_pattern_strips_sgr() {
        assert!(ANSI_SGR.is_match(b"\x1b[0m"));
        assert!(!ANSI_SGR.is_match(b"plain [0m"));
    }

    #[test]
    fn test_clean() {
        let line = Line::new("\x1b[1;32mYou\x1b[m say hi.");
        assert_eq!(line.clean().as_ref(), b"You say hi.");

        let plain = Line::new("plain");
        assert!(matches!(plain.clean(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_inoutput_shortcuts() {
        let inout = Inoutput::from_input("look")
            .add_output("A room.")
            .add_input("north")
            .replace_input(0, "glance")
            .omit_output(0);

        assert_eq!(texts(&inout.input), vec!["glance", "north"]);
        assert!(inout.output.lines()[0].omitted);
        assert!(inout.has_output(b"A room."));
        assert!(inout.output.bytes().is_empty());
    }

    #[test]
    fn test_commands() {
        let inout = Inoutput::from_output(vec![
            b"text".to_vec(),
            vec![IAC, 251, 1],
            b"more".to_vec(),
        ]);
        assert_eq!(inout.commands(), vec![&[IAC, 251, 1][..]]);
    }

    #[test]
    fn test_exput_by_kind() {
        let inout = Inoutput::new(["in"], ["out"]);
        assert_eq!(texts(inout.exput(IoKind::Input)), vec!["in"]);

        let swapped = inout.with_exput(IoKind::Output, Exput::new().add("new"));
        assert_eq!(texts(swapped.exput(IoKind::Output)), vec!["new"]);
    }
}
