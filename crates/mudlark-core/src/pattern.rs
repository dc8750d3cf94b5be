//! 簡易樣式比對
//!
//! 觸發器使用的小型樣式語言，整行錨定比對：
//!
//! - 一般位元組必須完全相同
//! - `{` `}` 包住擷取群組
//! - `?` 比對任一位元組
//! - `^` 比對一段英數字（一個「字」）
//! - `*` 比對到下一段字面文字第一次出現的位置；在結尾時吃掉剩下的全部
//! - 連續兩個特殊字元（`{{` `}}` `??` `^^` `**`）代表該字元本身
//!
//! 比對是純函式，不會失敗；不符合時回傳 `None`，
//! 擷取結果直接借用輸入文字。

/// 比對樣式與文字
///
/// 符合時回傳依樣式順序排列的擷取片段（沒有擷取群組時為空 `Vec`）。
///
/// ```
/// use mudlark_core::pattern::matches;
///
/// let captures = matches(b"Lorem {^} dolor", b"Lorem ipsum dolor");
/// assert_eq!(captures, Some(vec![&b"ipsum"[..]]));
/// ```
pub fn matches<'t>(pattern: &[u8], text: &'t [u8]) -> Option<Vec<&'t [u8]>> {
    let mut captures = Vec::new();
    let mut capture: Option<usize> = None;
    let mut p = 0;
    let mut t = 0;

    while p < pattern.len() && t < text.len() {
        let b = pattern[p];

        if is_special(b) && is_escaped(pattern, p) {
            if text[t] != b {
                return None;
            }
            p += 2;
            t += 1;
            continue;
        }

        match b {
            b'{' => {
                capture = Some(t);
                p += 1;
            }
            b'}' => {
                if let Some(start) = capture.take() {
                    captures.push(&text[start..t]);
                }
                p += 1;
            }
            b'?' => {
                p += 1;
                t += 1;
            }
            b'^' => {
                let run = alphanumeric_run(&text[t..]);
                let suffix = alphanumeric_run(&pattern[p + 1..]);
                if run <= suffix {
                    return None;
                }
                // 緊接在 ^ 後的英數字必須是這個字的結尾
                let word = &text[t..t + run];
                if !word.ends_with(&pattern[p + 1..p + 1 + suffix]) {
                    return None;
                }
                p += 1;
                t += run - suffix;
            }
            b'*' => {
                let anchor = Anchor::after(pattern, p + 1);
                if anchor.clone().next().is_none() {
                    t = text.len();
                } else {
                    t += anchor.find_in(&text[t..])?;
                }
                p += 1;
            }
            _ => {
                if text[t] != b {
                    return None;
                }
                p += 1;
                t += 1;
            }
        }
    }

    if t < text.len() {
        return None;
    }

    // 文字用完後，剩下的樣式只能是不需要文字的元素
    while p < pattern.len() {
        let b = pattern[p];
        if is_special(b) && is_escaped(pattern, p) {
            return None;
        }
        match b {
            b'{' => capture = Some(t),
            b'}' => {
                if let Some(start) = capture.take() {
                    captures.push(&text[start..t]);
                }
            }
            b'*' => {}
            _ => return None,
        }
        p += 1;
    }

    Some(captures)
}

fn is_special(b: u8) -> bool {
    matches!(b, b'{' | b'}' | b'?' | b'^' | b'*')
}

/// `pattern[pos]` 的特殊字元是否被重複而成為字面字元
///
/// `{` 依整段連續長度的奇偶決定：奇數時第一個開啟擷取。
fn is_escaped(pattern: &[u8], pos: usize) -> bool {
    let b = pattern[pos];
    if b == b'{' {
        let run = pattern[pos..].iter().take_while(|&&c| c == b'{').count();
        return run % 2 == 0;
    }
    pattern.get(pos + 1) == Some(&b)
}

fn alphanumeric_run(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric())
        .count()
}

/// `*` 之後的錨點：跳過特殊字元後的第一段字面文字，逐位元組解除跳脫
#[derive(Clone)]
struct Anchor<'p> {
    pattern: &'p [u8],
    pos: usize,
}

impl<'p> Anchor<'p> {
    fn after(pattern: &'p [u8], mut pos: usize) -> Self {
        while pos < pattern.len() && is_special(pattern[pos]) && !is_escaped(pattern, pos) {
            pos += 1;
        }
        Self { pattern, pos }
    }

    /// 錨點在文字中第一次出現的位置
    fn find_in(self, text: &[u8]) -> Option<usize> {
        (0..text.len()).find(|&start| {
            let mut rest = text[start..].iter();
            self.clone().all(|b| rest.next() == Some(&b))
        })
    }
}

impl Iterator for Anchor<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let b = *self.pattern.get(self.pos)?;
        if !is_special(b) {
            self.pos += 1;
            return Some(b);
        }
        if is_escaped(self.pattern, self.pos) {
            self.pos += 2;
            return Some(b);
        }
        None
    }
}
