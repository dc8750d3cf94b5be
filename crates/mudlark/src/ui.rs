//! 終端機顯示端

use std::io::Write;

use mudlark_core::{Charset, Ui};
use tracing::{debug, warn};

const CONCEAL: &str = "\x1b[8m";
const REVEAL: &str = "\x1b[28m";

/// 把伺服器輸出解碼後寫到終端機
pub struct TerminalUi<W> {
    out: W,
    charset: Charset,
    masked: bool,
}

impl<W: Write> TerminalUi<W> {
    pub fn new(out: W, charset: Charset) -> Self {
        Self {
            out,
            charset,
            masked: false,
        }
    }

    /// 寫出一行；隱藏屬性只作用在使用者輸入，輸出期間暫時解除
    fn write_line(&mut self, text: &str) {
        let result = if self.masked {
            write!(self.out, "{}{}\n{}", REVEAL, text, CONCEAL)
        } else {
            writeln!(self.out, "{}", text)
        }
        .and_then(|_| self.out.flush());
        if let Err(e) = result {
            warn!("無法寫入終端機: {}", e);
        }
    }

    /// 切換 SGR 隱藏屬性，讓終端機不顯示接下來輸入的字元
    fn set_conceal(&mut self, on: bool) {
        if self.masked == on {
            return;
        }
        self.masked = on;

        let sgr = if on { CONCEAL } else { REVEAL };
        if let Err(e) = self.out.write_all(sgr.as_bytes()).and_then(|_| self.out.flush()) {
            warn!("無法寫入終端機: {}", e);
        }
    }
}

impl<W: Write> Ui for TerminalUi<W> {
    fn print(&mut self, line: &[u8]) {
        let text = self.charset.decode(line).into_owned();
        self.write_line(&text);
    }

    fn mask_input(&mut self) {
        debug!("隱藏輸入");
        self.set_conceal(true);
    }

    fn unmask_input(&mut self) {
        debug!("顯示輸入");
        self.set_conceal(false);
    }

    fn notice(&mut self, text: &str) {
        self.write_line(&format!("## {}", text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(ui: &TerminalUi<Vec<u8>>) -> String {
        String::from_utf8(ui.out.clone()).unwrap()
    }

    #[test]
    fn test_print_decodes_charset() {
        let mut ui = TerminalUi::new(Vec::new(), Charset::for_label("big5").unwrap());
        ui.print(&[0xa7, 0x41, 0xa6, 0x6e]);
        ui.print(b"plain");
        assert_eq!(written(&ui), "你好\nplain\n");
    }

    #[test]
    fn test_notice_is_marked() {
        let mut ui = TerminalUi::new(Vec::new(), Charset::default());
        ui.notice("伺服器已斷線");
        assert_eq!(written(&ui), "## 伺服器已斷線\n");
    }

    #[test]
    fn test_output_stays_visible_while_masked() {
        let mut ui = TerminalUi::new(Vec::new(), Charset::default());
        ui.mask_input();
        ui.print(b"Wrong password. Try again:");
        ui.notice("伺服器已斷線");
        assert!(ui.masked);
        assert_eq!(
            written(&ui),
            "\x1b[8m\x1b[28mWrong password. Try again:\n\x1b[8m\x1b[28m## 伺服器已斷線\n\x1b[8m"
        );

        ui.unmask_input();
        ui.print(b"Welcome back.");
        assert!(written(&ui).ends_with("\x1b[8m\x1b[28mWelcome back.\n"));
    }

    #[test]
    fn test_mask_toggle() {
        let mut ui = TerminalUi::new(Vec::new(), Charset::default());
        ui.mask_input();
        ui.mask_input();
        assert!(ui.masked);
        ui.unmask_input();
        assert!(!ui.masked);
        assert_eq!(written(&ui), "\x1b[8m\x1b[28m");
    }
}
