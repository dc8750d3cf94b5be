//! 連線引擎
//!
//! 把伺服器訊息、使用者輸入與協商命令匯集到同一個處理點：
//! 訊息切成行後交給觸發器，結果中的輸入送往伺服器，輸出交給畫面。

use std::future::Future;
use std::io::{self, Write};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::gmcp::{self, ClientMessage, CoreHello, CoreSupportsSet, Message};
use crate::inoutput::Inoutput;
use crate::telnet::{
    ChannelConn, ConnEvent, MessageReader, Nvt, TelnetCommand, ECHO, GA, GMCP,
};
use crate::trigger::TriggerSet;

/// 顯示端介面
pub trait Ui {
    /// 顯示一行輸出（不含換行）
    fn print(&mut self, line: &[u8]);

    /// 伺服器接手回顯，例如輸入密碼時
    fn mask_input(&mut self);

    /// 恢復本地回顯
    fn unmask_input(&mut self);

    /// 顯示用戶端自己的提示訊息
    fn notice(&mut self, text: &str) {
        self.print(text.as_bytes());
    }
}

/// 引擎設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// `Core.Hello` 中的用戶端名稱
    pub client_name: String,
    /// `Core.Hello` 中的版本
    pub client_version: String,
    /// 向伺服器宣告的 GMCP 模組
    pub gmcp_supports: Vec<(String, u32)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_name: "mudlark".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            gmcp_supports: vec![
                ("Char".to_string(), 1),
                ("Comm.Channel".to_string(), 1),
                ("Room".to_string(), 1),
            ],
        }
    }
}

/// 引擎錯誤
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("連線錯誤: {0}")]
    Io(#[from] io::Error),

    #[error("連線中斷: {0}")]
    ConnectionLost(#[source] io::Error),
}

/// 把訊息切成行
///
/// 結尾的 `GA` 與最後一個換行會被移除，行尾的 `\r` 也會去掉。
/// 只有 `GA` 的訊息不產生任何行。
pub fn split_lines(message: &[u8]) -> Vec<&[u8]> {
    let body = message.strip_suffix(&[GA]).unwrap_or(message);
    if body.is_empty() {
        return Vec::new();
    }
    let body = body.strip_suffix(b"\n").unwrap_or(body);

    body.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect()
}

/// 連線引擎
pub struct Engine<U> {
    ui: U,
    reader: MessageReader<ChannelConn>,
    triggers: TriggerSet,
    commands: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl<U: Ui> Engine<U> {
    /// 創建引擎
    ///
    /// 對方同意 GMCP 時會立即送出 `Core.Hello` 與 `Core.Supports.Set`。
    pub fn new(conn: ChannelConn, ui: U, triggers: TriggerSet, config: EngineConfig) -> Self {
        let (tx, commands) = mpsc::unbounded_channel();

        let hello = CoreHello {
            client: config.client_name,
            version: config.client_version,
        }
        .to_command();
        let supports = config
            .gmcp_supports
            .into_iter()
            .collect::<CoreSupportsSet>()
            .to_command();
        let will_gmcp = TelnetCommand::Will.sequence(GMCP);
        let wont_gmcp = TelnetCommand::Wont.sequence(GMCP);
        let mut gmcp_on = false;

        let mut nvt = Nvt::new(conn);
        nvt.set_command_fn(move |command, conn: &mut dyn Write| {
            // 重複的 WILL GMCP 不會再得到回應，握手也只送一次
            if command == will_gmcp && !gmcp_on {
                conn.write_all(&hello)?;
                conn.write_all(&supports)?;
                gmcp_on = true;
            } else if command == wont_gmcp {
                gmcp_on = false;
            }
            // 引擎結束後接收端已關閉，剩下的通知可以丟棄
            let _ = tx.send(command.to_vec());
            Ok(())
        });

        Self {
            ui,
            reader: MessageReader::new(nvt),
            triggers,
            commands,
        }
    }

    /// 觸發器
    pub fn triggers(&self) -> &TriggerSet {
        &self.triggers
    }

    /// 觸發器（可修改）
    pub fn triggers_mut(&mut self) -> &mut TriggerSet {
        &mut self.triggers
    }

    /// 顯示端
    pub fn ui(&self) -> &U {
        &self.ui
    }

    /// 執行到連線關閉、輸入結束或收到關閉信號
    pub async fn run<F>(
        mut self,
        events: &mut mpsc::Receiver<ConnEvent>,
        mut input: mpsc::Receiver<Vec<u8>>,
        shutdown: F,
    ) -> Result<U, EngineError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("收到關閉信號");
                    break;
                }
                event = events.recv() => match event {
                    Some(ConnEvent::Data(data)) => {
                        self.reader.nvt_mut().get_mut().feed(&data);
                        self.drain()?;
                    }
                    Some(ConnEvent::Failed(e)) => {
                        self.reader.nvt_mut().get_mut().close();
                        self.drain()?;
                        return Err(EngineError::ConnectionLost(e));
                    }
                    Some(ConnEvent::Closed) | None => {
                        self.reader.nvt_mut().get_mut().close();
                        self.drain()?;
                        info!("伺服器已斷線");
                        self.ui.notice("伺服器已斷線");
                        break;
                    }
                },
                line = input.recv() => match line {
                    Some(line) => self.process(Inoutput::from_input(line))?,
                    None => {
                        info!("輸入結束");
                        break;
                    }
                },
            }
        }

        Ok(self.ui)
    }

    /// 處理所有已完整的訊息，再處理期間收到的協商命令
    fn drain(&mut self) -> Result<(), EngineError> {
        loop {
            match self.reader.next_message() {
                Ok(Some(message)) => {
                    let lines = split_lines(&message);
                    if !lines.is_empty() {
                        self.process(Inoutput::from_output(lines))?;
                    }
                }
                Ok(None) => break,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }

        while let Ok(command) = self.commands.try_recv() {
            self.handle_command(&command);
        }
        Ok(())
    }

    fn handle_command(&mut self, command: &[u8]) {
        if command == TelnetCommand::Will.sequence(ECHO) {
            debug!("伺服器接手回顯");
            self.ui.mask_input();
        } else if command == TelnetCommand::Wont.sequence(ECHO) {
            debug!("恢復本地回顯");
            self.ui.unmask_input();
        } else if let Some(payload) = gmcp::unwrap(command) {
            match Message::parse(&payload) {
                Ok(message) => debug!("GMCP: {}", message),
                Err(e) => warn!("{}", e),
            }
        }
    }

    fn process(&mut self, inout: Inoutput) -> Result<(), EngineError> {
        let inout = match self.triggers.apply(inout) {
            Ok(inout) => inout,
            Err(interrupted) => {
                warn!("觸發器處理中斷，使用中斷前的結果: {}", interrupted.error);
                interrupted.inoutput
            }
        };
        self.dispatch(&inout)
    }

    fn dispatch(&mut self, inout: &Inoutput) -> Result<(), EngineError> {
        for line in inout.output.bytes() {
            self.ui.print(line);
        }
        for line in inout.input.bytes() {
            self.reader.nvt_mut().send(line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{repeat_input, split_input};
    use crate::inoutput::IoKind;
    use crate::telnet::{DO, IAC, SB, SE, WILL, WONT};
    use crate::trigger::Trigger;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct UiState {
        printed: Vec<String>,
        masked: bool,
        mask_calls: usize,
    }

    #[derive(Clone, Default)]
    struct MockUi(Arc<Mutex<UiState>>);

    impl Ui for MockUi {
        fn print(&mut self, line: &[u8]) {
            let mut state = self.0.lock().unwrap();
            state.printed.push(String::from_utf8_lossy(line).into_owned());
        }

        fn mask_input(&mut self) {
            let mut state = self.0.lock().unwrap();
            state.masked = true;
            state.mask_calls += 1;
        }

        fn unmask_input(&mut self) {
            self.0.lock().unwrap().masked = false;
        }
    }

    struct Harness {
        events: mpsc::Sender<ConnEvent>,
        input: mpsc::Sender<Vec<u8>>,
        outbound: mpsc::UnboundedReceiver<Vec<u8>>,
        ui: MockUi,
        engine: Engine<MockUi>,
        events_rx: mpsc::Receiver<ConnEvent>,
        input_rx: mpsc::Receiver<Vec<u8>>,
    }

    fn harness(triggers: TriggerSet) -> Harness {
        let (out_tx, outbound) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::channel(16);
        let (input, input_rx) = mpsc::channel(16);
        let ui = MockUi::default();
        let engine = Engine::new(
            ChannelConn::new(out_tx),
            ui.clone(),
            triggers,
            EngineConfig::default(),
        );
        Harness {
            events,
            input,
            outbound,
            ui,
            engine,
            events_rx,
            input_rx,
        }
    }

    fn sent(outbound: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
        let mut data = Vec::new();
        while let Ok(chunk) = outbound.try_recv() {
            data.extend(chunk);
        }
        data
    }

    #[test]
    fn test_split_lines() {
        let cases: Vec<(&str, &[u8], Vec<&str>)> = vec![
            ("prompt", &b"hp 100> \xf9"[..], vec!["hp 100> "]),
            ("crlf", &b"Hello\r\nWorld\r\n\xf9"[..], vec!["Hello", "World"]),
            ("bare lf", &b"a\nb"[..], vec!["a", "b"]),
            ("blank line", &b"\r\n"[..], vec![""]),
            ("ga only", &b"\xf9"[..], vec![]),
            ("empty", &b""[..], vec![]),
        ];

        for (name, message, expected) in cases {
            let lines: Vec<String> = split_lines(message)
                .into_iter()
                .map(|l| String::from_utf8_lossy(l).into_owned())
                .collect();
            assert_eq!(lines, expected, "{}", name);
        }
    }

    #[tokio::test]
    async fn test_output_reaches_ui() {
        let mut h = harness(TriggerSet::new());
        h.events
            .send(ConnEvent::Data(b"Hello\r\nWorld\r\n".to_vec()))
            .await
            .unwrap();
        h.events.send(ConnEvent::Closed).await.unwrap();

        h.engine
            .run(&mut h.events_rx, h.input_rx, std::future::pending())
            .await
            .unwrap();

        let state = h.ui.0.lock().unwrap();
        assert_eq!(state.printed, vec!["Hello", "World", "伺服器已斷線"]);
    }

    #[tokio::test]
    async fn test_input_passes_through_triggers() {
        let triggers: TriggerSet = [split_input(";"), repeat_input()].into_iter().collect();
        let mut h = harness(triggers);
        h.input.send(b"2 kick;look".to_vec()).await.unwrap();
        drop(h.input);

        h.engine
            .run(&mut h.events_rx, h.input_rx, std::future::pending())
            .await
            .unwrap();

        assert_eq!(sent(&mut h.outbound), b"kick\r\nkick\r\nlook\r\n");
    }

    #[tokio::test]
    async fn test_echo_negotiation_masks_input() {
        let mut h = harness(TriggerSet::new());
        let mut data = b"Password: ".to_vec();
        data.extend_from_slice(&[IAC, WILL, ECHO, IAC, GA]);
        h.events.send(ConnEvent::Data(data)).await.unwrap();
        h.events.send(ConnEvent::Closed).await.unwrap();

        let ui = h
            .engine
            .run(&mut h.events_rx, h.input_rx, std::future::pending())
            .await
            .unwrap();

        assert_eq!(sent(&mut h.outbound), vec![IAC, DO, ECHO]);
        let state = ui.0.lock().unwrap();
        assert!(state.masked);
        assert_eq!(state.printed[0], "Password: ");
    }

    #[tokio::test]
    async fn test_wont_echo_unmasks_input() {
        let mut h = harness(TriggerSet::new());
        h.events
            .send(ConnEvent::Data(vec![IAC, WILL, ECHO]))
            .await
            .unwrap();
        h.events
            .send(ConnEvent::Data(vec![IAC, WONT, ECHO]))
            .await
            .unwrap();
        h.events.send(ConnEvent::Closed).await.unwrap();

        h.engine
            .run(&mut h.events_rx, h.input_rx, std::future::pending())
            .await
            .unwrap();

        let state = h.ui.0.lock().unwrap();
        assert_eq!(state.mask_calls, 1);
        assert!(!state.masked);
    }

    #[tokio::test]
    async fn test_gmcp_handshake() {
        let mut h = harness(TriggerSet::new());
        h.events
            .send(ConnEvent::Data(vec![IAC, WILL, GMCP]))
            .await
            .unwrap();
        h.events.send(ConnEvent::Closed).await.unwrap();

        h.engine
            .run(&mut h.events_rx, h.input_rx, std::future::pending())
            .await
            .unwrap();

        let data = sent(&mut h.outbound);
        assert!(data.starts_with(&[IAC, DO, GMCP, IAC, SB, GMCP]));
        assert!(data.ends_with(&[IAC, SE]));

        let text = String::from_utf8_lossy(&data);
        assert!(text.contains("Core.Hello {\"client\":\"mudlark\""));
        assert!(text.contains("Core.Supports.Set [\"Char 1\",\"Comm.Channel 1\",\"Room 1\"]"));
        assert!(text.find("Core.Hello") < text.find("Core.Supports.Set"));
    }

    #[tokio::test]
    async fn test_repeated_will_gmcp_sends_handshake_once() {
        let mut h = harness(TriggerSet::new());
        h.events
            .send(ConnEvent::Data(vec![IAC, WILL, GMCP, IAC, WILL, GMCP]))
            .await
            .unwrap();
        h.events.send(ConnEvent::Closed).await.unwrap();

        h.engine
            .run(&mut h.events_rx, h.input_rx, std::future::pending())
            .await
            .unwrap();

        let text = String::from_utf8_lossy(&sent(&mut h.outbound)).into_owned();
        assert_eq!(text.matches("Core.Hello").count(), 1);
        assert_eq!(text.matches("Core.Supports.Set").count(), 1);
    }

    #[tokio::test]
    async fn test_output_trigger_sends_command() {
        let triggers: TriggerSet = [Trigger::new(
            "flee",
            IoKind::Output,
            "You are bleeding.",
            |_, inout| Ok(inout.add_input("flee")),
        )]
        .into_iter()
        .collect();
        let mut h = harness(triggers);
        h.events
            .send(ConnEvent::Data(b"You are bleeding.\r\n".to_vec()))
            .await
            .unwrap();
        h.events.send(ConnEvent::Closed).await.unwrap();

        h.engine
            .run(&mut h.events_rx, h.input_rx, std::future::pending())
            .await
            .unwrap();

        assert_eq!(sent(&mut h.outbound), b"flee\r\n");
    }

    #[tokio::test]
    async fn test_failing_trigger_keeps_partial_result() {
        let triggers: TriggerSet = [
            Trigger::new("tag", IoKind::Output, "*", |_, inout| {
                Ok(inout.add_output("tagged"))
            }),
            Trigger::new("broken", IoKind::Output, "*", |_, _| {
                Err("boom".into())
            }),
        ]
        .into_iter()
        .collect();
        let mut h = harness(triggers);
        h.events
            .send(ConnEvent::Data(b"line".to_vec()))
            .await
            .unwrap();
        h.events.send(ConnEvent::Closed).await.unwrap();

        h.engine
            .run(&mut h.events_rx, h.input_rx, std::future::pending())
            .await
            .unwrap();

        let state = h.ui.0.lock().unwrap();
        assert_eq!(state.printed, vec!["line", "tagged", "伺服器已斷線"]);
    }

    #[tokio::test]
    async fn test_connection_failure_is_reported() {
        let mut h = harness(TriggerSet::new());
        h.events
            .send(ConnEvent::Failed(io::Error::from(io::ErrorKind::ConnectionReset)))
            .await
            .unwrap();

        let result = h
            .engine
            .run(&mut h.events_rx, h.input_rx, std::future::pending())
            .await;

        assert!(matches!(result, Err(EngineError::ConnectionLost(_))));
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_engine() {
        let mut h = harness(TriggerSet::new());
        let _events = h.events;
        let _input = h.input;

        let result = h
            .engine
            .run(&mut h.events_rx, h.input_rx, std::future::ready(()))
            .await;

        assert!(result.is_ok());
    }
}
