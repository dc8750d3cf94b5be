//! Telnet 客戶端
//!
//! 非同步連線管理。網路讀寫由兩個 tokio 任務負責，
//! 協定處理則透過 [`ChannelConn`] 在單一擁有者手上同步進行。

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Telnet 客戶端錯誤
#[derive(Debug, Error)]
pub enum TelnetError {
    #[error("連線失敗: {0}")]
    ConnectionFailed(#[from] io::Error),

    #[error("連線逾時")]
    Timeout,

    #[error("DNS 解析失敗: {0}")]
    DnsResolutionFailed(String),
}

/// Telnet 客戶端配置
#[derive(Debug, Clone)]
pub struct TelnetConfig {
    /// 連線逾時
    pub connect_timeout: Duration,
    /// 讀取緩衝區大小
    pub read_buffer_size: usize,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_buffer_size: 8192,
        }
    }
}

/// 讀取任務送出的連線事件
#[derive(Debug)]
pub enum ConnEvent {
    /// 收到原始位元組
    Data(Vec<u8>),
    /// 對方關閉連線
    Closed,
    /// 讀取失敗
    Failed(io::Error),
}

/// 由讀寫任務餵資料的同步連線
///
/// 讀取端的資料由呼叫者以 [`ChannelConn::feed`] 放入；沒有資料時回傳
/// `WouldBlock`，關閉後回傳 EOF。寫入的資料送往寫入任務。
#[derive(Debug)]
pub struct ChannelConn {
    inbound: VecDeque<u8>,
    closed: bool,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelConn {
    /// 以寫入通道創建連線
    pub fn new(outbound: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            inbound: VecDeque::new(),
            closed: false,
            outbound,
        }
    }

    /// 放入收到的位元組
    pub fn feed(&mut self, data: &[u8]) {
        self.inbound.extend(data);
    }

    /// 標記讀取端已結束
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// 讀取端是否已結束
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Read for ChannelConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inbound.is_empty() {
            if self.closed {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let n = buf.len().min(self.inbound.len());
        for (slot, b) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }
}

impl Write for ChannelConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "寫入任務已結束"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 執行中的讀寫任務
pub struct Pumps {
    /// 讀取任務送出的事件
    pub events: mpsc::Receiver<ConnEvent>,
    shutdown: watch::Sender<bool>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl Pumps {
    /// 通知兩個任務結束並等待
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.read_task.await {
            warn!("讀取任務結束異常: {}", e);
        }
        if let Err(e) = self.write_task.await {
            warn!("寫入任務結束異常: {}", e);
        }
    }
}

/// 為一組讀寫端啟動讀取與寫入任務
pub fn spawn_pumps<R, W>(reader: R, writer: W, buffer_size: usize) -> (Pumps, ChannelConn)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (event_tx, event_rx) = mpsc::channel(64);
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let read_task = tokio::spawn(read_loop(
        reader,
        buffer_size.max(1),
        event_tx,
        shutdown_rx.clone(),
    ));
    let write_task = tokio::spawn(write_loop(writer, out_rx, shutdown_rx));

    let pumps = Pumps {
        events: event_rx,
        shutdown: shutdown_tx,
        read_task,
        write_task,
    };
    (pumps, ChannelConn::new(out_tx))
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: R,
    buffer_size: usize,
    tx: mpsc::Sender<ConnEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buffer = vec![0u8; buffer_size];
    loop {
        tokio::select! {
            result = reader.read(&mut buffer) => {
                let event = match result {
                    Ok(0) => ConnEvent::Closed,
                    Ok(n) => ConnEvent::Data(buffer[..n].to_vec()),
                    Err(e) => {
                        error!("讀取錯誤: {}", e);
                        ConnEvent::Failed(e)
                    }
                };
                let finished = !matches!(event, ConnEvent::Data(_));

                if tx.send(event).await.is_err() {
                    warn!("接收端已關閉");
                    break;
                }
                if finished {
                    break;
                }
            }
            _ = shutdown.changed() => {
                info!("讀取任務收到關閉信號");
                break;
            }
        }
    }
    debug!("讀取任務結束");
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            data = rx.recv() => {
                let Some(data) = data else {
                    break;
                };
                let result = async {
                    writer.write_all(&data).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = result {
                    error!("寫入錯誤: {}", e);
                    break;
                }
            }
            _ = shutdown.changed() => {
                info!("寫入任務收到關閉信號");
                break;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("關閉寫入端失敗: {}", e);
    }
    debug!("寫入任務結束");
}

/// Telnet 客戶端
pub struct TelnetClient {
    config: TelnetConfig,
}

impl TelnetClient {
    /// 創建新的 Telnet 客戶端
    pub fn new(config: TelnetConfig) -> Self {
        Self { config }
    }

    /// 客戶端配置
    pub fn config(&self) -> &TelnetConfig {
        &self.config
    }

    /// 連線到 MUD 伺服器
    ///
    /// # Arguments
    /// * `host` - 主機名稱或 IP
    /// * `port` - 連接埠
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, TelnetError> {
        info!("正在連線到 {}:{}", host, port);

        let addr = format!("{}:{}", host, port);
        let socket_addrs: Vec<SocketAddr> = tokio::net::lookup_host(&addr)
            .await
            .map_err(|e| TelnetError::DnsResolutionFailed(e.to_string()))?
            .collect();

        let Some(target) = socket_addrs.first() else {
            return Err(TelnetError::DnsResolutionFailed(format!(
                "無法解析主機: {}",
                host
            )));
        };
        debug!("已解析到位址: {:?}", socket_addrs);

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| TelnetError::Timeout)?
            .map_err(TelnetError::ConnectionFailed)?;

        stream.set_nodelay(true)?;

        info!("已連線到 {}:{}", host, port);
        Ok(stream)
    }

    /// 連線並啟動讀寫任務
    pub async fn open(&self, host: &str, port: u16) -> Result<(Pumps, ChannelConn), TelnetError> {
        let stream = self.connect(host, port).await?;
        let (reader, writer) = stream.into_split();
        Ok(spawn_pumps(reader, writer, self.config.read_buffer_size))
    }
}

impl Default for TelnetClient {
    fn default() -> Self {
        Self::new(TelnetConfig::default())
    }
}
