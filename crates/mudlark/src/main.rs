//! MUD Client 終端機應用程式

mod config;
mod ui;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use config::{ConfigError, Profile, ProfileStore};
use mudlark_core::encoding::Charset;
use mudlark_core::telnet::{TelnetClient, TelnetConfig, TelnetError};
use mudlark_core::{Engine, EngineConfig, EngineError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ui::TerminalUi;

#[derive(Parser, Debug)]
#[command(name = "mudlark", about = "終端機 MUD 客戶端", author, version)]
struct Cli {
    #[arg(value_name = "HOST", help = "伺服器位址（覆蓋 Profile 設定）")]
    host: Option<String>,

    #[arg(value_name = "PORT", help = "伺服器連接埠（覆蓋 Profile 設定）")]
    port: Option<u16>,

    #[arg(
        short,
        long,
        value_name = "NAME",
        help = "載入 <設定目錄>/mudlark/profiles/<NAME>.json"
    )]
    profile: Option<String>,

    #[arg(
        long,
        value_name = "PATH",
        conflicts_with = "profile",
        help = "從指定的 JSON 檔載入 Profile"
    )]
    profile_file: Option<PathBuf>,

    #[arg(long, value_name = "LABEL", help = "文字編碼（utf-8、big5 等）")]
    encoding: Option<String>,

    #[arg(long, help = "把命令列覆蓋後的設定存回 Profile")]
    save: bool,

    #[arg(long, help = "列出已儲存的 Profile 後結束")]
    list_profiles: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telnet(#[from] TelnetError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("未指定伺服器位址")]
    MissingHost,
}

#[tokio::main]
async fn main() -> ExitCode {
    // 日誌寫到 stderr，stdout 只放遊戲輸出
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("錯誤: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    if cli.list_profiles {
        let store = ProfileStore::open_default()?;
        for name in store.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut profile = load_profile(&cli)?;
    if let Some(host) = cli.host {
        profile.connection.host = host;
    }
    if let Some(port) = cli.port {
        profile.connection.port = port;
    }
    if let Some(encoding) = cli.encoding {
        profile.encoding = encoding;
    }
    if profile.connection.host.is_empty() {
        return Err(CliError::MissingHost);
    }
    if cli.save {
        match &cli.profile_file {
            Some(path) => profile.save(path)?,
            None => ProfileStore::open_default()?.save(&profile)?,
        }
        info!("已儲存 Profile '{}'", profile.name);
    }

    let charset = profile.charset()?;
    let triggers = profile.build_triggers()?;
    info!(
        "使用 Profile '{}'，編碼 {}，{} 個觸發器",
        profile.name,
        charset,
        triggers.len()
    );

    let client = TelnetClient::new(TelnetConfig::default());
    let (mut pumps, conn) = client
        .open(&profile.connection.host, profile.connection.port)
        .await?;

    let ui = TerminalUi::new(io::stdout(), charset);
    let engine = Engine::new(conn, ui, triggers, EngineConfig::default());

    let (input_tx, input_rx) = mpsc::channel(64);
    thread::spawn(move || read_stdin(input_tx, charset));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("無法監聽 Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let result = engine.run(&mut pumps.events, input_rx, shutdown).await;

    pumps.shutdown().await;
    result?;
    Ok(())
}

fn load_profile(cli: &Cli) -> Result<Profile, ConfigError> {
    if let Some(path) = &cli.profile_file {
        return Profile::load(path);
    }
    match &cli.profile {
        Some(name) => ProfileStore::open_default()?.load(name),
        None => Ok(Profile::default()),
    }
}

/// 把使用者輸入的每一行編碼後交給引擎
///
/// 標準輸入的讀取會阻塞，放在獨立執行緒。
fn read_stdin(input: mpsc::Sender<Vec<u8>>, charset: Charset) {
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("讀取輸入失敗: {}", e);
                break;
            }
        };
        if input.blocking_send(charset.encode(&line).into_owned()).is_err() {
            break;
        }
    }
}
