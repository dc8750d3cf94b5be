//! Telnet 協定模組
//!
//! 實作 Telnet 連線管理、選項協商與訊息切分

mod client;
mod nvt;
mod options;
mod protocol;
mod reader;

pub use client::{spawn_pumps, ChannelConn, ConnEvent, Pumps, TelnetClient, TelnetConfig, TelnetError};
pub use nvt::{subnegotiation, BoxError, CommandFn, Nvt, ProtocolError, DEFAULT_READ_SIZE};
pub use options::{NegotiationPolicy, OptionState, OptionTable, Side};
pub use protocol::{
    hex, CommandAssembler, Sequence, TelnetCommand, TelnetOption, DO, DONT, ECHO, GA, GMCP, IAC,
    SB, SE, SUPPRESS_GO_AHEAD, WILL, WONT,
};
pub use reader::{MessageReader, MAX_MESSAGE};
