//! LSP client subsystem: framed JSON-RPC transport, one protocol client per
//! language-server subprocess, and a bounded per-language session pool.

mod client;
mod codec;
mod commands;
mod pool;
mod protocol;

pub use client::ProtocolClient;
pub use codec::{FrameReader, FrameWriter};
pub use commands::{ServerCommand, server_command};
pub use pool::{
    CommandLauncher, LaunchedSession, Launcher, PoolConfig, SessionHandle, SessionPool,
    SessionStatus,
};
pub use protocol::{
    PathToUriError, SymbolInformation, SymbolLocation, SymbolPosition, SymbolRange,
    file_uri_to_path, parse_symbol, path_to_file_uri,
};
