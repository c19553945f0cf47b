use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;

use crate::{
    client::ClientConfig,
    codec::DEFAULT_MAX_FRAME_LEN,
    server::{EchoPolicy, ServerConfig},
};

/// Broadcast every length-prefixed message to all connected clients.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerArgs {
    /// TCP port to listen on. Use 0 for an ephemeral port.
    pub port: u16,

    /// Interface address to bind.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Largest payload accepted from a peer, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: u32,

    /// Do not send a message back to the connection it came from.
    #[arg(long)]
    pub no_echo: bool,
}

impl ServerArgs {
    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            listen: SocketAddr::new(self.bind, self.port),
            max_frame_len: self.max_frame_len,
            echo: if self.no_echo {
                EchoPolicy::ExcludeSender
            } else {
                EchoPolicy::IncludeSender
            },
        }
    }
}

/// Send each line of stdin to a chat server and print what it broadcasts.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ClientArgs {
    /// Server host name or IP address.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Display name. Prompted for on stdin when omitted.
    #[arg(long)]
    pub name: Option<String>,

    /// Largest payload sent or accepted, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: u32,
}

impl ClientArgs {
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            max_frame_len: self.max_frame_len,
            ..ClientConfig::new(format!("{}:{}", self.host, self.port))
        }
    }
}
