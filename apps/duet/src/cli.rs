use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use peer_webrtc::PeerConfig;
use url::Url;

use crate::logging::{LogConfig, LogLevel};

pub const DEFAULT_RELAY: &str = "wss://webrtc-signal-server-tdk6.onrender.com";

#[derive(Parser, Debug)]
#[command(
    name = "duet",
    about = "Negotiate a WebRTC peer session over a signaling relay",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "DUET_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "DUET_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to the relay and send the first offer
    Call(SessionArgs),
    /// Connect to the relay and wait for the remote offer
    Join(SessionArgs),
    /// Run two scripted peers over an in-process relay and force an offer collision
    Loopback,
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    #[arg(
        long = "peer-id",
        env = "DUET_PEER_ID",
        value_name = "ID",
        help = "Identifier of this participant (random when omitted)"
    )]
    pub peer_id: Option<String>,

    #[arg(
        long = "remote-id",
        env = "DUET_REMOTE_ID",
        value_name = "ID",
        help = "Identifier of the other participant"
    )]
    pub remote_id: String,

    #[arg(
        long,
        env = "DUET_RELAY_URL",
        default_value = DEFAULT_RELAY,
        help = "WebSocket URL of the signaling relay"
    )]
    pub relay: Url,

    #[arg(
        long = "turn-url",
        env = "DUET_TURN_URL",
        value_name = "URL",
        requires_all = ["turn_username", "turn_credential"],
        help = "TURN relay used in addition to the default STUN server"
    )]
    pub turn_url: Option<String>,

    #[arg(long = "turn-username", env = "DUET_TURN_USERNAME", value_name = "NAME")]
    pub turn_username: Option<String>,

    #[arg(
        long = "turn-credential",
        env = "DUET_TURN_CREDENTIAL",
        value_name = "SECRET",
        hide_env_values = true
    )]
    pub turn_credential: Option<String>,

    #[arg(
        long = "localhost-only",
        env = "DUET_LOCALHOST_ONLY",
        action = clap::ArgAction::SetTrue,
        help = "Skip STUN/TURN and gather host candidates only"
    )]
    pub localhost_only: bool,
}

impl SessionArgs {
    pub fn peer_config(&self) -> PeerConfig {
        let mut builder = PeerConfig::builder().localhost_only(self.localhost_only);
        if let (Some(url), Some(username), Some(credential)) = (
            self.turn_url.as_ref(),
            self.turn_username.as_ref(),
            self.turn_credential.as_ref(),
        ) {
            builder = builder.add_turn_server(vec![url.clone()], username, credential);
        }
        builder.build()
    }
}
