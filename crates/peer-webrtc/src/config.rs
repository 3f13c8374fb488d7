use webrtc::ice_transport::ice_server::RTCIceServer;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const LOCALHOST_ONLY_ENV: &str = "DUET_LOCALHOST_ONLY";

/// Configuration for a WebRTC peer
#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// ICE servers for connection establishment
    pub ice_servers: Vec<RTCIceServer>,
    /// Label of the negotiated data channel that gives every offer an
    /// application section
    pub data_channel_label: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![stun_server()],
            data_channel_label: "duet".to_string(),
        }
    }
}

impl PeerConfig {
    /// Default configuration, without ICE servers when `DUET_LOCALHOST_ONLY` is set
    pub fn new() -> Self {
        if std::env::var(LOCALHOST_ONLY_ENV).is_ok() {
            Self::localhost()
        } else {
            Self::default()
        }
    }

    /// Host candidates only (no STUN/TURN)
    pub fn localhost() -> Self {
        Self {
            ice_servers: vec![],
            ..Default::default()
        }
    }

    pub fn builder() -> PeerConfigBuilder {
        PeerConfigBuilder::new()
    }
}

fn stun_server() -> RTCIceServer {
    RTCIceServer {
        urls: vec![DEFAULT_STUN_SERVER.to_string()],
        ..Default::default()
    }
}

/// Builder for [`PeerConfig`]. Servers added here follow the default STUN
/// server, if any.
#[derive(Default)]
pub struct PeerConfigBuilder {
    ice_servers: Vec<RTCIceServer>,
    data_channel_label: Option<String>,
    localhost_only: bool,
}

impl PeerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ice_server(mut self, urls: Vec<String>) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls,
            ..Default::default()
        });
        self
    }

    /// Adds a TURN relay that requires credentials.
    pub fn add_turn_server(
        mut self,
        urls: Vec<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        self.ice_servers.push(RTCIceServer {
            urls,
            username: username.into(),
            credential: credential.into(),
            ..Default::default()
        });
        self
    }

    pub fn data_channel_label(mut self, label: impl Into<String>) -> Self {
        self.data_channel_label = Some(label.into());
        self
    }

    pub fn localhost_only(mut self, localhost_only: bool) -> Self {
        self.localhost_only = localhost_only;
        self
    }

    pub fn build(self) -> PeerConfig {
        let mut config = if self.localhost_only {
            PeerConfig::localhost()
        } else {
            PeerConfig::new()
        };
        config.ice_servers.extend(self.ice_servers);
        if let Some(label) = self.data_channel_label {
            config.data_channel_label = label;
        }
        config
    }
}
