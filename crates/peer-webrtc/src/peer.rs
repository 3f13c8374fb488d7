use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use negotiation_core::{
    CandidateSink, LocalDescription, PeerError, PeerFactory, PeerResult, PeerSession,
};
use signal_channel::{IceCandidate, SdpKind, SessionDescription};
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::PeerConfig;

/// Builds one [`WebRtcPeer`] per negotiation session.
#[derive(Clone, Debug, Default)]
pub struct WebRtcPeerFactory {
    config: PeerConfig,
}

impl WebRtcPeerFactory {
    pub fn new(config: PeerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(&self, candidates: CandidateSink) -> PeerResult<Box<dyn PeerSession>> {
        let peer = WebRtcPeer::new(self.config.clone(), candidates).await?;
        Ok(Box::new(peer))
    }
}

/// [`PeerSession`] over a `webrtc` peer connection.
///
/// The library has no JSEP rollback, so rolling back a first offer swaps in a
/// fresh connection. Once a remote description has been applied the
/// connection carries negotiated state and rollback is refused.
pub struct WebRtcPeer {
    config: PeerConfig,
    candidates: CandidateSink,
    connection: Arc<RTCPeerConnection>,
    /// Identifies the live connection; callbacks from replaced ones are ignored.
    generation: Arc<AtomicU64>,
    remote_applied: bool,
}

impl WebRtcPeer {
    pub async fn new(config: PeerConfig, candidates: CandidateSink) -> PeerResult<Self> {
        let generation = Arc::new(AtomicU64::new(0));
        let connection = build_connection(&config, &candidates, &generation).await?;
        Ok(Self {
            config,
            candidates,
            connection,
            generation,
            remote_applied: false,
        })
    }

    async fn replace_connection(&mut self) -> PeerResult<()> {
        let fresh = build_connection(&self.config, &self.candidates, &self.generation).await?;
        let previous = std::mem::replace(&mut self.connection, fresh);
        if let Err(err) = previous.close().await {
            warn!(target = "webrtc", error = %err, "closing replaced peer connection failed");
        }
        Ok(())
    }
}

#[async_trait]
impl PeerSession for WebRtcPeer {
    async fn create_offer(&mut self) -> PeerResult<SessionDescription> {
        let offer = self.connection.create_offer(None).await.map_err(failed)?;
        from_rtc(offer)
    }

    async fn create_answer(&mut self) -> PeerResult<SessionDescription> {
        let answer = self.connection.create_answer(None).await.map_err(failed)?;
        from_rtc(answer)
    }

    async fn set_local_description(&mut self, update: LocalDescription) -> PeerResult<()> {
        match update {
            LocalDescription::Description(description) => {
                let description = to_rtc(description)?;
                self.connection
                    .set_local_description(description)
                    .await
                    .map_err(rejected)
            }
            LocalDescription::Rollback if self.remote_applied => {
                Err(PeerError::Unsupported("rollback during renegotiation"))
            }
            LocalDescription::Rollback => {
                info!(target = "webrtc", "rolling back local offer with a fresh peer connection");
                self.replace_connection().await
            }
        }
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> PeerResult<()> {
        let description = to_rtc(description)?;
        self.connection
            .set_remote_description(description)
            .await
            .map_err(rejected)?;
        self.remote_applied = true;
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: IceCandidate) -> PeerResult<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.connection.add_ice_candidate(init).await.map_err(failed)
    }

    async fn close(&mut self) -> PeerResult<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.connection.close().await.map_err(failed)
    }
}

async fn build_connection(
    config: &PeerConfig,
    candidates: &CandidateSink,
    generation: &Arc<AtomicU64>,
) -> PeerResult<Arc<RTCPeerConnection>> {
    let api = APIBuilder::new().build();
    let rtc_config = RTCConfiguration {
        ice_servers: config.ice_servers.clone(),
        ..Default::default()
    };
    let connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(failed)?);
    let id = generation.fetch_add(1, Ordering::SeqCst) + 1;

    let sink = candidates.clone();
    let live = generation.clone();
    connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = sink.clone();
        let live = live.clone();
        Box::pin(async move {
            if live.load(Ordering::SeqCst) != id {
                return;
            }
            let Some(candidate) = candidate else {
                debug!(target = "webrtc", "ice gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    debug!(target = "webrtc", candidate = %init.candidate, "local ice candidate");
                    sink.push(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    });
                }
                Err(err) => {
                    warn!(target = "webrtc", error = %err, "failed to serialise local candidate");
                }
            }
        })
    }));
    connection.on_signaling_state_change(Box::new(move |state: RTCSignalingState| {
        debug!(target = "webrtc", %state, "signaling state changed");
        Box::pin(async {})
    }));
    connection.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        debug!(target = "webrtc", %state, "ice connection state changed");
        Box::pin(async {})
    }));
    connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        match state {
            RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                warn!(target = "webrtc", %state, "peer connection state changed");
            }
            _ => info!(target = "webrtc", %state, "peer connection state changed"),
        }
        Box::pin(async {})
    }));

    // pre-negotiated on both sides, so offers always carry an application section
    let channel = connection
        .create_data_channel(
            &config.data_channel_label,
            Some(RTCDataChannelInit {
                negotiated: Some(0),
                ..Default::default()
            }),
        )
        .await
        .map_err(failed)?;
    let label = config.data_channel_label.clone();
    channel.on_open(Box::new(move || {
        info!(target = "webrtc", label = %label, "data channel open");
        Box::pin(async {})
    }));

    Ok(connection)
}

fn to_rtc(description: SessionDescription) -> PeerResult<RTCSessionDescription> {
    let parsed = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.map_err(rejected)
}

fn from_rtc(description: RTCSessionDescription) -> PeerResult<SessionDescription> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        other => {
            return Err(PeerError::Failed(format!(
                "unexpected local description type {other}"
            )))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

fn failed(err: webrtc::Error) -> PeerError {
    PeerError::Failed(err.to_string())
}

fn rejected(err: webrtc::Error) -> PeerError {
    PeerError::Rejected(err.to_string())
}
