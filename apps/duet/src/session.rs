use std::sync::Arc;

use negotiation_core::{EngineEvent, NegotiationConfig, NegotiationEngine, Participants};
use peer_webrtc::WebRtcPeerFactory;
use signal_channel::{RelayChannel, WebSocketConnector};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cli::SessionArgs;
use crate::error::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Call,
    Join,
}

/// Runs one WebRTC session until it closes or the user interrupts.
pub async fn run(args: SessionArgs, mode: Mode) -> Result<(), CliError> {
    let local = args
        .peer_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    eprintln!("peer id: {local}");

    let channel = Arc::new(RelayChannel::new(WebSocketConnector::new()));
    let factory = Arc::new(WebRtcPeerFactory::new(args.peer_config()));
    let handle = NegotiationEngine::start(
        NegotiationConfig::from_env(),
        Participants::new(local, args.remote_id.clone()),
        channel,
        args.relay.clone(),
        factory,
    )
    .await?;
    info!(relay = %args.relay, role = %handle.role(), ?mode, "joined signaling relay");
    eprintln!("role: {}", handle.role());

    let mut events = handle.events();
    if mode == Mode::Call {
        handle.start_offer().await?;
    }

    let mut last_failure = None;
    loop {
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => {
                interrupted?;
                info!("interrupt received; hanging up");
                handle.hangup().await;
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(EngineEvent::StateChanged(state)) => eprintln!("signaling state: {state}"),
                Ok(EngineEvent::Negotiated) => eprintln!("session negotiated"),
                Ok(EngineEvent::Failed(err)) => {
                    warn!(error = %err, "negotiation error");
                    last_failure = Some(err);
                }
                Ok(EngineEvent::Closed) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "event stream lagged"),
            }
        }
    }

    match last_failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
