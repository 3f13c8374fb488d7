//! Two scripted peers over an in-process relay, both offering at once.

use std::fmt;
use std::sync::Arc;

use negotiation_core::{
    EngineEvent, EngineHandle, NegotiationConfig, NegotiationEngine, Participants, Role,
    ScriptedPeerFactory, SignalingState,
};
use signal_channel::{MemoryRelay, RelayChannel};
use tokio::sync::broadcast::{self, error::RecvError};
use url::Url;

use crate::error::CliError;

const LOOPBACK_URL: &str = "memory://loopback";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackReport {
    pub roles: (Role, Role),
    pub states: (SignalingState, SignalingState),
    /// Whose offer both sides ended up with.
    pub winning_offer: Option<String>,
    pub rollbacks: usize,
    pub descriptions_agree: bool,
}

impl fmt::Display for LoopbackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "alice: {} ({})", self.roles.0, self.states.0)?;
        writeln!(f, "bob:   {} ({})", self.roles.1, self.states.1)?;
        writeln!(
            f,
            "winning offer: {}",
            self.winning_offer.as_deref().unwrap_or("none")
        )?;
        writeln!(f, "rollbacks: {}", self.rollbacks)?;
        write!(f, "descriptions agree: {}", self.descriptions_agree)
    }
}

pub async fn run() -> Result<LoopbackReport, CliError> {
    let relay = MemoryRelay::new();
    let config = NegotiationConfig::from_env();
    let alice_peer = ScriptedPeerFactory::new("alice").gather(2);
    let bob_peer = ScriptedPeerFactory::new("bob").gather(2);

    let alice = start(&relay, &config, Participants::new("alice", "bob"), &alice_peer).await?;
    let bob = start(&relay, &config, Participants::new("bob", "alice"), &bob_peer).await?;
    let mut alice_events = alice.events();
    let mut bob_events = bob.events();

    // hold both offers in the relay so they cross
    relay.pause();
    alice.start_offer().await?;
    bob.start_offer().await?;
    relay.resume();

    let converged = tokio::time::timeout(config.operation_timeout, async {
        negotiated(&mut alice_events).await?;
        negotiated(&mut bob_events).await
    })
    .await;
    match converged {
        Ok(result) => result?,
        Err(_) => return Err(CliError::Incomplete("peers did not converge in time".into())),
    }

    let (a, b) = (alice_peer.recorder(), bob_peer.recorder());
    let winning_offer = b.remote().and_then(|offer| {
        offer
            .sdp
            .lines()
            .find_map(|line| line.strip_prefix("o="))
            .and_then(|origin| origin.split(' ').next())
            .map(str::to_string)
    });
    let report = LoopbackReport {
        roles: (alice.role(), bob.role()),
        states: (alice.signaling_state(), bob.signaling_state()),
        winning_offer,
        rollbacks: a.rollbacks() + b.rollbacks(),
        descriptions_agree: a.local() == b.remote() && b.local() == a.remote(),
    };

    alice.hangup().await;
    bob.hangup().await;
    Ok(report)
}

async fn start(
    relay: &MemoryRelay,
    config: &NegotiationConfig,
    participants: Participants,
    factory: &ScriptedPeerFactory,
) -> Result<EngineHandle, CliError> {
    let url = Url::parse(LOOPBACK_URL).map_err(|err| CliError::Incomplete(err.to_string()))?;
    let handle = NegotiationEngine::start(
        config.clone(),
        participants,
        Arc::new(RelayChannel::new(relay.clone())),
        url,
        Arc::new(factory.clone()),
    )
    .await?;
    Ok(handle)
}

async fn negotiated(events: &mut broadcast::Receiver<EngineEvent>) -> Result<(), CliError> {
    loop {
        match events.recv().await {
            Ok(EngineEvent::Negotiated) => return Ok(()),
            Ok(EngineEvent::Failed(err)) => return Err(err.into()),
            Ok(EngineEvent::Closed) | Err(RecvError::Closed) => {
                return Err(CliError::Incomplete("session closed early".into()))
            }
            Ok(EngineEvent::StateChanged(_)) | Err(RecvError::Lagged(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn crossing_offers_converge_on_impolite_offer() {
        let report = run().await.expect("loopback run");
        assert_eq!(report.roles, (Role::Impolite, Role::Polite));
        assert_eq!(
            report.states,
            (SignalingState::Stable, SignalingState::Stable)
        );
        assert_eq!(report.winning_offer.as_deref(), Some("alice"));
        assert_eq!(report.rollbacks, 1);
        assert!(report.descriptions_agree);
        assert!(report.to_string().contains("winning offer: alice"));
    }
}
