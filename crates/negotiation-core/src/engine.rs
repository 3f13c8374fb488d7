//! The negotiation actor: one task that owns the [`Negotiator`] and feeds it
//! local commands and inbound signaling messages from a single queue.

use std::sync::Arc;

use futures::StreamExt;
use signal_channel::{
    connect_with_retry, ChannelError, ChannelState, IceCandidate, RetryPolicy, SignalingChannel,
    SignalingMessage,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::NegotiationConfig;
use crate::error::{SessionError, SessionResult};
use crate::negotiator::{Negotiator, Step};
use crate::peer::{CandidateSink, PeerFactory};
use crate::role::{Participants, Role};
use crate::session::SignalingState;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StateChanged(SignalingState),
    Negotiated,
    Failed(SessionError),
    Closed,
}

enum Command {
    StartOffer {
        reply: oneshot::Sender<SessionResult<()>>,
    },
    LocalCandidate(IceCandidate),
    Remote(SignalingMessage),
    ChannelLost(ChannelError),
}

/// Cloneable control surface of a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SignalingState>,
    events: broadcast::Sender<EngineEvent>,
    hangup: CancellationToken,
    role: Role,
}

impl EngineHandle {
    /// Begins a negotiation. Returns once the offer has been sent, or
    /// immediately when an offer is already outstanding.
    pub async fn start_offer(&self) -> SessionResult<()> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::StartOffer { reply })
            .map_err(|_| SessionError::Closed)?;
        outcome.await.unwrap_or(Err(SessionError::Closed))
    }

    /// Queues a locally gathered candidate for the remote side.
    pub fn local_candidate(&self, candidate: IceCandidate) -> SessionResult<()> {
        self.commands
            .send(Command::LocalCandidate(candidate))
            .map_err(|_| SessionError::Closed)
    }

    /// Interrupts any in-flight event and tears the session down. Resolves
    /// once the engine reports `Closed`.
    pub async fn hangup(&self) {
        self.hangup.cancel();
        self.closed().await;
    }

    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|current| *current == SignalingState::Closed)
            .await;
    }

    pub fn state(&self) -> watch::Receiver<SignalingState> {
        self.state.clone()
    }

    pub fn signaling_state(&self) -> SignalingState {
        *self.state.borrow()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}

pub struct NegotiationEngine;

impl NegotiationEngine {
    /// Derives the role, connects the channel and spawns the actor.
    pub async fn start(
        config: NegotiationConfig,
        participants: Participants,
        channel: Arc<dyn SignalingChannel>,
        url: Url,
        factory: Arc<dyn PeerFactory>,
    ) -> SessionResult<EngineHandle> {
        let role = participants.role()?;
        connect_with_retry(channel.as_ref(), &url, config.reconnect).await?;
        info!(
            target = "negotiation",
            local = %participants.local,
            remote = %participants.remote,
            %role,
            "negotiation engine started"
        );

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SignalingState::Stable);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let hangup = CancellationToken::new();

        let local_candidates = {
            let commands = commands_tx.clone();
            CandidateSink::new(move |candidate| {
                commands.send(Command::LocalCandidate(candidate)).is_ok()
            })
        };
        let negotiator = Negotiator::new(role, factory, local_candidates, &config);

        tokio::spawn(pump_inbound(
            channel.clone(),
            url.clone(),
            config.reconnect,
            commands_tx.clone(),
            hangup.clone(),
        ));
        let actor = EngineActor {
            negotiator,
            channel,
            url,
            config,
            commands: commands_rx,
            state: state_tx,
            events: events.clone(),
            hangup: hangup.clone(),
        };
        tokio::spawn(actor.run());

        Ok(EngineHandle {
            commands: commands_tx,
            state: state_rx,
            events,
            hangup,
            role,
        })
    }
}

/// Forwards every inbound message into the command queue. When a connection
/// ends the pump reconnects and picks up the fresh stream; if that fails the
/// actor is told the channel is gone.
async fn pump_inbound(
    channel: Arc<dyn SignalingChannel>,
    url: Url,
    policy: RetryPolicy,
    commands: mpsc::UnboundedSender<Command>,
    hangup: CancellationToken,
) {
    let mut state = channel.state();
    loop {
        let mut stream = match channel.receive() {
            Ok(stream) => stream,
            Err(ChannelError::Closed) => {
                let _ = commands.send(Command::ChannelLost(ChannelError::Closed));
                return;
            }
            Err(_) if *state.borrow_and_update() == ChannelState::Open => {
                // previous connection still winding down
                let changed = tokio::select! {
                    _ = hangup.cancelled() => return,
                    changed = state.changed() => changed,
                };
                if changed.is_err() {
                    return;
                }
                continue;
            }
            Err(_) => {
                let reconnected = tokio::select! {
                    _ = hangup.cancelled() => return,
                    reconnected = connect_with_retry(channel.as_ref(), &url, policy) => reconnected,
                };
                if let Err(err) = reconnected {
                    let _ = commands.send(Command::ChannelLost(err));
                    return;
                }
                continue;
            }
        };

        loop {
            let next = tokio::select! {
                _ = hangup.cancelled() => return,
                next = stream.next() => next,
            };
            let Some(message) = next else {
                debug!(target = "negotiation", "inbound stream ended");
                break;
            };
            if commands.send(Command::Remote(message)).is_err() {
                return;
            }
        }
    }
}

struct EngineActor {
    negotiator: Negotiator,
    channel: Arc<dyn SignalingChannel>,
    url: Url,
    config: NegotiationConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<SignalingState>,
    events: broadcast::Sender<EngineEvent>,
    hangup: CancellationToken,
}

impl EngineActor {
    async fn run(mut self) {
        let hangup = self.hangup.clone();
        loop {
            let command = tokio::select! {
                biased;
                _ = hangup.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            let finished = tokio::select! {
                biased;
                _ = hangup.cancelled() => {
                    debug!(target = "negotiation", "hangup interrupted in-flight event");
                    break;
                }
                finished = self.dispatch(command) => finished,
            };
            if finished {
                break;
            }
        }
        self.shutdown().await;
    }

    /// Handles one command to completion. Returns true once the session is over.
    async fn dispatch(&mut self, command: Command) -> bool {
        match command {
            Command::StartOffer { reply } => {
                let result = self.negotiator.start_offer().await;
                let (outcome, finished) = self.settle(result).await;
                let _ = reply.send(outcome);
                finished
            }
            Command::LocalCandidate(candidate) => {
                let step = self.negotiator.on_local_candidate(candidate);
                self.settle(Ok(step)).await.1
            }
            Command::Remote(message) => {
                let result = self.negotiator.on_message(message).await;
                self.settle(result).await.1
            }
            Command::ChannelLost(err) => {
                warn!(target = "negotiation", error = %err, "signaling channel lost; closing session");
                let _ = self.events.send(EngineEvent::Failed(err.into()));
                true
            }
        }
    }

    async fn settle(&mut self, result: SessionResult<Step>) -> (SessionResult<()>, bool) {
        self.publish_state();
        let step = match result {
            Ok(step) => step,
            Err(err) => {
                let finished = self.negotiator.state() == SignalingState::Closed;
                let _ = self.events.send(EngineEvent::Failed(err.clone()));
                return (Err(err), finished);
            }
        };
        if let Some(message) = step.outbound {
            if let Err(err) = transmit(&self.channel, &self.url, &self.config, message).await {
                warn!(target = "negotiation", error = %err, "signaling send failed; closing session");
                let _ = self.events.send(EngineEvent::Failed(err.clone()));
                return (Err(err), true);
            }
        }
        if step.negotiated {
            let _ = self.events.send(EngineEvent::Negotiated);
        }
        (Ok(()), false)
    }

    fn publish_state(&self) {
        let state = self.negotiator.state();
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            debug!(target = "negotiation", %state, "signaling state changed");
            let _ = self.events.send(EngineEvent::StateChanged(state));
        }
    }

    async fn shutdown(&mut self) {
        self.hangup.cancel();
        self.negotiator.hangup().await;
        self.channel.close().await;

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::StartOffer { reply } = command {
                let _ = reply.send(Err(SessionError::Closed));
            }
        }
        self.publish_state();
        let _ = self.events.send(EngineEvent::Closed);
        info!(target = "negotiation", "negotiation engine stopped");
    }
}

/// Sends one message, resending once if the channel comes back within the
/// resend window.
async fn transmit(
    channel: &Arc<dyn SignalingChannel>,
    url: &Url,
    config: &NegotiationConfig,
    message: SignalingMessage,
) -> SessionResult<()> {
    let window = config.resend_window;
    let kind = message.kind();
    let first = tokio::time::timeout(window, channel.send(message.clone()))
        .await
        .unwrap_or(Err(ChannelError::Timeout));
    let err = match first {
        Ok(()) => return Ok(()),
        Err(err) if err.is_retryable() => err,
        Err(err) => return Err(err.into()),
    };

    warn!(target = "negotiation", kind, error = %err, "send failed; waiting for reconnect");
    let resend = async {
        connect_with_retry(channel.as_ref(), url, config.reconnect).await?;
        channel.send(message).await
    };
    match tokio::time::timeout(window, resend).await {
        Ok(Ok(())) => {
            info!(target = "negotiation", kind, "resent after reconnect");
            Ok(())
        }
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(ChannelError::Timeout.into()),
    }
}
