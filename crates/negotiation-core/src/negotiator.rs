//! Offer/answer state machine for one session.
//!
//! The negotiator owns the [`Session`] record and the peer, and turns one
//! event at a time into at most one outbound [`SignalingMessage`]. It never
//! touches the signaling channel itself; the engine sends what it returns.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use signal_channel::{IceCandidate, SessionDescription, SignalingMessage};
use tracing::{debug, info, warn};

use crate::config::NegotiationConfig;
use crate::error::{Dropped, SessionError, SessionResult};
use crate::peer::{CandidateSink, LocalDescription, PeerError, PeerFactory, PeerSession};
use crate::role::Role;
use crate::session::{Session, SignalingState};

/// What handling one event produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Step {
    pub outbound: Option<SignalingMessage>,
    /// A full offer/answer exchange completed with this event.
    pub negotiated: bool,
    pub dropped: Option<Dropped>,
}

impl Step {
    fn send(message: SignalingMessage) -> Self {
        Self {
            outbound: Some(message),
            ..Self::default()
        }
    }

    fn dropped(reason: Dropped) -> Self {
        Self {
            dropped: Some(reason),
            ..Self::default()
        }
    }
}

/// Drives one session. The role passed to [`Negotiator::new`] must already be
/// derived; an [`Role::Unassigned`] negotiator closes on its first offer.
pub struct Negotiator {
    session: Session,
    peer: Option<Box<dyn PeerSession>>,
    factory: Arc<dyn PeerFactory>,
    candidates: CandidateSink,
    operation_timeout: Duration,
    hangup_timeout: Duration,
}

impl Negotiator {
    pub fn new(
        role: Role,
        factory: Arc<dyn PeerFactory>,
        candidates: CandidateSink,
        config: &NegotiationConfig,
    ) -> Self {
        Self {
            session: Session::new(role),
            peer: None,
            factory,
            candidates,
            operation_timeout: config.operation_timeout,
            hangup_timeout: config.hangup_timeout,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SignalingState {
        self.session.signaling_state
    }

    pub fn role(&self) -> Role {
        self.session.role
    }

    pub async fn start_offer(&mut self) -> SessionResult<Step> {
        match self.session.signaling_state {
            SignalingState::Closed => return Err(SessionError::Closed),
            SignalingState::HaveLocalOffer | SignalingState::HaveRemoteOffer => {
                debug!(
                    target = "negotiation",
                    state = %self.session.signaling_state,
                    "offer already outstanding"
                );
                return Ok(Step::default());
            }
            SignalingState::Stable => {}
        }
        self.ensure_peer().await?;

        self.session.making_offer = true;
        let made = self.make_offer().await;
        self.session.making_offer = false;
        match made {
            Ok(offer) => {
                info!(target = "negotiation", role = %self.session.role, "sending offer");
                Ok(Step::send(SignalingMessage::Offer { offer }))
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    pub async fn on_message(&mut self, message: SignalingMessage) -> SessionResult<Step> {
        if self.session.is_closed() {
            return Ok(self.drop_input(Dropped::AfterClose, message.kind()));
        }
        match message {
            SignalingMessage::Offer { offer } => self.on_offer(offer).await,
            SignalingMessage::Answer { answer } => self.on_answer(answer).await,
            SignalingMessage::IceCandidate { candidate } => self.on_ice_candidate(candidate).await,
        }
    }

    pub async fn on_offer(&mut self, offer: SessionDescription) -> SessionResult<Step> {
        if self.session.is_closed() {
            return Ok(self.drop_input(Dropped::AfterClose, "offer"));
        }
        // recorded before the glare check so a copy of an ignored offer stays ignored
        if !self.session.remember_remote(&offer) {
            return Ok(self.drop_input(Dropped::DuplicateOffer, "offer"));
        }
        let ignore_offer = self.session.role == Role::Impolite
            && (self.session.making_offer
                || self.session.signaling_state != SignalingState::Stable);
        if ignore_offer {
            return Ok(self.drop_input(Dropped::GlareIgnored, "offer"));
        }
        self.ensure_peer().await?;

        match self.answer_offer(offer).await {
            Ok(answer) => {
                info!(target = "negotiation", role = %self.session.role, "sending answer");
                Ok(Step {
                    outbound: Some(SignalingMessage::Answer { answer }),
                    negotiated: true,
                    dropped: None,
                })
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    pub async fn on_answer(&mut self, answer: SessionDescription) -> SessionResult<Step> {
        if self.session.is_closed() {
            return Ok(self.drop_input(Dropped::AfterClose, "answer"));
        }
        if !self.session.remember_remote(&answer) {
            return Ok(self.drop_input(Dropped::DuplicateAnswer, "answer"));
        }
        if self.session.signaling_state != SignalingState::HaveLocalOffer {
            let reason = if self.session.remote_description.is_some() {
                Dropped::DuplicateAnswer
            } else {
                Dropped::UnexpectedAnswer
            };
            return Ok(self.drop_input(reason, "answer"));
        }
        if self.session.local_description.is_none() || self.session.remote_description.is_some()
        {
            return Ok(self.drop_input(Dropped::DuplicateAnswer, "answer"));
        }

        let limit = self.operation_timeout;
        let Some(peer) = self.peer.as_mut() else {
            return Err(self.fail(SessionError::Closed).await);
        };
        let installed = bounded(
            limit,
            "install remote answer",
            peer.set_remote_description(answer.clone()),
        )
        .await;
        if let Err(err) = installed {
            return Err(self.fail(err).await);
        }
        self.session.install_remote_answer(answer);
        self.flush_candidates().await;
        info!(target = "negotiation", role = %self.session.role, "negotiation complete");
        Ok(Step {
            negotiated: true,
            ..Step::default()
        })
    }

    pub async fn on_ice_candidate(&mut self, candidate: IceCandidate) -> SessionResult<Step> {
        if self.session.is_closed() {
            return Ok(self.drop_input(Dropped::AfterClose, "ice"));
        }
        let limit = self.operation_timeout;
        match self.peer.as_mut() {
            Some(peer) if self.session.remote_description.is_some() => {
                if let Err(err) = bounded(limit, "add candidate", peer.add_candidate(candidate)).await
                {
                    warn!(target = "negotiation", error = %err, "failed to apply remote candidate");
                }
            }
            _ => {
                self.session.pending_candidates.append(candidate);
                debug!(
                    target = "negotiation",
                    pending = self.session.pending_candidates.len(),
                    "buffering remote candidate until remote description is set"
                );
            }
        }
        Ok(Step::default())
    }

    /// Forwards a locally gathered candidate to the remote side.
    pub fn on_local_candidate(&mut self, candidate: IceCandidate) -> Step {
        if self.session.is_closed() {
            return self.drop_input(Dropped::AfterClose, "local ice");
        }
        Step::send(SignalingMessage::IceCandidate { candidate })
    }

    /// Closes the session and releases the peer. Safe to call in any state.
    pub async fn hangup(&mut self) {
        if self.session.is_closed() && self.peer.is_none() {
            return;
        }
        self.teardown().await;
        info!(target = "negotiation", "session hung up");
    }

    async fn ensure_peer(&mut self) -> SessionResult<()> {
        if self.peer.is_some() {
            return Ok(());
        }
        if self.session.role == Role::Unassigned {
            return Err(self.fail(SessionError::RoleUnassigned).await);
        }
        let created = bounded(
            self.operation_timeout,
            "create peer",
            self.factory.create(self.candidates.clone()),
        )
        .await;
        match created {
            Ok(peer) => {
                debug!(target = "negotiation", role = %self.session.role, "peer created");
                self.peer = Some(peer);
                Ok(())
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn make_offer(&mut self) -> SessionResult<SessionDescription> {
        let limit = self.operation_timeout;
        let peer = self.peer.as_mut().ok_or(SessionError::Closed)?;
        let offer = bounded(limit, "create offer", peer.create_offer()).await?;
        bounded(
            limit,
            "install local offer",
            peer.set_local_description(LocalDescription::Description(offer.clone())),
        )
        .await?;
        self.session.install_local_offer(offer.clone());
        Ok(offer)
    }

    async fn answer_offer(&mut self, offer: SessionDescription) -> SessionResult<SessionDescription> {
        let limit = self.operation_timeout;
        let peer = self.peer.as_mut().ok_or(SessionError::Closed)?;
        if self.session.signaling_state == SignalingState::HaveLocalOffer {
            info!(target = "negotiation", "offer collision; rolling back local offer");
            bounded(
                limit,
                "roll back local offer",
                peer.set_local_description(LocalDescription::Rollback),
            )
            .await?;
            self.session.rollback_local_offer();
        }

        let had_remote = self.session.remote_description.is_some();
        bounded(limit, "install remote offer", peer.set_remote_description(offer.clone())).await?;
        self.session.install_remote_offer(offer);
        if !had_remote {
            self.flush_candidates().await;
        }

        let peer = self.peer.as_mut().ok_or(SessionError::Closed)?;
        let answer = bounded(limit, "create answer", peer.create_answer()).await?;
        bounded(
            limit,
            "install local answer",
            peer.set_local_description(LocalDescription::Description(answer.clone())),
        )
        .await?;
        self.session.install_local_answer(answer.clone());
        Ok(answer)
    }

    /// Applies every buffered candidate in arrival order. Individual failures
    /// are logged and do not stop the flush.
    async fn flush_candidates(&mut self) {
        let pending = self.session.pending_candidates.drain_in_order();
        if pending.is_empty() {
            return;
        }
        let limit = self.operation_timeout;
        let Some(peer) = self.peer.as_mut() else {
            return;
        };
        debug!(target = "negotiation", count = pending.len(), "applying buffered candidates");
        for candidate in pending {
            if let Err(err) = bounded(limit, "add candidate", peer.add_candidate(candidate)).await {
                warn!(target = "negotiation", error = %err, "failed to apply buffered candidate");
            }
        }
    }

    async fn fail(&mut self, err: SessionError) -> SessionError {
        warn!(target = "negotiation", error = %err, "negotiation failed; closing session");
        self.teardown().await;
        err
    }

    async fn teardown(&mut self) {
        self.session.close();
        let Some(mut peer) = self.peer.take() else {
            return;
        };
        match tokio::time::timeout(self.hangup_timeout, peer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(target = "negotiation", error = %err, "peer close failed");
            }
            Err(_) => {
                warn!(target = "negotiation", "peer close timed out; abandoning peer");
            }
        }
    }

    fn drop_input(&self, reason: Dropped, kind: &'static str) -> Step {
        debug!(
            target = "negotiation",
            reason = reason.as_str(),
            kind,
            state = %self.session.signaling_state,
            "dropping signaling input"
        );
        Step::dropped(reason)
    }
}

async fn bounded<T>(
    limit: Duration,
    stage: &'static str,
    op: impl Future<Output = Result<T, PeerError>>,
) -> SessionResult<T> {
    match tokio::time::timeout(limit, op).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(SessionError::Description { stage, source }),
        Err(_) => Err(SessionError::Description {
            stage,
            source: PeerError::Timeout,
        }),
    }
}
