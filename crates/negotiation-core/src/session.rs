use std::collections::HashSet;
use std::fmt;

use signal_channel::SessionDescription;

use crate::candidate_buffer::CandidateBuffer;
use crate::role::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalingState {
    #[default]
    Stable,
    HaveLocalOffer,
    /// Only observable while an incoming offer is being answered.
    HaveRemoteOffer,
    Closed,
}

impl SignalingState {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::Closed => "closed",
        }
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Negotiation bookkeeping for one logical peer connection.
///
/// Every mutation goes through a transition method so the description slots
/// and the signaling state move together.
#[derive(Debug, Default)]
pub struct Session {
    pub(crate) role: Role,
    pub(crate) signaling_state: SignalingState,
    pub(crate) making_offer: bool,
    pub(crate) local_description: Option<SessionDescription>,
    pub(crate) remote_description: Option<SessionDescription>,
    pub(crate) pending_candidates: CandidateBuffer,
    /// Every remote offer and answer handled so far, applied or not.
    /// Redelivered copies are recognised by content.
    pub(crate) handled_remote: HashSet<SessionDescription>,
}

impl Session {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            ..Self::default()
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.signaling_state
    }

    pub fn making_offer(&self) -> bool {
        self.making_offer
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn has_handled(&self, description: &SessionDescription) -> bool {
        self.handled_remote.contains(description)
    }

    /// Marks a remote description as handled. Returns false for a copy of one
    /// that was handled before.
    pub(crate) fn remember_remote(&mut self, description: &SessionDescription) -> bool {
        if self.handled_remote.contains(description) {
            return false;
        }
        self.handled_remote.insert(description.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.signaling_state == SignalingState::Closed
    }

    pub(crate) fn install_local_offer(&mut self, offer: SessionDescription) {
        self.local_description = Some(offer);
        self.remote_description = None;
        self.signaling_state = SignalingState::HaveLocalOffer;
    }

    pub(crate) fn rollback_local_offer(&mut self) {
        self.local_description = None;
        self.signaling_state = SignalingState::Stable;
    }

    pub(crate) fn install_remote_offer(&mut self, offer: SessionDescription) {
        self.remote_description = Some(offer);
        self.local_description = None;
        self.signaling_state = SignalingState::HaveRemoteOffer;
    }

    pub(crate) fn install_local_answer(&mut self, answer: SessionDescription) {
        self.local_description = Some(answer);
        self.signaling_state = SignalingState::Stable;
    }

    pub(crate) fn install_remote_answer(&mut self, answer: SessionDescription) {
        self.remote_description = Some(answer);
        self.signaling_state = SignalingState::Stable;
    }

    pub(crate) fn close(&mut self) {
        self.signaling_state = SignalingState::Closed;
        self.making_offer = false;
        self.local_description = None;
        self.remote_description = None;
        self.pending_candidates.clear();
        self.handled_remote.clear();
    }

    /// Checks the description/state pairing that must hold between events.
    pub fn check_invariants(&self) -> Result<(), String> {
        let local = self.local_description.is_some();
        let remote = self.remote_description.is_some();
        match self.signaling_state {
            SignalingState::Stable if local != remote => Err(format!(
                "stable with local={local} remote={remote}; expected both or neither"
            )),
            SignalingState::HaveLocalOffer if !local || remote => Err(format!(
                "have-local-offer with local={local} remote={remote}"
            )),
            SignalingState::HaveRemoteOffer if local || !remote => Err(format!(
                "have-remote-offer with local={local} remote={remote}"
            )),
            _ if remote && !self.pending_candidates.is_empty() => Err(format!(
                "{} candidates still buffered after remote description was installed",
                self.pending_candidates.len()
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_keep_descriptions_paired() {
        let mut session = Session::new(Role::Polite);
        session.check_invariants().unwrap();

        session.install_local_offer(SessionDescription::offer("a"));
        assert_eq!(session.signaling_state(), SignalingState::HaveLocalOffer);
        session.check_invariants().unwrap();

        session.rollback_local_offer();
        session.check_invariants().unwrap();

        session.install_remote_offer(SessionDescription::offer("b"));
        assert_eq!(session.signaling_state(), SignalingState::HaveRemoteOffer);
        session.check_invariants().unwrap();

        session.install_local_answer(SessionDescription::answer("c"));
        assert_eq!(session.signaling_state(), SignalingState::Stable);
        assert!(session.local_description().is_some());
        assert!(session.remote_description().is_some());
        session.check_invariants().unwrap();
    }

    #[test]
    fn half_installed_stable_is_reported() {
        let mut session = Session::new(Role::Impolite);
        session.local_description = Some(SessionDescription::offer("a"));
        assert!(session.check_invariants().is_err());
    }

    #[test]
    fn close_releases_everything() {
        let mut session = Session::new(Role::Impolite);
        session.install_local_offer(SessionDescription::offer("a"));
        session.making_offer = true;
        session.close();
        assert!(session.is_closed());
        assert!(!session.making_offer());
        assert!(session.local_description().is_none());
        session.check_invariants().unwrap();
    }

    #[test]
    fn remote_descriptions_are_remembered_by_content() {
        let mut session = Session::new(Role::Polite);
        let offer = SessionDescription::offer("v=0\r\no=a 1 0 IN IP4 127.0.0.1\r\n");
        assert!(session.remember_remote(&offer));
        assert!(!session.remember_remote(&offer.clone()));
        assert!(session.has_handled(&offer));
        assert!(!session.has_handled(&SessionDescription::answer(offer.sdp.clone())));

        session.close();
        assert!(!session.has_handled(&offer));
    }
}
