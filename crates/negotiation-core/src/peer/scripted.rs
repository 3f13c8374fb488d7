use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use signal_channel::{IceCandidate, SdpKind, SessionDescription};

use super::{CandidateSink, LocalDescription, PeerError, PeerFactory, PeerResult, PeerSession};

/// Peer operations that a script can fail or stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateOffer,
    CreateAnswer,
    SetLocal,
    SetRemote,
    AddCandidate,
    Close,
}

#[derive(Debug, Default)]
struct Script {
    fail_on: Option<Operation>,
    stall_on: Option<Operation>,
    gather: usize,
}

#[derive(Debug, Default)]
struct Observed {
    created: usize,
    generated: u32,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_installs: Vec<SessionDescription>,
    rollbacks: usize,
    applied: Vec<IceCandidate>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    script: Script,
    observed: Observed,
}

/// In-memory peer that enforces the same ordering rules as a real peer
/// connection: answers need a local offer, candidates need a remote
/// description, and an incoming offer needs a rollback first.
pub struct ScriptedPeer {
    label: String,
    shared: Arc<Mutex<Shared>>,
    candidates: CandidateSink,
}

/// Builds [`ScriptedPeer`]s and exposes what they observed.
#[derive(Clone)]
pub struct ScriptedPeerFactory {
    label: String,
    shared: Arc<Mutex<Shared>>,
}

/// Read-only view onto the most recently created scripted peer.
#[derive(Clone)]
pub struct ScriptedRecorder {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedPeerFactory {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            shared: Arc::default(),
        }
    }

    /// Every later call of `op` returns an error.
    pub fn fail_on(self, op: Operation) -> Self {
        self.shared.lock().script.fail_on = Some(op);
        self
    }

    /// Every later call of `op` never completes.
    pub fn stall_on(self, op: Operation) -> Self {
        self.shared.lock().script.stall_on = Some(op);
        self
    }

    /// Number of local candidates reported after each local description.
    pub fn gather(self, count: usize) -> Self {
        self.shared.lock().script.gather = count;
        self
    }

    pub fn recorder(&self) -> ScriptedRecorder {
        ScriptedRecorder {
            shared: self.shared.clone(),
        }
    }
}

#[async_trait]
impl PeerFactory for ScriptedPeerFactory {
    async fn create(&self, candidates: CandidateSink) -> PeerResult<Box<dyn PeerSession>> {
        {
            let mut shared = self.shared.lock();
            let created = shared.observed.created + 1;
            shared.observed = Observed {
                created,
                ..Observed::default()
            };
        }
        Ok(Box::new(ScriptedPeer {
            label: self.label.clone(),
            shared: self.shared.clone(),
            candidates,
        }))
    }
}

impl ScriptedRecorder {
    pub fn created(&self) -> usize {
        self.shared.lock().observed.created
    }

    pub fn local(&self) -> Option<SessionDescription> {
        self.shared.lock().observed.local.clone()
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.shared.lock().observed.remote.clone()
    }

    /// Every remote description the peer accepted, oldest first.
    pub fn remote_installs(&self) -> Vec<SessionDescription> {
        self.shared.lock().observed.remote_installs.clone()
    }

    pub fn rollbacks(&self) -> usize {
        self.shared.lock().observed.rollbacks
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.shared
            .lock()
            .observed
            .applied
            .iter()
            .map(|candidate| candidate.candidate.clone())
            .collect()
    }

    pub fn closed(&self) -> bool {
        self.shared.lock().observed.closed
    }
}

impl ScriptedPeer {
    /// Fails or stalls `op` according to the script, and rejects any call
    /// after close.
    async fn gate(&self, op: Operation) -> PeerResult<()> {
        let (stall, fail, closed) = {
            let shared = self.shared.lock();
            (
                shared.script.stall_on == Some(op),
                shared.script.fail_on == Some(op),
                shared.observed.closed,
            )
        };
        if closed && op != Operation::Close {
            return Err(PeerError::Closed);
        }
        if stall {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(PeerError::Failed(format!("scripted failure in {op:?}")));
        }
        Ok(())
    }

    fn describe(&self, kind: SdpKind) -> SessionDescription {
        let mut shared = self.shared.lock();
        shared.observed.generated += 1;
        let sdp = format!(
            "v=0\r\no={} {} 0 IN IP4 127.0.0.1\r\ns=-\r\n",
            self.label, shared.observed.generated
        );
        SessionDescription { kind, sdp }
    }

    fn report_candidates(&self) {
        let (count, round) = {
            let shared = self.shared.lock();
            (shared.script.gather, shared.observed.generated)
        };
        for index in 0..count {
            let mut candidate = IceCandidate::new(format!(
                "candidate:{}-{round}-{index} 1 udp 2122260223 127.0.0.1 {} typ host",
                self.label,
                50000 + index
            ));
            candidate.sdp_mid = Some("0".into());
            candidate.sdp_mline_index = Some(0);
            if !self.candidates.push(candidate) {
                break;
            }
        }
    }
}

#[async_trait]
impl PeerSession for ScriptedPeer {
    async fn create_offer(&mut self) -> PeerResult<SessionDescription> {
        self.gate(Operation::CreateOffer).await?;
        Ok(self.describe(SdpKind::Offer))
    }

    async fn create_answer(&mut self) -> PeerResult<SessionDescription> {
        self.gate(Operation::CreateAnswer).await?;
        let has_remote_offer = matches!(
            self.shared.lock().observed.remote,
            Some(SessionDescription { kind: SdpKind::Offer, .. })
        );
        if !has_remote_offer {
            return Err(PeerError::Rejected("no remote offer to answer".into()));
        }
        Ok(self.describe(SdpKind::Answer))
    }

    async fn set_local_description(&mut self, update: LocalDescription) -> PeerResult<()> {
        self.gate(Operation::SetLocal).await?;
        {
            let mut shared = self.shared.lock();
            let observed = &mut shared.observed;
            match update {
                LocalDescription::Rollback => {
                    let pending_offer = matches!(
                        observed.local,
                        Some(SessionDescription { kind: SdpKind::Offer, .. })
                    ) && observed.remote.is_none();
                    if !pending_offer {
                        return Err(PeerError::Rejected("nothing to roll back".into()));
                    }
                    observed.local = None;
                    observed.rollbacks += 1;
                    return Ok(());
                }
                LocalDescription::Description(description) => {
                    match description.kind {
                        SdpKind::Offer => observed.remote = None,
                        SdpKind::Answer => {
                            let answering = matches!(
                                observed.remote,
                                Some(SessionDescription { kind: SdpKind::Offer, .. })
                            );
                            if !answering {
                                return Err(PeerError::Rejected(
                                    "local answer without remote offer".into(),
                                ));
                            }
                        }
                    }
                    observed.local = Some(description);
                }
            }
        }
        self.report_candidates();
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> PeerResult<()> {
        self.gate(Operation::SetRemote).await?;
        let mut shared = self.shared.lock();
        let observed = &mut shared.observed;
        let local_offer = matches!(
            observed.local,
            Some(SessionDescription { kind: SdpKind::Offer, .. })
        ) && observed.remote.is_none();
        match description.kind {
            SdpKind::Offer if local_offer => {
                return Err(PeerError::Rejected(
                    "remote offer while local offer pending".into(),
                ))
            }
            SdpKind::Offer => observed.local = None,
            SdpKind::Answer if !local_offer => {
                return Err(PeerError::Rejected("answer without local offer".into()))
            }
            SdpKind::Answer => {}
        }
        observed.remote = Some(description.clone());
        observed.remote_installs.push(description);
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: IceCandidate) -> PeerResult<()> {
        self.gate(Operation::AddCandidate).await?;
        let mut shared = self.shared.lock();
        if shared.observed.remote.is_none() {
            return Err(PeerError::Rejected(
                "candidate before remote description".into(),
            ));
        }
        shared.observed.applied.push(candidate);
        Ok(())
    }

    async fn close(&mut self) -> PeerResult<()> {
        self.gate(Operation::Close).await?;
        self.shared.lock().observed.closed = true;
        Ok(())
    }
}
