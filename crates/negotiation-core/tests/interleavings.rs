//! Property tests for the negotiator under interleaved local and remote events.
//!
//! Two negotiators exchange messages through per-direction FIFO queues. Any
//! message already sent may be queued again later, which models an
//! at-least-once relay redelivering a copy after the original.
//! - the description/state pairing holds after every step
//! - once both queues drain, both sides are stable with matching descriptions

use std::collections::VecDeque;
use std::sync::Arc;

use negotiation_core::{
    CandidateSink, NegotiationConfig, Negotiator, Role, ScriptedPeerFactory, SignalingState, Step,
};
use proptest::prelude::*;
use signal_channel::{IceCandidate, SignalingMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Alice,
    Bob,
}

impl Side {
    fn other(self) -> Self {
        match self {
            Side::Alice => Side::Bob,
            Side::Bob => Side::Alice,
        }
    }
}

#[derive(Debug, Clone)]
enum Action {
    Offer(Side),
    LocalCandidate(Side),
    /// Delivers the oldest message queued by this side.
    Deliver(Side),
    /// Queues another copy of something this side already sent.
    Redeliver(Side, usize),
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Alice), Just(Side::Bob)]
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        2 => side_strategy().prop_map(Action::Offer),
        1 => side_strategy().prop_map(Action::LocalCandidate),
        4 => side_strategy().prop_map(Action::Deliver),
        2 => (side_strategy(), any::<usize>()).prop_map(|(side, pick)| Action::Redeliver(side, pick)),
    ]
}

struct Endpoint {
    negotiator: Negotiator,
    sent: Vec<SignalingMessage>,
    in_flight: VecDeque<SignalingMessage>,
    gathered: usize,
}

impl Endpoint {
    fn new(role: Role, label: &str) -> Self {
        let factory = ScriptedPeerFactory::new(label);
        Self {
            negotiator: Negotiator::new(
                role,
                Arc::new(factory),
                CandidateSink::discard(),
                &NegotiationConfig::default(),
            ),
            sent: Vec::new(),
            in_flight: VecDeque::new(),
            gathered: 0,
        }
    }

    fn emit(&mut self, step: Step) {
        if let Some(message) = step.outbound {
            self.sent.push(message.clone());
            self.in_flight.push_back(message);
        }
    }
}

struct Pair {
    alice: Endpoint,
    bob: Endpoint,
}

impl Pair {
    fn new() -> Self {
        Self {
            alice: Endpoint::new(Role::Impolite, "alice"),
            bob: Endpoint::new(Role::Polite, "bob"),
        }
    }

    fn endpoint(&mut self, side: Side) -> &mut Endpoint {
        match side {
            Side::Alice => &mut self.alice,
            Side::Bob => &mut self.bob,
        }
    }

    async fn apply(&mut self, action: Action) {
        match action {
            Action::Offer(side) => {
                let endpoint = self.endpoint(side);
                let step = endpoint.negotiator.start_offer().await.expect("start offer");
                endpoint.emit(step);
            }
            Action::LocalCandidate(side) => {
                let endpoint = self.endpoint(side);
                endpoint.gathered += 1;
                let candidate = IceCandidate::new(format!(
                    "candidate:{side:?}-{} 1 udp 2122260223 127.0.0.1 50000 typ host",
                    endpoint.gathered
                ));
                let step = endpoint.negotiator.on_local_candidate(candidate);
                endpoint.emit(step);
            }
            Action::Deliver(side) => {
                self.deliver(side).await;
            }
            Action::Redeliver(side, pick) => {
                let endpoint = self.endpoint(side);
                if !endpoint.sent.is_empty() {
                    let copy = endpoint.sent[pick % endpoint.sent.len()].clone();
                    endpoint.in_flight.push_back(copy);
                }
            }
        }
    }

    async fn deliver(&mut self, from: Side) -> bool {
        let Some(message) = self.endpoint(from).in_flight.pop_front() else {
            return false;
        };
        let receiver = self.endpoint(from.other());
        let step = receiver
            .negotiator
            .on_message(message)
            .await
            .expect("message handled");
        receiver.emit(step);
        true
    }

    async fn drain(&mut self) {
        loop {
            let from_alice = self.deliver(Side::Alice).await;
            let from_bob = self.deliver(Side::Bob).await;
            if !from_alice && !from_bob {
                break;
            }
        }
    }

    fn assert_consistent(&self) {
        for endpoint in [&self.alice, &self.bob] {
            let session = endpoint.negotiator.session();
            if let Err(violation) = session.check_invariants() {
                panic!("{:?}: {violation}", session.role());
            }
            assert!(!session.is_closed());
        }
    }

    fn assert_converged(&self) {
        let alice = self.alice.negotiator.session();
        let bob = self.bob.negotiator.session();
        assert_eq!(alice.signaling_state(), SignalingState::Stable);
        assert_eq!(bob.signaling_state(), SignalingState::Stable);
        assert_eq!(alice.local_description(), bob.remote_description());
        assert_eq!(bob.local_description(), alice.remote_description());
        assert_eq!(alice.pending_candidates(), 0);
        assert_eq!(bob.pending_candidates(), 0);
    }
}

fn run(actions: Vec<Action>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let mut pair = Pair::new();
        for action in actions {
            pair.apply(action).await;
            pair.assert_consistent();
        }
        pair.drain().await;
        pair.assert_consistent();
        pair.assert_converged();
    });
}

#[test]
fn prop_interleavings_with_redelivery_converge() {
    proptest!(|(actions in prop::collection::vec(action_strategy(), 0..48))| {
        run(actions);
    });
}

#[test]
fn redelivered_first_round_survives_renegotiation() {
    run(vec![
        Action::Offer(Side::Alice),
        Action::Deliver(Side::Alice),
        Action::Deliver(Side::Bob),
        Action::Offer(Side::Alice),
        Action::Redeliver(Side::Bob, 0),
        Action::Redeliver(Side::Alice, 0),
        Action::Deliver(Side::Bob),
        Action::Deliver(Side::Alice),
    ]);
}

#[test]
fn crossing_offers_with_copies_converge() {
    run(vec![
        Action::Offer(Side::Alice),
        Action::Offer(Side::Bob),
        Action::LocalCandidate(Side::Bob),
        Action::Redeliver(Side::Bob, 0),
        Action::Deliver(Side::Bob),
        Action::Deliver(Side::Alice),
        Action::Offer(Side::Bob),
        Action::Deliver(Side::Bob),
        Action::Deliver(Side::Bob),
    ]);
}
