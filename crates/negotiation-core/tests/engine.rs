use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use negotiation_core::{
    EngineEvent, EngineHandle, NegotiationConfig, NegotiationEngine, Operation, Participants,
    Role, ScriptedPeerFactory, SessionError, SignalingState,
};
use signal_channel::{
    ChannelError, Connector, IceCandidate, MemoryRelay, RelayChannel, RetryPolicy,
    SignalingMessage,
};
use test_timeout::timeout_test;
use tokio::sync::broadcast::{self, error::RecvError};
use url::Url;

fn relay_url() -> Url {
    Url::parse("memory://relay/room").unwrap()
}

struct Side {
    handle: EngineHandle,
    factory: ScriptedPeerFactory,
    events: broadcast::Receiver<EngineEvent>,
}

async fn start_side(
    relay: &MemoryRelay,
    local: &str,
    remote: &str,
    factory: ScriptedPeerFactory,
    config: NegotiationConfig,
) -> Side {
    let channel = Arc::new(RelayChannel::new(relay.clone()));
    let handle = NegotiationEngine::start(
        config,
        Participants::new(local, remote),
        channel,
        relay_url(),
        Arc::new(factory.clone()),
    )
    .await
    .expect("engine start");
    let events = handle.events();
    Side {
        handle,
        factory,
        events,
    }
}

async fn pair(relay: &MemoryRelay, gather: usize) -> (Side, Side) {
    let alice = start_side(
        relay,
        "alice",
        "bob",
        ScriptedPeerFactory::new("a").gather(gather),
        NegotiationConfig::default(),
    )
    .await;
    let bob = start_side(
        relay,
        "bob",
        "alice",
        ScriptedPeerFactory::new("b").gather(gather),
        NegotiationConfig::default(),
    )
    .await;
    (alice, bob)
}

async fn next_matching(
    events: &mut broadcast::Receiver<EngineEvent>,
    want: impl Fn(&EngineEvent) -> bool,
) -> EngineEvent {
    loop {
        match events.recv().await {
            Ok(event) if want(&event) => return event,
            Ok(EngineEvent::Failed(err)) => panic!("unexpected failure: {err}"),
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => panic!("engine events closed"),
        }
    }
}

async fn negotiated(side: &mut Side) {
    next_matching(&mut side.events, |event| *event == EngineEvent::Negotiated).await;
}

async fn eventually(mut check: impl FnMut() -> bool) {
    while !check() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[timeout_test]
async fn roles_follow_participant_order() {
    let relay = MemoryRelay::new();
    let (alice, bob) = pair(&relay, 0).await;
    assert_eq!(alice.handle.role(), Role::Impolite);
    assert_eq!(bob.handle.role(), Role::Polite);
}

#[timeout_test]
async fn identical_participants_never_connect() {
    let relay = MemoryRelay::new();
    let result = NegotiationEngine::start(
        NegotiationConfig::default(),
        Participants::new("same", "same"),
        Arc::new(RelayChannel::new(relay.clone())),
        relay_url(),
        Arc::new(ScriptedPeerFactory::new("x")),
    )
    .await;
    assert!(matches!(result, Err(SessionError::RoleConflict { .. })));
    assert_eq!(relay.connected(), 0);
}

#[timeout_test]
async fn single_offer_negotiates() {
    let relay = MemoryRelay::new();
    let (mut alice, mut bob) = pair(&relay, 0).await;

    alice.handle.start_offer().await.expect("offer");
    negotiated(&mut bob).await;
    negotiated(&mut alice).await;

    assert_eq!(alice.handle.signaling_state(), SignalingState::Stable);
    assert_eq!(bob.handle.signaling_state(), SignalingState::Stable);
    assert_eq!(alice.factory.recorder().local(), bob.factory.recorder().remote());
    assert_eq!(bob.factory.recorder().local(), alice.factory.recorder().remote());
}

#[timeout_test]
async fn glare_converges_on_impolite_offer_in_either_order() {
    for bob_first in [false, true] {
        let relay = MemoryRelay::new();
        let (mut alice, mut bob) = pair(&relay, 0).await;

        relay.pause();
        if bob_first {
            bob.handle.start_offer().await.expect("bob offer");
            alice.handle.start_offer().await.expect("alice offer");
        } else {
            alice.handle.start_offer().await.expect("alice offer");
            bob.handle.start_offer().await.expect("bob offer");
        }
        assert_eq!(alice.handle.signaling_state(), SignalingState::HaveLocalOffer);
        assert_eq!(bob.handle.signaling_state(), SignalingState::HaveLocalOffer);
        relay.resume();

        negotiated(&mut bob).await;
        negotiated(&mut alice).await;

        let alice_peer = alice.factory.recorder();
        let bob_peer = bob.factory.recorder();
        assert_eq!(bob_peer.rollbacks(), 1, "polite side rolls back");
        assert_eq!(alice_peer.rollbacks(), 0);
        assert_eq!(bob_peer.remote_installs(), vec![alice_peer.local().unwrap()]);
        assert_eq!(alice_peer.remote_installs(), vec![bob_peer.local().unwrap()]);
        assert_eq!(alice.handle.signaling_state(), SignalingState::Stable);
        assert_eq!(bob.handle.signaling_state(), SignalingState::Stable);
    }
}

#[timeout_test]
async fn early_candidates_are_applied_in_order_after_answer() {
    let relay = MemoryRelay::new();
    let (mut alice, mut bob) = pair(&relay, 2).await;

    relay.pause();
    alice.handle.start_offer().await.expect("alice offer");
    bob.handle.start_offer().await.expect("bob offer");
    relay.resume();

    negotiated(&mut alice).await;
    let alice_peer = alice.factory.recorder();
    let bob_peer = bob.factory.recorder();
    eventually(|| alice_peer.applied_candidates().len() == 4).await;
    eventually(|| bob_peer.applied_candidates().len() == 2).await;

    let from_bob: Vec<String> = alice_peer
        .applied_candidates()
        .iter()
        .map(|candidate| candidate.split(' ').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        from_bob,
        ["candidate:b-1-0", "candidate:b-1-1", "candidate:b-2-0", "candidate:b-2-1"]
    );
    assert!(bob_peer
        .applied_candidates()
        .iter()
        .all(|candidate| candidate.starts_with("candidate:a-1-")));
}

#[timeout_test]
async fn duplicate_answer_leaves_session_untouched() {
    let relay = MemoryRelay::new();
    let (mut alice, mut bob) = pair(&relay, 0).await;
    alice.handle.start_offer().await.expect("offer");
    negotiated(&mut bob).await;
    negotiated(&mut alice).await;

    let alice_peer = alice.factory.recorder();
    let answer = alice_peer.remote().expect("answer installed");
    let mut raw = relay.open(&relay_url()).await.expect("raw link");
    for message in [
        SignalingMessage::Answer {
            answer: answer.clone(),
        },
        SignalingMessage::Answer { answer },
        SignalingMessage::IceCandidate {
            candidate: IceCandidate::new("candidate:late"),
        },
    ] {
        raw.sink.send(message.encode().unwrap()).await.unwrap();
    }

    eventually(|| alice_peer.applied_candidates() == ["candidate:late"]).await;
    assert_eq!(alice_peer.remote_installs().len(), 1);
    assert_eq!(alice.handle.signaling_state(), SignalingState::Stable);
    assert!(alice.events.try_recv().is_err(), "dropped input raises no events");
}

#[timeout_test]
async fn renegotiates_after_relay_reconnect() {
    let relay = MemoryRelay::new();
    let (mut alice, mut bob) = pair(&relay, 0).await;
    alice.handle.start_offer().await.expect("offer");
    negotiated(&mut bob).await;
    negotiated(&mut alice).await;

    relay.sever();
    eventually(|| relay.connected() == 2).await;

    alice.handle.start_offer().await.expect("second offer");
    negotiated(&mut bob).await;
    negotiated(&mut alice).await;
    assert_eq!(bob.factory.recorder().remote_installs().len(), 2);
    assert_eq!(alice.handle.signaling_state(), SignalingState::Stable);
}

#[timeout_test(paused)]
async fn unrecoverable_channel_loss_closes_session() {
    let relay = MemoryRelay::new();
    let config = NegotiationConfig {
        reconnect: RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(50),
        },
        ..NegotiationConfig::default()
    };
    let mut alice = start_side(
        &relay,
        "alice",
        "bob",
        ScriptedPeerFactory::new("a"),
        config,
    )
    .await;

    relay.refuse_next(usize::MAX);
    relay.sever();

    let failure = next_matching(&mut alice.events, |event| {
        matches!(event, EngineEvent::Failed(_))
    })
    .await;
    assert!(matches!(
        failure,
        EngineEvent::Failed(SessionError::Channel(ChannelError::Connect(_)))
    ));
    alice.handle.closed().await;
    assert_eq!(alice.handle.start_offer().await, Err(SessionError::Closed));
}

#[timeout_test]
async fn hangup_interrupts_stalled_negotiation() {
    let relay = MemoryRelay::new();
    let mut alice = start_side(
        &relay,
        "alice",
        "bob",
        ScriptedPeerFactory::new("a"),
        NegotiationConfig::default(),
    )
    .await;
    let bob = start_side(
        &relay,
        "bob",
        "alice",
        ScriptedPeerFactory::new("b").stall_on(Operation::SetRemote),
        NegotiationConfig::default(),
    )
    .await;

    alice.handle.start_offer().await.expect("offer");
    let bob_peer = bob.factory.recorder();
    eventually(|| bob_peer.created() == 1).await;

    bob.handle.hangup().await;
    assert_eq!(bob.handle.signaling_state(), SignalingState::Closed);
    assert!(bob_peer.closed());
    assert_eq!(
        bob.handle.local_candidate(IceCandidate::new("candidate:after")),
        Err(SessionError::Closed)
    );

    alice.handle.hangup().await;
    assert!(alice.factory.recorder().closed());
    next_matching(&mut alice.events, |event| *event == EngineEvent::Closed).await;
    bob.handle.hangup().await;
}

#[timeout_test]
async fn hangup_before_any_offer_closes_cleanly() {
    let relay = MemoryRelay::new();
    let (alice, _bob) = pair(&relay, 0).await;
    alice.handle.hangup().await;
    assert_eq!(alice.handle.signaling_state(), SignalingState::Closed);
    assert_eq!(alice.factory.recorder().created(), 0);
    assert_eq!(alice.handle.start_offer().await, Err(SessionError::Closed));
}

#[timeout_test(paused)]
async fn offer_failed_by_refused_reconnect_is_resent_once() {
    let relay = MemoryRelay::new();
    let (mut alice, mut bob) = pair(&relay, 0).await;

    // the first reconnect of each side is refused, failing the queued offer
    relay.pause();
    relay.refuse_next(2);
    relay.sever();
    alice
        .handle
        .start_offer()
        .await
        .expect("offer resent after reconnect");

    eventually(|| relay.connected() == 2).await;
    relay.resume();
    negotiated(&mut bob).await;
    negotiated(&mut alice).await;

    assert_eq!(relay.frames(), 2, "one offer and one answer");
    assert_eq!(bob.factory.recorder().remote_installs().len(), 1);
    assert_eq!(alice.handle.signaling_state(), SignalingState::Stable);
    assert_eq!(bob.handle.signaling_state(), SignalingState::Stable);
}

#[timeout_test(paused)]
async fn offer_undeliverable_within_resend_window_closes_session() {
    let relay = MemoryRelay::new();
    let config = NegotiationConfig {
        resend_window: Duration::from_secs(1),
        reconnect: RetryPolicy {
            attempts: 50,
            backoff: Duration::from_millis(200),
        },
        ..NegotiationConfig::default()
    };
    let mut alice = start_side(
        &relay,
        "alice",
        "bob",
        ScriptedPeerFactory::new("a"),
        config,
    )
    .await;

    relay.refuse_next(usize::MAX);
    relay.sever();
    assert_eq!(
        alice.handle.start_offer().await,
        Err(SessionError::Channel(ChannelError::Timeout))
    );

    let failure = next_matching(&mut alice.events, |event| {
        matches!(event, EngineEvent::Failed(_))
    })
    .await;
    assert_eq!(
        failure,
        EngineEvent::Failed(SessionError::Channel(ChannelError::Timeout))
    );
    next_matching(&mut alice.events, |event| *event == EngineEvent::Closed).await;
    assert_eq!(alice.handle.signaling_state(), SignalingState::Closed);
    assert!(alice.factory.recorder().closed());
    assert_eq!(relay.frames(), 0);
}
