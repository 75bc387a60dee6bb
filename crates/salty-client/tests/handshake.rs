//! Full handshakes between engines over the in-memory relay.

mod common;

use common::{
    auth_token, initiator, key_store, responder, signaling, Harness, HandoverTask, MockRelay,
    NamedTask,
};
use rmpv::Value;
use salty_client::tasks::{RelayedDataTask, RELAYED_DATA_TASK_NAME};
use salty_client::{RoleConfig, SignalingError, SignalingEvent, SignalingRole, SignalingState};
use salty_core::{CloseCode, MessageId, FIRST_RESPONDER_ADDRESS, INITIATOR_ADDRESS};

fn relayed() -> Vec<Box<dyn salty_client::Task>> {
    vec![Box::new(RelayedDataTask::new())]
}

/// Initiator and one responder with a shared token.
fn pair() -> (Harness, usize, usize) {
    let initiator_keys = key_store();
    let responder_keys = key_store();
    let token = auth_token();

    let mut harness = Harness::new(MockRelay::new(*initiator_keys.public_key()));
    let i = harness.add(initiator(&initiator_keys, &token, relayed()));
    let r = harness.add(responder(
        &responder_keys,
        initiator_keys.public_key(),
        &token,
        relayed(),
    ));
    (harness, i, r)
}

fn closed_with(events: &[SignalingEvent], code: u16) -> bool {
    events.contains(&SignalingEvent::Closed(code))
}

#[test]
fn test_initiator_first() {
    let (mut harness, i, r) = pair();

    harness.connect(i);
    assert_eq!(harness.state(i), SignalingState::PeerHandshake);
    assert_eq!(harness.client(i).address(), INITIATOR_ADDRESS);

    harness.connect(r);
    assert_eq!(harness.state(i), SignalingState::Task);
    assert_eq!(harness.state(r), SignalingState::Task);
    assert_eq!(harness.client(r).address(), FIRST_RESPONDER_ADDRESS);
    assert_eq!(harness.client(i).peer_address(), Some(FIRST_RESPONDER_ADDRESS));
    assert_eq!(harness.client(i).task_name(), Some(RELAYED_DATA_TASK_NAME));
    assert_eq!(harness.client(r).task_name(), Some(RELAYED_DATA_TASK_NAME));
    assert!(harness.client(i).pending_responders().is_empty());

    harness.client_mut(i).disconnect();
    harness.pump();

    assert_eq!(harness.state(i), SignalingState::Closed);
    assert_eq!(harness.state(r), SignalingState::Closed);
    assert!(harness.errors(i).is_empty());
    assert!(harness.errors(r).is_empty());
    assert!(harness
        .events(r)
        .contains(&SignalingEvent::PeerClosed(CloseCode::GoingAway)));
    assert!(closed_with(harness.events(i), 1000));
}

#[test]
fn test_responder_first() {
    let (mut harness, i, r) = pair();

    harness.connect(r);
    assert_eq!(harness.client(r).role(), SignalingRole::Responder);
    assert_eq!(harness.state(r), SignalingState::PeerHandshake);

    harness.connect(i);
    assert_eq!(harness.state(i), SignalingState::Task);
    assert_eq!(harness.state(r), SignalingState::Task);

    harness.client_mut(r).disconnect();
    harness.pump();

    assert_eq!(harness.state(i), SignalingState::Closed);
    assert_eq!(harness.state(r), SignalingState::Closed);
    assert!(harness.errors(i).is_empty());
    assert!(harness.errors(r).is_empty());
}

#[test]
fn test_state_changes_are_reported_in_order() {
    let (mut harness, i, r) = pair();
    harness.connect(i);
    harness.connect(r);

    let states: Vec<SignalingState> = harness
        .events(r)
        .iter()
        .filter_map(|event| match event {
            SignalingEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            SignalingState::WsConnecting,
            SignalingState::ServerHandshake,
            SignalingState::PeerHandshake,
            SignalingState::Task,
        ]
    );
}

#[test]
fn test_trusted_keys_skip_token() {
    let initiator_keys = key_store();
    let responder_keys = key_store();

    let mut harness = Harness::new(MockRelay::new(*initiator_keys.public_key()));
    let i = harness.add(signaling(
        initiator_keys.clone(),
        RoleConfig::Initiator {
            auth_token: auth_token(),
            responder_trusted_key: Some(*responder_keys.public_key()),
        },
        relayed(),
        None,
    ));
    let r = harness.add(signaling(
        responder_keys,
        RoleConfig::Responder {
            initiator_public_key: *initiator_keys.public_key(),
            auth_token: None,
        },
        relayed(),
        None,
    ));
    assert!(harness.client(r).auth_token().is_none());

    harness.connect(i);
    harness.connect(r);

    assert_eq!(harness.state(i), SignalingState::Task);
    assert_eq!(harness.state(r), SignalingState::Task);
    assert!(harness.errors(i).is_empty());
}

#[test]
fn test_wrong_token_drops_responder() {
    let initiator_keys = key_store();
    let mut harness = Harness::new(MockRelay::new(*initiator_keys.public_key()));
    let i = harness.add(initiator(&initiator_keys, &auth_token(), relayed()));
    let r = harness.add(responder(
        &key_store(),
        initiator_keys.public_key(),
        &auth_token(),
        relayed(),
    ));

    harness.connect(i);
    harness.connect(r);

    // Only the responder is affected
    assert_eq!(harness.state(i), SignalingState::PeerHandshake);
    assert!(harness.errors(i).is_empty());
    assert!(closed_with(
        harness.events(r),
        CloseCode::InitiatorCouldNotDecrypt.as_u16()
    ));
    assert_eq!(harness.state(r), SignalingState::Closed);
}

#[test]
fn test_late_responder_is_dropped() {
    let initiator_keys = key_store();
    let token = auth_token();
    let mut harness = Harness::new(MockRelay::new(*initiator_keys.public_key()));
    let i = harness.add(initiator(&initiator_keys, &token, relayed()));
    let first = harness.add(responder(&key_store(), initiator_keys.public_key(), &token, relayed()));
    let second = harness.add(responder(&key_store(), initiator_keys.public_key(), &token, relayed()));

    harness.connect(i);
    harness.connect(first);
    assert_eq!(harness.state(first), SignalingState::Task);

    harness.connect(second);
    assert!(closed_with(
        harness.events(second),
        CloseCode::DroppedByInitiator.as_u16()
    ));
    assert_eq!(harness.state(i), SignalingState::Task);
    assert_eq!(harness.state(first), SignalingState::Task);
}

#[test]
fn test_concurrent_responders_one_wins() {
    let initiator_keys = key_store();
    let token = auth_token();
    let mut harness = Harness::new(MockRelay::new(*initiator_keys.public_key()));
    let i = harness.add(initiator(&initiator_keys, &token, relayed()));
    let a = harness.add(responder(&key_store(), initiator_keys.public_key(), &token, relayed()));
    let b = harness.add(responder(&key_store(), initiator_keys.public_key(), &token, relayed()));

    harness.connect(a);
    harness.connect(b);
    harness.connect(i);

    assert_eq!(harness.state(i), SignalingState::Task);
    let winners = [a, b]
        .iter()
        .filter(|id| harness.state(**id) == SignalingState::Task)
        .count();
    assert_eq!(winners, 1);

    let loser = if harness.state(a) == SignalingState::Task { b } else { a };
    assert!(closed_with(
        harness.events(loser),
        CloseCode::DroppedByInitiator.as_u16()
    ));
    assert!(harness.client(i).pending_responders().is_empty());
}

#[test]
fn test_no_shared_task() {
    let initiator_keys = key_store();
    let token = auth_token();
    let mut harness = Harness::new(MockRelay::new(*initiator_keys.public_key()));
    let i = harness.add(initiator(&initiator_keys, &token, vec![Box::new(NamedTask::new("a"))]));
    let r = harness.add(responder(
        &key_store(),
        initiator_keys.public_key(),
        &token,
        vec![Box::new(NamedTask::new("b")), Box::new(NamedTask::new("c"))],
    ));

    harness.connect(i);
    harness.connect(r);

    assert_eq!(harness.errors(i), vec![&SignalingError::NoSharedTask]);
    assert!(closed_with(harness.events(i), CloseCode::NoSharedTask.as_u16()));

    assert!(harness
        .events(r)
        .contains(&SignalingEvent::PeerClosed(CloseCode::NoSharedTask)));
    assert!(closed_with(harness.events(r), CloseCode::NoSharedTask.as_u16()));
}

#[test]
fn test_task_selection_follows_initiator_order() {
    let initiator_keys = key_store();
    let token = auth_token();
    let chosen = NamedTask::new("b");
    let initiator_log = chosen.log.clone();
    let responder_b = NamedTask::new("b");
    let responder_log = responder_b.log.clone();

    let mut harness = Harness::new(MockRelay::new(*initiator_keys.public_key()));
    let i = harness.add(initiator(
        &initiator_keys,
        &token,
        vec![Box::new(NamedTask::new("x")), Box::new(chosen), Box::new(NamedTask::new("a"))],
    ));
    let r = harness.add(responder(
        &key_store(),
        initiator_keys.public_key(),
        &token,
        vec![Box::new(NamedTask::new("a")), Box::new(responder_b)],
    ));

    harness.connect(i);
    harness.connect(r);

    assert_eq!(harness.client(i).task_name(), Some("b"));
    assert_eq!(harness.client(r).task_name(), Some("b"));
    // Each side was initialised with the other's data for "b"
    assert_eq!(*initiator_log.lock().unwrap(), vec!["init b", "done"]);
    assert_eq!(*responder_log.lock().unwrap(), vec!["init b", "done"]);

    harness.client_mut(r).disconnect();
    harness.pump();
    assert_eq!(
        *responder_log.lock().unwrap(),
        vec!["init b", "done", "close 1001"]
    );
    assert_eq!(
        *initiator_log.lock().unwrap(),
        vec!["init b", "done", "close 1001"]
    );
}

#[test]
fn test_pinned_server_key() {
    let server_keys = key_store();
    let initiator_keys = key_store();
    let token = auth_token();

    let relay = MockRelay::new(*initiator_keys.public_key()).with_permanent_key(server_keys.clone());
    let mut harness = Harness::new(relay);
    let i = harness.add(signaling(
        initiator_keys.clone(),
        RoleConfig::Initiator {
            auth_token: token.clone(),
            responder_trusted_key: None,
        },
        relayed(),
        Some(*server_keys.public_key()),
    ));
    let r = harness.add(signaling(
        key_store(),
        RoleConfig::Responder {
            initiator_public_key: *initiator_keys.public_key(),
            auth_token: Some(token),
        },
        relayed(),
        Some(*server_keys.public_key()),
    ));

    harness.connect(i);
    harness.connect(r);
    assert_eq!(harness.state(i), SignalingState::Task);
    assert_eq!(harness.state(r), SignalingState::Task);
}

#[test]
fn test_wrong_pinned_server_key_fails() {
    let initiator_keys = key_store();
    let relay = MockRelay::new(*initiator_keys.public_key()).with_permanent_key(key_store());
    let mut harness = Harness::new(relay);
    let i = harness.add(signaling(
        initiator_keys,
        RoleConfig::Initiator {
            auth_token: auth_token(),
            responder_trusted_key: None,
        },
        relayed(),
        Some(*key_store().public_key()),
    ));

    harness.connect(i);

    assert_eq!(harness.state(i), SignalingState::Closed);
    assert!(matches!(
        harness.errors(i).as_slice(),
        [SignalingError::InvalidKey(_)]
    ));
    assert!(closed_with(harness.events(i), CloseCode::ProtocolError.as_u16()));
}

#[test]
fn test_pinned_key_requires_signed_keys() {
    let initiator_keys = key_store();
    // Relay without a permanent key never signs
    let mut harness = Harness::new(MockRelay::new(*initiator_keys.public_key()));
    let i = harness.add(signaling(
        initiator_keys,
        RoleConfig::Initiator {
            auth_token: auth_token(),
            responder_trusted_key: None,
        },
        relayed(),
        Some(*key_store().public_key()),
    ));

    harness.connect(i);
    assert_eq!(harness.state(i), SignalingState::Closed);
    assert!(matches!(
        harness.errors(i).as_slice(),
        [SignalingError::Validation(_)]
    ));
}

#[test]
fn test_relayed_data_and_application_messages() {
    let (mut harness, i, r) = pair();
    harness.connect(i);
    harness.connect(r);

    harness
        .client_mut(i)
        .send_task_message(RelayedDataTask::data_message(Value::from("hello")))
        .unwrap();
    harness
        .client_mut(r)
        .send_application_message(Value::from(42))
        .unwrap();
    harness.pump();

    assert!(harness
        .events(r)
        .contains(&SignalingEvent::TaskData(Value::from("hello"))));
    assert!(harness
        .events(i)
        .contains(&SignalingEvent::ApplicationMessage(Value::from(42))));
}

#[test]
fn test_sending_before_task_state_fails() {
    let (mut harness, i, _) = pair();
    harness.connect(i);

    let result = harness
        .client_mut(i)
        .send_application_message(Value::from("too early"));
    assert!(matches!(result, Err(SignalingError::InternalState(_))));
}

#[test]
fn test_unsupported_task_message_rejected_locally() {
    let (mut harness, i, r) = pair();
    harness.connect(i);
    harness.connect(r);

    let message = salty_core::TaskMessage::new("offer", vec![]);
    let result = harness.client_mut(i).send_task_message(message);
    assert!(matches!(result, Err(SignalingError::InternalState(_))));
    assert_eq!(harness.state(i), SignalingState::Task);
}

#[test]
fn test_send_error_for_authenticated_peer_resets() {
    let (mut harness, i, r) = pair();
    harness.connect(i);
    harness.connect(r);

    harness.relay.vanish(r);
    harness.pump();
    assert_eq!(harness.state(r), SignalingState::Closed);

    harness
        .client_mut(i)
        .send_application_message(Value::from("anyone there?"))
        .unwrap();
    harness.pump();

    assert!(harness
        .events(i)
        .contains(&SignalingEvent::SignalingConnectionLost(FIRST_RESPONDER_ADDRESS)));
    assert_eq!(harness.state(i), SignalingState::Closed);
    assert!(closed_with(harness.events(i), CloseCode::ClosingNormal.as_u16()));
}

#[test]
fn test_send_error_for_non_peer_address_is_rejected() {
    let (mut harness, i, _) = pair();
    harness.connect(i);
    assert_eq!(harness.state(i), SignalingState::PeerHandshake);

    // An initiator never sends to another initiator address.
    let id = MessageId::from_bytes([INITIATOR_ADDRESS, INITIATOR_ADDRESS, 0, 0, 0, 0, 0, 1]);
    harness.relay.send_error(i, id);
    harness.pump();

    assert!(matches!(
        harness.errors(i).as_slice(),
        [SignalingError::Validation(_)]
    ));
    assert!(!harness
        .events(i)
        .iter()
        .any(|e| matches!(e, SignalingEvent::SignalingConnectionLost(_))));
    assert!(closed_with(harness.events(i), CloseCode::ProtocolError.as_u16()));
}

#[test]
fn test_send_error_for_responder_address_on_responder_is_rejected() {
    let (mut harness, i, r) = pair();
    harness.connect(i);
    harness.connect(r);
    let ours = harness.client(r).address();

    let id = MessageId::from_bytes([ours, FIRST_RESPONDER_ADDRESS + 1, 0, 0, 0, 0, 0, 1]);
    harness.relay.send_error(r, id);
    harness.pump();

    assert!(matches!(
        harness.errors(r).as_slice(),
        [SignalingError::Validation(_)]
    ));
    assert!(closed_with(harness.events(r), CloseCode::ProtocolError.as_u16()));
}

#[test]
fn test_connecting_again_in_task_state_keeps_session() {
    let (mut harness, i, r) = pair();
    harness.connect(i);
    harness.connect(r);
    assert_eq!(harness.state(i), SignalingState::Task);

    harness.client_mut(i).on_connecting();
    assert_eq!(harness.state(i), SignalingState::Task);
    assert_eq!(harness.client(i).address(), INITIATOR_ADDRESS);

    harness
        .client_mut(i)
        .send_application_message(Value::from("still here"))
        .unwrap();
    harness.pump();
    assert!(harness
        .events(r)
        .contains(&SignalingEvent::ApplicationMessage(Value::from("still here"))));
    assert!(harness.errors(i).is_empty());
}

#[test]
fn test_responder_disconnect_is_reported() {
    let (mut harness, i, r) = pair();
    harness.connect(i);
    harness.connect(r);

    harness.client_mut(r).disconnect();
    harness.pump();

    assert!(harness
        .events(i)
        .contains(&SignalingEvent::PeerClosed(CloseCode::GoingAway)));
    assert!(harness.errors(i).is_empty());
}

#[test]
fn test_replayed_frame_resets_connection() {
    let (mut harness, i, r) = pair();
    harness.connect(i);
    harness.connect(r);

    harness
        .client_mut(i)
        .send_application_message(Value::from(1))
        .unwrap();
    harness.pump();

    let replay = harness.relay.delivered(r).last().unwrap().clone();
    harness.client_mut(r).on_frame(&replay);
    harness.pump();

    assert!(matches!(
        harness.errors(r).as_slice(),
        [SignalingError::Validation(_)]
    ));
    assert!(closed_with(harness.events(r), CloseCode::ProtocolError.as_u16()));
}

#[test]
fn test_short_frame_resets_connection() {
    let (mut harness, i, _) = pair();
    harness.connect(i);

    harness.client_mut(i).on_frame(&[1, 2, 3]);
    harness.pump();

    assert!(matches!(
        harness.errors(i).as_slice(),
        [SignalingError::Serialization(_)]
    ));
    assert_eq!(harness.state(i), SignalingState::Closed);
}

#[test]
fn test_handover_keeps_task_state() {
    let initiator_keys = key_store();
    let token = auth_token();
    let initiator_task = HandoverTask::new();
    let initiator_outbox = initiator_task.outbox.clone();

    let mut harness = Harness::new(MockRelay::new(*initiator_keys.public_key()));
    let i = harness.add(initiator(&initiator_keys, &token, vec![Box::new(initiator_task)]));
    let r = harness.add(responder(
        &key_store(),
        initiator_keys.public_key(),
        &token,
        vec![Box::new(HandoverTask::new())],
    ));

    harness.connect(i);
    harness.connect(r);

    for id in [i, r] {
        assert_eq!(harness.state(id), SignalingState::Task);
        assert!(harness.client(id).handover().both());
        assert!(harness.events(id).contains(&SignalingEvent::Handover));
        assert!(!closed_with(harness.events(id), CloseCode::Handover.as_u16()));
    }

    // Signaling messages now travel through the task
    harness
        .client_mut(i)
        .send_application_message(Value::from("via task"))
        .unwrap();
    harness.pump();
    let frames = std::mem::take(&mut *initiator_outbox.lock().unwrap());
    assert_eq!(frames.len(), 1);

    harness.client_mut(r).on_task_channel_frame(&frames[0]);
    harness.pump();
    assert!(harness
        .events(r)
        .contains(&SignalingEvent::ApplicationMessage(Value::from("via task"))));
}
