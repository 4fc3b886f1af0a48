//! Integration-style tests for the numbered end-to-end scenarios, each
//! exercised through the primitives a real orchestrator composes them
//! from: handshake key derivation, the message engine, the state
//! machine, and the safety layer. Scenarios that need a full
//! orchestrator session (MA-request idempotence under the 1 s timer,
//! mission completion bookkeeping, auto-stop debounce, the bridge's
//! meta trailer) are covered where those sessions live — `obu-node`,
//! `rbc-node`, and `bridge`'s own `#[cfg(test)]` modules.

use etcs_core::engine::{gate_inbound, EtcsEngine};
use etcs_core::handshake::{derive_session_keys, NoncePair, RootKeys};
use etcs_core::safety::{wrap, unwrap, Direction, SafetyError, SessionKeyStore};
use etcs_core::state_machine::StateMachine;
use etcs_types::{nid, Event, FieldValues, SessionKeys, SessionState, Source, TemplateTable};

/// Scenario 1: handshake happy path. AU1 carries the OBU nonce pair, AU2
/// the RBC's; both sides derive identical session keys from the fixed
/// literal nonces, and the OBU side's own transition sequence reaches
/// VERSION_EXCHANGED after the 32-ACK.
#[test]
fn scenario_1_handshake_happy_path() {
    let root = RootKeys { k1: 10, k2: 20, k3: 30 };
    let obu_nonce = NoncePair { l: 0xAAAA0001, r: 0xAAAA0002 };
    let rbc_nonce = NoncePair { l: 0xBBBB0001, r: 0xBBBB0002 };

    let obu_keys = derive_session_keys(root, obu_nonce, rbc_nonce);
    let rbc_keys = derive_session_keys(root, obu_nonce, rbc_nonce);
    assert_eq!(obu_keys, rbc_keys);

    let mut sm = StateMachine::new();
    sm.transition(Event::Connected, 0);
    sm.transition(Event::Au1Sent, 0);
    assert_eq!(sm.state(), SessionState::HandshakeInitiated);
    sm.transition(Event::Au2Received, 10);
    sm.transition(Event::M32Acked, 20);
    assert_eq!(sm.state(), SessionState::SessionEstablished);
}

/// Scenario 2: MA request after train accept. From TRAIN_DATA_EXCHANGED,
/// a 41 moves the session to MA_REQUEST_READY; the engine's send-side
/// dedup (`processed_on_send`) keeps a repeated attempt to enqueue the
/// same sequence from producing a second pump result, matching the
/// `maRequestSent` latch's single-emission guarantee.
#[test]
fn scenario_2_ma_request_after_train_accept() {
    let mut sm = StateMachine::new();
    for ev in [Event::Connected, Event::Au1Sent, Event::Au2Received, Event::M32Acked, Event::M8Received] {
        sm.transition(ev, 0);
    }
    assert_eq!(sm.state(), SessionState::TrainDataExchanged);
    sm.transition(Event::M41Acked, 0);
    assert_eq!(sm.state(), SessionState::MaRequestReady);

    let mut engine = EtcsEngine::new(TemplateTable::standard());
    let msg = engine.build_from_template("ma_request", FieldValues::new().with_field("D_LRBG", 3000), Source::LocalObu, 1000).unwrap();
    assert_eq!(msg.nid_message, nid::MA_REQUEST);

    engine.send_throttled("rbc/rbc-1/in".to_string(), msg.clone(), true);
    let first = engine.pump(sm.state());
    assert!(first.is_some());

    engine.send_throttled("rbc/rbc-1/in".to_string(), msg, true);
    let second = engine.pump(sm.state());
    assert!(second.is_none(), "a message with an already-sent sequence must not be pumped again");
}

/// Scenario 3: position report + ack. A sensor event builds Message 136
/// carrying the mapped `D_LRBG`; the matching generic ack references it
/// by `NID_MESSAGE_REF`.
#[test]
fn scenario_3_position_report_and_ack() {
    let mut engine = EtcsEngine::new(TemplateTable::standard());
    let packet0 = FieldValues::new().with_field("Q_SCALE", 1).with_field("D_LRBG", nid::sensor_to_d_lrbg("S3").unwrap()).with_field("Q_DIRLRBG", 1);
    let position = engine
        .build_from_template("position_report", FieldValues::new().with_sub_packet("packet0", packet0), Source::LocalObu, 2000)
        .unwrap();
    assert_eq!(position.nid_message, nid::POSITION_REPORT);
    assert_eq!(position.fields.sub_packets.get("packet0").and_then(|p| p.get("D_LRBG")), Some(3000));

    let ack = engine
        .build_from_template("generic_ack", FieldValues::new().with_field("NID_MESSAGE_REF", nid::POSITION_REPORT as i64), Source::LocalRbc, 2050)
        .unwrap();
    assert_eq!(ack.nid_message, nid::GENERIC_ACK);
    assert_eq!(ack.field("NID_MESSAGE_REF"), Some(nid::POSITION_REPORT as i64));
}

/// Scenario 4: mission complete. Once monitoring has started, repeated
/// `PositionUpdate`s stay in MISSION_MONITORING until `MissionComplete`
/// (the orchestrator's `passedSections >= totalSections + 1` check) ends
/// the session.
#[test]
fn scenario_4_mission_complete_transitions_to_terminated() {
    let mut sm = StateMachine::new();
    for ev in [
        Event::Connected,
        Event::Au1Sent,
        Event::Au2Received,
        Event::M32Acked,
        Event::M8Received,
        Event::M41Acked,
        Event::MonitoringStarted,
    ] {
        sm.transition(ev, 0);
    }
    assert_eq!(sm.state(), SessionState::MissionMonitoring);

    for t in 1..=3 {
        sm.transition(Event::PositionUpdate, t);
        assert_eq!(sm.state(), SessionState::MissionMonitoring);
    }

    sm.transition(Event::MissionComplete, 4);
    assert_eq!(sm.state(), SessionState::SessionTerminated);
}

/// Scenario 7: CRC tamper. Flipping a bit inside the trailing CRC bytes
/// of an otherwise-valid PDU must fail `unwrap` with `CrcMismatch`, not
/// silently decode.
#[tokio::test]
async fn scenario_7_crc_tamper_is_rejected() {
    let table = TemplateTable::standard();
    let keys = SessionKeyStore::new();
    keys.set(SessionKeys::new(11, 22, 33)).await;

    let template = table.by_nid(nid::POSITION_REPORT).unwrap();
    let values = FieldValues::new().with_field("NID_MESSAGE", nid::POSITION_REPORT as i64).with_field("SEQUENCE", 1).with_field("D_LRBG", 3000);
    let pdu = wrap(template, &values, Direction::ObuToRbc, &table, &keys).await.unwrap();

    let mut bytes = pdu.to_bytes();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;

    assert_eq!(unwrap(&bytes, &table, &keys).await, Err(SafetyError::CrcMismatch));
}

/// Loop-prevention invariant underlying every scenario above: only
/// `Source::Wire` messages are ever admitted inbound.
#[test]
fn inbound_gate_rejects_locally_originated_messages() {
    let msg = etcs_types::EtcsMessage {
        nid_message: nid::SYSTEM_VERSION,
        sequence: 1,
        origin: Source::LocalObu,
        t_train: None,
        t_train_ack: None,
        t_app_ms: 0,
        t_send_ms: 0,
        fields: FieldValues::new(),
        extra: std::collections::HashMap::new(),
    };
    assert!(gate_inbound(&msg, SessionState::HandshakeInitiated).is_err());
}
