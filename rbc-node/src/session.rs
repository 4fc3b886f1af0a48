//! RBC-side session orchestration: handshake responder, the canonical
//! per-NID response table, operator-granted Movement Authority, and
//! inbound dedup, per spec §4.7/§4.10.

use etcs_core::dedup::DedupCache;
use etcs_core::engine::{gate_inbound, EngineError, EtcsEngine};
use etcs_core::handshake::{derive_session_keys, NoncePair, RootKeys};
use etcs_core::packet15::{generate_packet15, Packet15Error};
use etcs_core::safety::SessionKeyStore;
use etcs_core::state_machine::StateMachine;
use etcs_types::{nid, topics, Au1Wire, Au2Wire, Event, EtcsMessage, FieldValues, Packet15, SessionState, Source, TemplateTable, Topology};
use tracing::warn;

use crate::config::RbcConfig;
use crate::topology::full_path;

const EXPECTED_M_VERSION: i64 = 1;

pub struct RbcSession {
    pub state_machine: StateMachine,
    pub engine: EtcsEngine,
    pub keys: SessionKeyStore,
    pub dedup: DedupCache,
    pub obu_id: String,
    pub rbc_id: String,
    root_keys: RootKeys,
    pub ma_request_received: bool,
    pub topology: Topology,
    route_from: String,
    route_to: String,
}

impl RbcSession {
    pub fn new(config: &RbcConfig, topology: Topology) -> Self {
        Self {
            state_machine: StateMachine::new(),
            engine: EtcsEngine::new(TemplateTable::standard()),
            keys: SessionKeyStore::new(),
            dedup: DedupCache::new(),
            obu_id: config.obu_id.clone(),
            rbc_id: config.rbc_id.clone(),
            root_keys: RootKeys { k1: config.root_key1, k2: config.root_key2, k3: config.root_key3 },
            ma_request_received: false,
            topology,
            route_from: config.route_from.clone(),
            route_to: config.route_to.clone(),
        }
    }

    fn rbc_out_topic(&self) -> String {
        topics::rbc_out(&self.rbc_id)
    }

    fn enqueue(&mut self, name: &str, overrides: FieldValues, now_ms: u64) {
        match self.engine.build_from_template(name, overrides, Source::LocalRbc, now_ms) {
            Ok(msg) => {
                self.engine.send_throttled(self.rbc_out_topic(), msg, true);
            }
            Err(err) => warn!(template = name, error = %err, "failed to build message"),
        }
    }

    /// Receives AU1, generates the RBC nonce pair, derives the session
    /// keys from both nonces (AU1 already carries the OBU's half) and
    /// returns AU2. The OBU's own `KEY_UPDATE` notification is purely for
    /// the bridge's benefit (spec §4.3); the RBC never waits on it.
    pub async fn on_au1(&mut self, au1: &Au1Wire, now_ms: u64) -> Au2Wire {
        self.state_machine.transition(Event::Connected, now_ms);
        self.state_machine.transition(Event::Au1Sent, now_ms);

        let obu_nonce = NoncePair { l: au1.obu_nonce_l, r: au1.obu_nonce_r };
        let rbc_nonce = NoncePair::generate();
        let keys = derive_session_keys(self.root_keys, obu_nonce, rbc_nonce);
        self.keys.set(keys).await;
        self.state_machine.transition(Event::Au2Received, now_ms);

        Au2Wire { obu_id: au1.obu_id.clone(), rbc_id: au1.rbc_id.clone(), rbc_nonce_l: rbc_nonce.l, rbc_nonce_r: rbc_nonce.r }
    }

    pub async fn handle_inbound(&mut self, msg: EtcsMessage, now_ms: u64) -> Result<(), EngineError> {
        gate_inbound(&msg, self.state_machine.state())?;
        if self.dedup.is_duplicate(&msg, now_ms) {
            return Ok(());
        }

        match msg.nid_message {
            nid::SESSION_ESTABLISH => self.on_session_establish(now_ms),
            nid::KEYS_AUTH => self.on_keys_auth(now_ms),
            nid::TRAIN_DATA => self.on_train_data(now_ms),
            nid::TRAIN_ACCEPTANCE => self.on_train_acceptance(now_ms),
            nid::MA_REQUEST => self.on_ma_request(now_ms),
            nid::POSITION_REPORT => self.on_position_report(now_ms),
            nid::SESSION_TERMINATE => self.on_session_terminate(now_ms),
            other => warn!(nid = other, "no canonical RBC response for this NID"),
        }
        Ok(())
    }

    fn on_session_establish(&mut self, now_ms: u64) {
        self.enqueue("system_version", FieldValues::new().with_field("M_VERSION", EXPECTED_M_VERSION), now_ms);
        self.state_machine.transition(Event::M32Sent, now_ms);
    }

    fn on_keys_auth(&mut self, now_ms: u64) {
        self.enqueue("session_ack", FieldValues::new(), now_ms);
        self.state_machine.transition(Event::M38Sent, now_ms);
    }

    fn on_train_data(&mut self, now_ms: u64) {
        self.enqueue("train_data_ack", FieldValues::new().with_field("NID_MESSAGE_REF", nid::TRAIN_DATA as i64), now_ms);
        self.state_machine.transition(Event::M8Acked, now_ms);
    }

    fn on_train_acceptance(&mut self, now_ms: u64) {
        self.enqueue("train_accepted", FieldValues::new(), now_ms);
        self.state_machine.transition(Event::M41Sent, now_ms);
    }

    fn on_ma_request(&mut self, now_ms: u64) {
        self.ma_request_received = true;
        self.enqueue("generic_ack", FieldValues::new().with_field("NID_MESSAGE_REF", nid::MA_REQUEST as i64), now_ms);
    }

    fn on_position_report(&mut self, now_ms: u64) {
        if matches!(self.state_machine.state(), SessionState::MaRequestReady | SessionState::MissionActive) {
            self.state_machine.transition(Event::MonitoringStarted, now_ms);
        }
        if self.state_machine.state() == SessionState::MissionMonitoring {
            self.state_machine.transition(Event::PositionUpdate, now_ms);
        }
        self.enqueue("generic_ack", FieldValues::new().with_field("NID_MESSAGE_REF", nid::POSITION_REPORT as i64), now_ms);
    }

    fn on_session_terminate(&mut self, now_ms: u64) {
        self.enqueue("termination_ack", FieldValues::new(), now_ms);
        self.state_machine.reset();
    }

    /// Operator-granted Movement Authority: builds Packet 15 from the
    /// fixed topology and emits Message 3. Fails without enqueueing or
    /// transitioning state if the configured route doesn't terminate
    /// where it claims to.
    pub fn grant_movement_authority(&mut self, now_ms: u64) -> Result<Packet15, Packet15Error> {
        let packet15 = generate_packet15(&full_path(&self.topology), &self.route_from, &self.route_to, &self.topology)?;
        self.enqueue("ma", FieldValues::new().with_sub_packet("packet15", packet15.to_field_values()), now_ms);
        self.state_machine.transition(Event::M3Sent, now_ms);
        Ok(packet15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::default_topology;

    fn config() -> RbcConfig {
        RbcConfig {
            obu_id: "obu-1".into(),
            rbc_id: "rbc-1".into(),
            mqtt_host: "localhost".into(),
            mqtt_port: 1883,
            root_key1: 1,
            root_key2: 2,
            root_key3: 3,
            route_from: "A".into(),
            route_to: "E".into(),
        }
    }

    #[tokio::test]
    async fn on_au1_installs_keys_and_returns_au2() {
        let mut session = RbcSession::new(&config(), default_topology());
        let au1 = Au1Wire { obu_id: "obu-1".into(), rbc_id: "rbc-1".into(), obu_nonce_l: 1, obu_nonce_r: 2 };
        let au2 = session.on_au1(&au1, 0).await;
        assert_eq!(au2.obu_id, "obu-1");
        assert!(session.keys.get().await.is_some());
        assert_eq!(session.state_machine.state(), SessionState::VersionExchanged);
    }

    #[test]
    fn ma_request_arms_operator_grant() {
        let mut session = RbcSession::new(&config(), default_topology());
        for ev in [Event::Connected, Event::Au1Sent, Event::Au2Received, Event::M32Acked, Event::M8Received, Event::M41Acked] {
            session.state_machine.transition(ev, 0);
        }
        assert_eq!(session.state_machine.state(), SessionState::MaRequestReady);
        session.on_ma_request(0);
        assert!(session.ma_request_received);
    }

    #[test]
    fn grant_movement_authority_emits_packet15_and_advances_state() {
        let mut session = RbcSession::new(&config(), default_topology());
        for ev in [Event::Connected, Event::Au1Sent, Event::Au2Received, Event::M32Acked, Event::M8Received, Event::M41Acked] {
            session.state_machine.transition(ev, 0);
        }
        let packet15 = session.grant_movement_authority(0).unwrap();
        assert!(!packet15.sections.is_empty());
        assert_eq!(session.state_machine.state(), SessionState::MissionActive);
        assert_eq!(session.engine.queue_len(), 1);
    }
}
