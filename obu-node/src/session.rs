//! OBU-side session orchestration: handshake, the canonical per-NID
//! response table, the 1Hz Movement Authority request, sensor-driven
//! position reports, and mission completion, per spec §4.6.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use etcs_core::engine::{gate_inbound, EngineError, EtcsEngine};
use etcs_core::handshake::{derive_session_keys, NoncePair, RootKeys};
use etcs_core::kpi::SentMessageTable;
use etcs_core::safety::SessionKeyStore;
use etcs_core::state_machine::StateMachine;
use etcs_types::{nid, topics, Au1Wire, Au2Wire, Event, EtcsMessage, FieldValues, KeyUpdateWire, SessionState, Source, TemplateTable};
use tracing::{info, warn};

use crate::config::ObuConfig;

const EXPECTED_M_VERSION: i64 = 1;

pub struct ObuSession {
    pub state_machine: StateMachine,
    pub engine: EtcsEngine,
    pub keys: SessionKeyStore,
    pub obu_id: String,
    pub rbc_id: String,
    pub train_id: String,
    pub total_sections: u32,
    root_keys: RootKeys,
    obu_nonce: Option<NoncePair>,
    pub ma_request_sent: bool,
    pub passed_sections: u32,
    pub awaiting_146: bool,
    som_sent: Arc<AtomicBool>,
    kpi: SentMessageTable,
}

impl ObuSession {
    pub fn new(config: &ObuConfig) -> Self {
        let mut state_machine = StateMachine::new();
        let som_sent = Arc::new(AtomicBool::new(false));
        {
            let flag = som_sent.clone();
            state_machine.on_enter(SessionState::Disconnected, Box::new(move || flag.store(false, Ordering::SeqCst)));
        }

        Self {
            state_machine,
            engine: EtcsEngine::new(TemplateTable::standard()),
            keys: SessionKeyStore::new(),
            obu_id: config.obu_id.clone(),
            rbc_id: config.rbc_id.clone(),
            train_id: config.train_id.clone(),
            total_sections: config.total_sections,
            root_keys: RootKeys { k1: config.root_key1, k2: config.root_key2, k3: config.root_key3 },
            obu_nonce: None,
            ma_request_sent: false,
            passed_sections: 0,
            awaiting_146: false,
            som_sent,
            kpi: SentMessageTable::new(),
        }
    }

    pub fn rbc_in_topic(&self) -> String {
        topics::rbc_in(&self.rbc_id)
    }

    fn enqueue(&mut self, name: &str, overrides: FieldValues, now_ms: u64) {
        match self.engine.build_from_template(name, overrides, Source::LocalObu, now_ms) {
            Ok(msg) => {
                self.engine.send_throttled(self.rbc_in_topic(), msg, true);
            }
            Err(err) => warn!(template = name, error = %err, "failed to build message"),
        }
    }

    /// Kicks off the handshake: `CONNECTED` then AU1, published directly
    /// since the handshake runs before session keys exist.
    pub fn begin_handshake(&mut self, now_ms: u64) -> Au1Wire {
        self.state_machine.transition(Event::Connected, now_ms);
        let nonce = NoncePair::generate();
        self.obu_nonce = Some(nonce);
        self.state_machine.transition(Event::Au1Sent, now_ms);
        Au1Wire { obu_id: self.obu_id.clone(), rbc_id: self.rbc_id.clone(), obu_nonce_l: nonce.l, obu_nonce_r: nonce.r }
    }

    /// Derives session keys from AU2, installs them, and enqueues
    /// `SESSION_ESTABLISH` (155). Returns the `KEY_UPDATE` payload the
    /// caller publishes directly on the keys topic (plaintext by design,
    /// spec §4.3).
    pub async fn on_au2(&mut self, au2: &Au2Wire, now_ms: u64) -> Option<KeyUpdateWire> {
        let obu_nonce = self.obu_nonce?;
        let rbc_nonce = NoncePair { l: au2.rbc_nonce_l, r: au2.rbc_nonce_r };
        let keys = derive_session_keys(self.root_keys, obu_nonce, rbc_nonce);
        self.keys.set(keys).await;
        self.state_machine.transition(Event::Au2Received, now_ms);

        self.enqueue("session_establish", FieldValues::new(), now_ms);
        Some(KeyUpdateWire { ks1: keys.ks1, ks2: keys.ks2, ks3: keys.ks3 })
    }

    /// Runs once per second; emits `MA_REQUEST` (132) exactly once per
    /// session, per spec §4.6's one-shot latch.
    pub fn maybe_send_ma_request(&mut self, d_lrbg: i64, now_ms: u64) {
        let ready = matches!(self.state_machine.state(), SessionState::TrainDataExchanged | SessionState::MaRequestReady);
        if !ready || self.ma_request_sent {
            return;
        }
        self.ma_request_sent = true;
        self.enqueue("ma_request", FieldValues::new().with_field("D_LRBG", d_lrbg), now_ms);
    }

    /// Entry point for everything received over the wire. Runs the shared
    /// loop/admit-set gate, then dispatches to the canonical per-NID
    /// response table of spec §4.6.
    pub async fn handle_inbound(&mut self, msg: EtcsMessage, now_ms: u64) -> Result<(), EngineError> {
        gate_inbound(&msg, self.state_machine.state())?;
        match msg.nid_message {
            nid::SYSTEM_VERSION => self.on_system_version(&msg, now_ms),
            nid::SESSION_ACK => self.on_session_ack(now_ms),
            nid::TRAIN_DATA_ACK => self.on_train_data_ack(now_ms),
            nid::TRAIN_ACCEPTED => self.on_train_accepted(now_ms),
            nid::GENERIC_ACK => self.on_generic_ack(&msg, now_ms),
            nid::MA => {
                self.state_machine.transition(Event::M3Received, now_ms);
            }
            other => warn!(nid = other, "no canonical OBU response for this NID"),
        }
        Ok(())
    }

    fn on_system_version(&mut self, msg: &EtcsMessage, now_ms: u64) {
        let matches_version = msg.field("M_VERSION") == Some(EXPECTED_M_VERSION);
        if matches_version {
            self.enqueue("generic_ack", FieldValues::new().with_field("NID_MESSAGE_REF", nid::SYSTEM_VERSION as i64), now_ms);
            self.enqueue("keys_auth", FieldValues::new(), now_ms);
            self.enqueue("train_data", FieldValues::new().with_sub_packet("packet2", FieldValues::new().with_field("M_VERSION", EXPECTED_M_VERSION)), now_ms);
            self.state_machine.transition(Event::M32Acked, now_ms);
        } else {
            self.enqueue("version_reject", FieldValues::new().with_field("M_VERSION", EXPECTED_M_VERSION), now_ms);
            self.state_machine.transition(Event::VersionMismatch, now_ms);
        }
    }

    fn on_session_ack(&mut self, now_ms: u64) {
        self.enqueue("generic_ack", FieldValues::new().with_field("NID_MESSAGE_REF", nid::SESSION_ACK as i64), now_ms);
        self.state_machine.transition(Event::M38Received, now_ms);
    }

    fn on_train_data_ack(&mut self, now_ms: u64) {
        self.enqueue("generic_ack", FieldValues::new().with_field("NID_MESSAGE_REF", nid::TRAIN_DATA_ACK as i64), now_ms);
        self.state_machine.transition(Event::M8Received, now_ms);

        if !self.som_sent.swap(true, Ordering::SeqCst) {
            let packet0 = FieldValues::new().with_field("Q_SCALE", 1).with_field("D_LRBG", 0).with_field("Q_DIRLRBG", 1);
            self.enqueue("train_acceptance", FieldValues::new().with_sub_packet("packet0", packet0), now_ms);
        }
    }

    fn on_train_accepted(&mut self, now_ms: u64) {
        self.enqueue("generic_ack", FieldValues::new().with_field("NID_MESSAGE_REF", nid::TRAIN_ACCEPTED as i64), now_ms);
        self.state_machine.transition(Event::M41Acked, now_ms);
    }

    fn on_generic_ack(&mut self, msg: &EtcsMessage, now_ms: u64) {
        if msg.field("NID_MESSAGE_REF") != Some(nid::POSITION_REPORT as i64) {
            return;
        }
        self.awaiting_146 = false;
        self.passed_sections += 1;
        self.kpi.on_response(nid::POSITION_REPORT, now_ms);

        if self.passed_sections >= self.total_sections + 1 {
            self.state_machine.transition(Event::MissionComplete, now_ms);
            self.enqueue("end_of_mission", FieldValues::new(), now_ms);
            info!(passed_sections = self.passed_sections, "mission complete");
        } else {
            self.state_machine.transition(Event::PositionUpdate, now_ms);
        }
    }

    /// `SESSION_TERMINATE` (156), sent once the 1s delay after
    /// `END_OF_MISSION` has elapsed.
    pub fn finish_mission(&mut self, now_ms: u64) {
        self.enqueue("session_terminate", FieldValues::new(), now_ms);
    }

    /// A sensor hit: sends `POSITION_REPORT` (136) and, the first time,
    /// starts the monitoring loop.
    pub fn handle_sensor_event(&mut self, sensor_id: &str, now_ms: u64) -> bool {
        let Some(d_lrbg) = nid::sensor_to_d_lrbg(sensor_id) else {
            warn!(sensor_id, "unknown sensor id");
            return false;
        };
        if matches!(self.state_machine.state(), SessionState::MaRequestReady | SessionState::MissionActive) {
            self.state_machine.transition(Event::MonitoringStarted, now_ms);
        }

        let packet0 = FieldValues::new().with_field("Q_SCALE", 1).with_field("D_LRBG", d_lrbg).with_field("Q_DIRLRBG", 1);
        self.enqueue("position_report", FieldValues::new().with_sub_packet("packet0", packet0), now_ms);
        self.awaiting_146 = true;
        self.kpi.mark_sent(nid::POSITION_REPORT, now_ms);
        true
    }
}
