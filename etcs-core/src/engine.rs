//! The ETCS engine: message templating, sequence numbering, the
//! throttled send pump, and the inbound gate shared by both orchestrator
//! roles, per spec §4.5.

use std::collections::{HashSet, VecDeque};

use etcs_types::{EtcsMessage, FieldValues, SessionState, Source, TemplateTable};
use thiserror::Error;

/// Minimum gap between two throttled publishes.
pub const MIN_MESSAGE_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("unknown template {0}")]
    TemplateMissing(String),
    #[error("message rejected: origin {origin:?} is not Wire (loop guard)")]
    LoopGuard { origin: Source },
    #[error("message rejected: NID {nid} not admitted in current state")]
    NotAdmitted { nid: u8 },
}

/// Holds the template table, sequence counter, the send-side dedup set,
/// and the outbound queue. Owned by exactly one orchestrator task, per
/// the concurrency model of spec §5.
pub struct EtcsEngine {
    templates: TemplateTable,
    sequence: u32,
    processed_on_send: HashSet<u32>,
    queue: VecDeque<(String, EtcsMessage)>,
    draining: bool,
}

impl EtcsEngine {
    pub fn new(templates: TemplateTable) -> Self {
        Self { templates, sequence: 0, processed_on_send: HashSet::new(), queue: VecDeque::new(), draining: false }
    }

    pub fn templates(&self) -> &TemplateTable {
        &self.templates
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence += 1;
        self.sequence
    }

    /// Merges `templates[name].defaults` with `overrides`, auto-stamping
    /// `SEQUENCE`, absent `T_TRAIN`/`T_TRAIN_ack` (epoch seconds), and
    /// `origin`, per spec §4.5.
    pub fn build_from_template(
        &mut self,
        name: &str,
        overrides: FieldValues,
        origin: Source,
        now_ms: u64,
    ) -> Result<EtcsMessage, EngineError> {
        let template = self.templates.by_name(name).ok_or_else(|| EngineError::TemplateMissing(name.to_string()))?;

        let mut fields = FieldValues::new();
        for (&k, &v) in template.defaults.iter() {
            if k != "NID_MESSAGE" && k != "SEQUENCE" {
                fields.fields.insert(k.to_string(), v);
            }
        }
        for (k, v) in &overrides.fields {
            fields.fields.insert(k.clone(), *v);
        }
        fields.sections = overrides.sections;
        fields.sub_packets = overrides.sub_packets;

        let nid_message = template
            .nid_message
            .unwrap_or_else(|| fields.fields.get("NID_MESSAGE").copied().unwrap_or(0) as u8);

        let t_epoch = (now_ms / 1000) as i64;
        let t_train = Some(overrides.fields.get("T_TRAIN").copied().unwrap_or(t_epoch));
        let t_train_ack = Some(overrides.fields.get("T_TRAIN_ack").copied().unwrap_or(t_epoch));

        Ok(EtcsMessage {
            nid_message,
            sequence: self.next_sequence(),
            origin,
            t_train,
            t_train_ack,
            t_app_ms: now_ms,
            t_send_ms: now_ms,
            fields,
            extra: std::collections::HashMap::new(),
        })
    }

    /// If `throttled` is false, returns `msg` immediately for direct
    /// publish. Otherwise enqueues it and leaves draining to `pump`.
    pub fn send_throttled(&mut self, topic: String, msg: EtcsMessage, throttled: bool) -> Option<(String, EtcsMessage)> {
        if !throttled {
            return Some((topic, msg));
        }
        self.queue.push_back((topic, msg));
        None
    }

    /// Single-shot pump: pops at most one queued message, skipping it
    /// (without requeueing) if its `SEQUENCE` was already sent or the
    /// current state doesn't admit its NID. Callers drive this from a
    /// `tokio::time::interval` gated at [`MIN_MESSAGE_INTERVAL_MS`].
    pub fn pump(&mut self, state: SessionState) -> Option<(String, EtcsMessage)> {
        if self.draining {
            return None;
        }
        self.draining = true;
        let result = loop {
            let Some((topic, msg)) = self.queue.pop_front() else {
                break None;
            };
            if self.processed_on_send.contains(&msg.sequence) {
                continue;
            }
            if !state.admits(msg.nid_message) {
                continue;
            }
            self.processed_on_send.insert(msg.sequence);
            break Some((topic, msg));
        };
        self.draining = false;
        result
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

/// Shared inbound gate: rejects messages not sourced from the wire (the
/// loop-prevention invariant) and messages whose NID the current state
/// doesn't admit. Per-NID canonical response handling lives in the
/// orchestrator binaries, which call this first.
pub fn gate_inbound(msg: &EtcsMessage, state: SessionState) -> Result<(), EngineError> {
    if !msg.from_wire() {
        return Err(EngineError::LoopGuard { origin: msg.origin });
    }
    if !state.admits(msg.nid_message) {
        return Err(EngineError::NotAdmitted { nid: msg.nid_message });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_from_template_stamps_sequence_and_epoch_fields() {
        let mut engine = EtcsEngine::new(TemplateTable::standard());
        let msg = engine
            .build_from_template("ma_request", FieldValues::new().with_field("D_LRBG", 3000), Source::LocalObu, 5000)
            .unwrap();
        assert_eq!(msg.nid_message, 132);
        assert_eq!(msg.sequence, 1);
        assert_eq!(msg.t_train, Some(5));
        assert_eq!(msg.field("D_LRBG"), Some(3000));
    }

    #[test]
    fn sequence_is_monotonic_across_builds() {
        let mut engine = EtcsEngine::new(TemplateTable::standard());
        let a = engine.build_from_template("session_ack", FieldValues::new(), Source::Internal, 0).unwrap();
        let b = engine.build_from_template("session_ack", FieldValues::new(), Source::Internal, 0).unwrap();
        assert!(b.sequence > a.sequence);
    }

    #[test]
    fn send_throttled_enqueues_when_throttling_enabled() {
        let mut engine = EtcsEngine::new(TemplateTable::standard());
        let msg = engine.build_from_template("session_ack", FieldValues::new(), Source::Internal, 0).unwrap();
        assert!(engine.send_throttled("rbc/1/in".into(), msg, true).is_none());
        assert_eq!(engine.queue_len(), 1);
    }

    #[test]
    fn pump_skips_already_sent_sequence_and_does_not_requeue() {
        let mut engine = EtcsEngine::new(TemplateTable::standard());
        let msg = engine.build_from_template("session_ack", FieldValues::new(), Source::Internal, 0).unwrap();
        let seq = msg.sequence;
        engine.send_throttled("rbc/1/in".into(), msg.clone(), true);

        let first = engine.pump(SessionState::VersionExchanged);
        assert!(first.is_some());
        assert_eq!(first.unwrap().1.sequence, seq);

        engine.send_throttled("rbc/1/in".into(), msg, true);
        let second = engine.pump(SessionState::VersionExchanged);
        assert!(second.is_none());
        assert_eq!(engine.queue_len(), 0);
    }

    #[test]
    fn pump_skips_messages_the_current_state_does_not_admit() {
        let mut engine = EtcsEngine::new(TemplateTable::standard());
        let msg = engine.build_from_template("ma_request", FieldValues::new(), Source::Internal, 0).unwrap();
        engine.send_throttled("rbc/1/in".into(), msg, true);
        let result = engine.pump(SessionState::Disconnected);
        assert!(result.is_none());
    }

    #[test]
    fn gate_inbound_rejects_non_wire_origin() {
        let msg = EtcsMessage {
            nid_message: 32,
            sequence: 1,
            origin: Source::LocalRbc,
            t_train: None,
            t_train_ack: None,
            t_app_ms: 0,
            t_send_ms: 0,
            fields: FieldValues::new(),
            extra: std::collections::HashMap::new(),
        };
        assert_eq!(gate_inbound(&msg, SessionState::HandshakeInitiated), Err(EngineError::LoopGuard { origin: Source::LocalRbc }));
    }

    #[test]
    fn gate_inbound_rejects_unadmitted_nid() {
        let msg = EtcsMessage {
            nid_message: 8,
            sequence: 1,
            origin: Source::Wire,
            t_train: None,
            t_train_ack: None,
            t_app_ms: 0,
            t_send_ms: 0,
            fields: FieldValues::new(),
            extra: std::collections::HashMap::new(),
        };
        assert_eq!(gate_inbound(&msg, SessionState::HandshakeInitiated), Err(EngineError::NotAdmitted { nid: 8 }));
    }
}
