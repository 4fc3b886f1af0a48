//! KPI telemetry derived from the Sent-Message Table of spec §3.
//! **(added)** — the emission of this fact is this system's job even
//! though persisting it to a file is an external collaborator's
//! (spec.md Non-goal); here it's simply a `tracing` event.

use std::collections::HashMap;

use tracing::info;

/// `NID_MESSAGE -> t_send_ms`, populated when a tracked message is
/// emitted and cleared on the matching inbound response.
#[derive(Debug, Default)]
pub struct SentMessageTable {
    sent_at_ms: HashMap<u8, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KpiRecord {
    pub nid: u8,
    pub t_send_ms: u64,
    pub t_recv_ms: u64,
    pub rtt_ms: u64,
}

impl SentMessageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_sent(&mut self, nid: u8, now_ms: u64) {
        self.sent_at_ms.insert(nid, now_ms);
    }

    /// Clears the matching entry and emits the KPI record as a `tracing`
    /// event, iff a send was recorded for this NID.
    pub fn on_response(&mut self, nid: u8, now_ms: u64) -> Option<KpiRecord> {
        let t_send_ms = self.sent_at_ms.remove(&nid)?;
        let record = KpiRecord { nid, t_send_ms, t_recv_ms: now_ms, rtt_ms: now_ms.saturating_sub(t_send_ms) };
        info!(target: "kpi", nid = record.nid, rtt_ms = record.rtt_ms, "kpi");
        Some(record)
    }
}
