use serde::{Deserialize, Serialize};

/// One of the ten phases of a session's lifecycle, in the exact order of
/// spec §3/§4.4. The discriminant values match the demonstrator's own
/// numbering and are stable across the wire (status events, diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Ready = 1,
    HandshakeInitiated = 2,
    VersionExchanged = 3,
    SessionEstablished = 4,
    TrainDataExchanged = 5,
    MaRequestReady = 6,
    MissionActive = 7,
    MissionMonitoring = 8,
    SessionTerminated = 9,
}

impl SessionState {
    /// NID_MESSAGE values admitted inbound while in this state, per the
    /// admit-set table in the GLOSSARY.
    pub fn admit_set(&self) -> &'static [u8] {
        match self {
            SessionState::Disconnected => &[],
            SessionState::Ready => &[],
            SessionState::HandshakeInitiated => &[32, 155],
            SessionState::VersionExchanged => &[32, 38, 146, 155, 159],
            SessionState::SessionEstablished => &[8, 38, 129, 146, 155, 159, 157],
            SessionState::TrainDataExchanged => &[3, 41, 157, 146, 40],
            SessionState::MaRequestReady => &[132, 146, 129, 3],
            SessionState::MissionActive => &[15, 16, 42, 132, 136],
            SessionState::MissionMonitoring => &[136, 146, 150, 156],
            SessionState::SessionTerminated => &[150, 156, 39],
        }
    }

    pub fn admits(&self, nid: u8) -> bool {
        self.admit_set().contains(&nid)
    }
}

/// Named transition triggers. `AU1` is accepted only by the RBC's
/// transition table (it never reaches an OBU instance and vice versa for
/// the RBC-only events); both sides share one enum for symmetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    Connected,
    Reset,
    Au1Sent,
    Disconnect,
    Au2Received,
    M32Sent,
    Timeout,
    M32Acked,
    M38Sent,
    VersionMismatch,
    M8Received,
    M8Acked,
    M38Received,
    M41Sent,
    SessionTerminated,
    M3Received,
    M41Acked,
    M41Received,
    TrainRejected,
    M3Sent,
    MonitoringStarted,
    MaExpired,
    EmergencyStop,
    PositionUpdate,
    MissionComplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub event: Event,
    pub timestamp_ms: u64,
}

/// Append-only diagnostic trail. Never consulted by protocol logic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionHistory(pub Vec<Transition>);

impl TransitionHistory {
    pub fn push(&mut self, t: Transition) {
        self.0.push(t);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admit_sets_match_glossary() {
        assert_eq!(SessionState::Disconnected.admit_set(), &[] as &[u8]);
        assert_eq!(SessionState::MissionMonitoring.admit_set(), &[136, 146, 150, 156]);
        assert!(SessionState::MaRequestReady.admits(132));
        assert!(!SessionState::MaRequestReady.admits(8));
    }
}
