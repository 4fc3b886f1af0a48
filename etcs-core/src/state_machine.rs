//! Session/mission state machine, per spec §4.4: a sparse transition
//! table, admit-set gating, and optional enter/exit hooks.

use std::collections::HashMap;

use etcs_types::{Event, SessionState, Transition, TransitionHistory};
use tracing::{error, info};

type Hook = Box<dyn Fn() + Send + Sync>;

fn transition_table() -> HashMap<(SessionState, Event), SessionState> {
    use Event::*;
    use SessionState::*;
    HashMap::from([
        ((Disconnected, Connected), Ready),
        ((Disconnected, Reset), Disconnected),
        ((Ready, Au1Sent), HandshakeInitiated),
        ((Ready, Disconnect), Disconnected),
        ((HandshakeInitiated, Au2Received), VersionExchanged),
        ((HandshakeInitiated, M32Sent), VersionExchanged),
        ((HandshakeInitiated, Timeout), Disconnected),
        ((VersionExchanged, M32Acked), SessionEstablished),
        ((VersionExchanged, M38Sent), VersionExchanged),
        ((VersionExchanged, VersionMismatch), Disconnected),
        ((SessionEstablished, M8Received), TrainDataExchanged),
        ((SessionEstablished, M8Acked), TrainDataExchanged),
        ((SessionEstablished, M38Sent), SessionEstablished),
        ((SessionEstablished, M38Received), SessionEstablished),
        ((SessionEstablished, M41Sent), MaRequestReady),
        ((SessionEstablished, SessionTerminated), Disconnected),
        ((TrainDataExchanged, M3Received), MissionActive),
        ((TrainDataExchanged, M41Acked), MaRequestReady),
        // Paired with M41Acked: the RBC side fires this when it sends 41
        // in reply to a Message 157 received while already past session
        // establishment.
        ((TrainDataExchanged, M41Sent), MaRequestReady),
        ((TrainDataExchanged, M41Received), TrainDataExchanged),
        ((TrainDataExchanged, M8Received), TrainDataExchanged),
        ((TrainDataExchanged, M8Acked), TrainDataExchanged),
        ((TrainDataExchanged, TrainRejected), Disconnected),
        ((MaRequestReady, M3Sent), MissionActive),
        ((MaRequestReady, M3Received), MissionActive),
        // A sensor hit can be the first event after the MA is granted,
        // before any separate MaRequestReady -> MissionActive transition
        // fires — the monitoring loop starts straight from MaRequestReady.
        ((MaRequestReady, MonitoringStarted), MissionMonitoring),
        ((MissionActive, MonitoringStarted), MissionMonitoring),
        ((MissionActive, MaExpired), Disconnected),
        ((MissionActive, EmergencyStop), Disconnected),
        ((MissionMonitoring, PositionUpdate), MissionMonitoring),
        ((MissionMonitoring, MissionComplete), SessionTerminated),
        ((SessionTerminated, Reset), Disconnected),
    ])
}

/// Owns the current state, its history, and the transition table. Hooks
/// run synchronously inside `transition`/`reset`; they exist for the
/// `somSent`/Message-157 one-shot latch, which is cleared only by a full
/// reset (see `onEnter(DISCONNECTED)` below and DESIGN.md).
pub struct StateMachine {
    state: SessionState,
    table: HashMap<(SessionState, Event), SessionState>,
    history: TransitionHistory,
    on_enter: HashMap<SessionState, Hook>,
    on_exit: HashMap<SessionState, Hook>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            table: transition_table(),
            history: TransitionHistory::default(),
            on_enter: HashMap::new(),
            on_exit: HashMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &TransitionHistory {
        &self.history
    }

    pub fn on_enter(&mut self, state: SessionState, hook: Hook) {
        self.on_enter.insert(state, hook);
    }

    pub fn on_exit(&mut self, state: SessionState, hook: Hook) {
        self.on_exit.insert(state, hook);
    }

    /// Runs one transition. Returns `false` with no side effect if the
    /// `(state, event)` pair is undefined, per spec §4.4.
    pub fn transition(&mut self, event: Event, now_ms: u64) -> bool {
        let Some(&next) = self.table.get(&(self.state, event)) else {
            error!(state = ?self.state, event = ?event, "undefined transition");
            return false;
        };

        if let Some(hook) = self.on_exit.get(&self.state) {
            hook();
        }

        let from = self.state;
        self.history.push(Transition { from, to: next, event, timestamp_ms: now_ms });
        self.state = next;
        info!(from = ?from, to = ?next, event = ?event, "transitioned");

        if let Some(hook) = self.on_enter.get(&self.state) {
            hook();
        }

        true
    }

    pub fn validate_message(&self, nid: u8) -> bool {
        self.state.admits(nid)
    }

    /// Unconditional return to `Disconnected`: clears history and runs
    /// `onEnter(Disconnected)`, which is the only place the `somSent`
    /// latch is cleared (Open Question, resolved).
    pub fn reset(&mut self) {
        self.state = SessionState::Disconnected;
        self.history.clear();
        if let Some(hook) = self.on_enter.get(&self.state) {
            hook();
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
