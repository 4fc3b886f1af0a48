//! Auto-stop coordinator: debounces obstacle alerts from the AI channel
//! into an actuator command and a status message, per spec §4.7.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const COOLDOWN_MS: u64 = 1_500;
const CONFIDENCE_THRESHOLD: f64 = 0.25;

#[derive(Debug, Clone, Deserialize)]
pub struct ObstacleAlert {
    pub label: Option<String>,
    pub conf: Option<f64>,
    pub msg_id: Option<String>,
    pub frame_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoStopStatus {
    pub event: &'static str,
    pub label: Option<String>,
    pub conf: Option<f64>,
    pub msg_id: Option<String>,
    pub frame_id: Option<String>,
    pub t_auto_stop_send_ms: u64,
    pub ts: u64,
}

/// Debounces `obu/ai/alert` into at most one stop per [`COOLDOWN_MS`].
/// An alert with no `conf` field stops unconditionally; one with `conf`
/// stops only when it meets [`CONFIDENCE_THRESHOLD`].
#[derive(Debug, Default)]
pub struct AutoStopCoordinator {
    last_stop_ms: Option<u64>,
}

impl AutoStopCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the status payload to publish if this alert should trigger
    /// a stop right now, or `None` if it's suppressed by confidence or
    /// cooldown.
    pub fn evaluate(&mut self, alert: &ObstacleAlert, now_ms: u64) -> Option<AutoStopStatus> {
        let should_stop = match alert.conf {
            Some(conf) => conf >= CONFIDENCE_THRESHOLD,
            None => true,
        };
        if !should_stop {
            return None;
        }

        if let Some(last) = self.last_stop_ms {
            if now_ms.saturating_sub(last) < COOLDOWN_MS {
                return None;
            }
        }
        self.last_stop_ms = Some(now_ms);

        Some(AutoStopStatus {
            event: "AUTO_STOP_OBSTACLE",
            label: alert.label.clone(),
            conf: alert.conf,
            msg_id: alert.msg_id.clone(),
            frame_id: alert.frame_id.clone(),
            t_auto_stop_send_ms: now_ms,
            ts: now_ms,
        })
    }
}

pub fn parse_alert(payload: &[u8]) -> Option<ObstacleAlert> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    serde_json::from_value(value).ok()
}
