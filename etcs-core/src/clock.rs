//! Wall-clock milliseconds since epoch, used to stamp messages and drive
//! timers. The only place a process reads real time; tests pass their
//! own `now_ms` values instead of calling this.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}
