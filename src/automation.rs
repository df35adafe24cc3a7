//! ==============================================================================
//! automation.rs - occupancy and energy-saving rules
//! ==============================================================================
//!
//! purpose:
//!     the node's whole decision logic as a plain value. the control loop owns
//!     one AutomationState and feeds it the pir level, the remote desired ac
//!     state and the current uptime; the state answers what to report and
//!     what to switch. no i/o happens here.
//!
//! motion hold:
//!
//!         raw motion, not holding
//!     IDLE ──────────────────────────▶ MOTION_HOLD (started = now)
//!       ▲                                  │
//!       └──────────────────────────────────┘
//!         now - started >= hold
//!
//!     while holding, occupancy is forced true and the inactivity timer is
//!     refreshed every cycle. a new trigger during the hold does not move
//!     `started`; the hold re-arms only after returning to IDLE.
//!
//! auto-off:
//!     ac on and `now - last_motion > timeout` switches the ac off once.
//!
//! ==============================================================================

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionHold {
    Idle,
    Holding { started_ms: u64 },
}

/// what one motion observation decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionUpdate {
    /// occupancy to report for this cycle
    pub occupied: bool,
    /// IDLE -> MOTION_HOLD happened this cycle
    pub onset: bool,
    /// MOTION_HOLD -> IDLE happened this cycle
    pub hold_ended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationState {
    ac_on: bool,
    last_motion_ms: u64,
    hold: MotionHold,
}

impl Default for AutomationState {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

impl AutomationState {
    /// boot state: ac off until the first remote poll says otherwise
    pub fn new() -> Self {
        Self { ac_on: false, last_motion_ms: 0, hold: MotionHold::Idle }
    }

    pub fn ac_on(&self) -> bool {
        self.ac_on
    }

    pub fn last_motion_ms(&self) -> u64 {
        self.last_motion_ms
    }

    pub fn is_simulating_motion(&self) -> bool {
        matches!(self.hold, MotionHold::Holding { .. })
    }

    pub fn observe_motion(&mut self, raw: bool, now_ms: u64, hold: Duration) -> MotionUpdate {
        let mut update = MotionUpdate { occupied: raw, onset: false, hold_ended: false };

        if raw {
            if self.hold == MotionHold::Idle {
                self.hold = MotionHold::Holding { started_ms: now_ms };
                update.onset = true;
            }
            self.last_motion_ms = now_ms;
        }

        if let MotionHold::Holding { started_ms } = self.hold {
            if now_ms.saturating_sub(started_ms) < millis(hold) {
                update.occupied = true;
                self.last_motion_ms = now_ms;
            } else {
                self.hold = MotionHold::Idle;
                update.hold_ended = true;
            }
        }

        update
    }

    /// switches the ac off when the room has been idle longer than `timeout`.
    /// returns the idle time that triggered it.
    pub fn check_auto_off(&mut self, now_ms: u64, timeout: Duration) -> Option<Duration> {
        let idle_ms = now_ms.saturating_sub(self.last_motion_ms);
        if self.ac_on && idle_ms > millis(timeout) {
            self.ac_on = false;
            return Some(Duration::from_millis(idle_ms));
        }
        None
    }

    /// adopt a desired ac state from outside (remote poll or local override).
    /// returns true when the state changed. switching on restarts the
    /// inactivity timer so auto-off does not fire straight away.
    pub fn set_ac(&mut self, desired: bool, now_ms: u64) -> bool {
        if desired == self.ac_on {
            return false;
        }
        self.ac_on = desired;
        if desired {
            self.last_motion_ms = now_ms;
        }
        true
    }
}

/// rate limit for the critical temperature event
#[derive(Debug, Clone, Default)]
pub struct TemperatureAlarm {
    last_alert_ms: Option<u64>,
}

impl TemperatureAlarm {
    pub fn check(&mut self, temperature: f64, threshold: f64, cooldown: Duration, now_ms: u64) -> bool {
        if temperature <= threshold {
            return false;
        }
        let cooled = match self.last_alert_ms {
            Some(last) => now_ms.saturating_sub(last) > millis(cooldown),
            None => true,
        };
        if cooled {
            self.last_alert_ms = Some(now_ms);
        }
        cooled
    }
}
