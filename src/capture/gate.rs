//! # Capture Gate
//!
//! Pure pre-condition check deciding whether a capture attempt proceeds.
//!
//! Checks run cheapest-first and the first failing check wins:
//!
//! | Order | Condition | Reason |
//! |-------|-----------|--------|
//! | 1 | battery ≤ 20% | battery too low |
//! | 2 | no identity | not authenticated |
//! | 3 | config absent or identity not enabled | not tracked |
//! | 4 | location permission missing | permission denied |

use std::fmt;

use crate::tracking::TrackingConfig;

/// Battery level at or below which no capture is attempted
pub const MIN_BATTERY_PERCENT: u8 = 20;

/// Why the gate refused an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    BatteryTooLow,
    NotAuthenticated,
    NotTracked,
    PermissionDenied,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AbortReason::BatteryTooLow => "battery too low",
            AbortReason::NotAuthenticated => "not authenticated",
            AbortReason::NotTracked => "not tracked",
            AbortReason::PermissionDenied => "permission denied",
        };
        f.write_str(text)
    }
}

/// Gate verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Abort(AbortReason),
}

/// Everything the gate looks at.
#[derive(Debug, Clone, Copy)]
pub struct GateInputs<'a> {
    pub battery_percent: u8,
    pub identity: Option<&'a str>,
    pub config: Option<&'a TrackingConfig>,
    pub location_permission: bool,
}

/// True when the checks that need no I/O pass, i.e. when fetching the
/// remote config can still change the verdict.
pub fn needs_config(battery_percent: u8, identity: Option<&str>) -> bool {
    battery_percent > MIN_BATTERY_PERCENT && identity.is_some()
}

/// Decide whether to proceed.
pub fn evaluate(inputs: &GateInputs<'_>) -> GateDecision {
    if inputs.battery_percent <= MIN_BATTERY_PERCENT {
        return GateDecision::Abort(AbortReason::BatteryTooLow);
    }

    let Some(identity) = inputs.identity else {
        return GateDecision::Abort(AbortReason::NotAuthenticated);
    };

    if !inputs.config.is_some_and(|config| config.is_tracked(identity)) {
        return GateDecision::Abort(AbortReason::NotTracked);
    }

    if !inputs.location_permission {
        return GateDecision::Abort(AbortReason::PermissionDenied);
    }

    GateDecision::Proceed
}
