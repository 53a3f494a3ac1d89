//! # Capture
//!
//! The gate deciding whether to capture and the attempt that performs it.

pub mod gate;
pub mod worker;

pub use gate::{AbortReason, GateDecision};
pub use worker::{AttemptFailure, AttemptOutcome, AttemptState, CaptureWorker};
