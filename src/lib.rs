//! # Family Tracker Library
//!
//! Periodically capture this device's location and battery level into a
//! per-user log kept in a remote spreadsheet-like store.
//!
//! A remote configuration partition decides which identities are tracked and
//! how often; every capture attempt is gated on battery, sign-in, that
//! configuration and location permission before a fix is taken and written.

pub mod cancel;
pub mod capture;
pub mod clock;
pub mod config;
pub mod error;
pub mod log_window;
pub mod scheduler;
pub mod sensors;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod tracking;
