//! MEO node library.
//!
//! Device-side onboarding and connectivity for MEO gateways: BLE
//! provisioning, discovery/registration, and an MQTT session that exposes
//! registered features. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod debug;
pub mod error;

// The adapters compile on every target; the ESP-IDF implementations are
// guarded by cfg attributes inside.
pub mod adapters;
