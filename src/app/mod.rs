//! Application core: onboarding and connectivity logic, no direct I/O.
//!
//! BLE provisioning, gateway registration, the MQTT session with its
//! feature registry, and the orchestrator that sequences them. All
//! interaction with the radio, flash and sockets happens through **port
//! traits** defined in [`ports`] (registration, which owns its sockets,
//! is the exception), keeping this layer testable on the host.

pub mod events;
pub mod identity;
pub mod ports;
pub mod provisioning;
pub mod registration;
pub mod registry;
pub mod service;
pub mod session;
pub mod store;
