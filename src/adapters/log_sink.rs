//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing service events to the ESP-IDF logger
//! (which goes to UART / USB-CDC in production).

use log::{info, warn};

use crate::app::events::ServiceEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`ServiceEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &ServiceEvent) {
        match event {
            ServiceEvent::WaitingForProvisioning => {
                info!("DEVICE | waiting for provisioning");
            }
            ServiceEvent::NetworkUp => info!("NET | up"),
            ServiceEvent::NetworkDown(Some(e)) => warn!("NET | down: {}", e),
            ServiceEvent::NetworkDown(None) => info!("NET | down"),
            ServiceEvent::Registered { device_id } => {
                info!("REG | registered as {}", device_id);
            }
            ServiceEvent::RegistrationFailed(e) => warn!("REG | failed: {}", e),
            ServiceEvent::SessionConnecting { attempt } => {
                info!("MQTT | connecting (attempt {})", attempt);
            }
            ServiceEvent::SessionLive => info!("MQTT | live"),
            ServiceEvent::SessionLost => warn!("MQTT | lost"),
            ServiceEvent::RestartScheduled { at_ms } => {
                info!("PROV | restart scheduled at {} ms", at_ms);
            }
            ServiceEvent::RestartRequested => info!("PROV | restarting"),
        }
    }
}
