//! Chip control adapter.
//!
//! Implements [`SystemPort`]. On ESP-IDF `restart` does not return; the
//! simulation only counts requests so tests can assert on them.

use log::warn;

use crate::app::ports::SystemPort;

#[derive(Default)]
pub struct SystemAdapter {
    #[cfg(not(target_os = "espidf"))]
    restarts: usize,
}

impl SystemAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(not(target_os = "espidf"))]
impl SystemAdapter {
    pub fn restart_count(&self) -> usize {
        self.restarts
    }
}

impl SystemPort for SystemAdapter {
    #[cfg(target_os = "espidf")]
    fn restart(&mut self) {
        warn!("System: restarting");
        esp_idf_svc::hal::reset::restart();
    }

    #[cfg(not(target_os = "espidf"))]
    fn restart(&mut self) {
        warn!("System(sim): restart requested");
        self.restarts += 1;
    }
}
