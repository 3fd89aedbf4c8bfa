//! WiFi station-mode adapter.
//!
//! Implements [`NetworkPort`]: join one access point, then report link
//! state, MAC and IPv4 address.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `BlockingWifi<EspWifi>` from `esp_idf_svc::wifi`.
//! - **all other targets**: simulation stubs for host-side tests.
//!
//! No background reconnection happens here. The orchestrator only reads
//! `is_connected` on every tick.

use core::net::Ipv4Addr;

use log::{info, warn};

use crate::app::ports::NetworkPort;
use crate::error::ConnectivityError;

const MAX_SSID_LEN: usize = 32;
const MAX_PASSWORD_LEN: usize = 64;

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn validate_ssid(ssid: &str) -> Result<(), ConnectivityError> {
    if ssid.is_empty() || ssid.len() > MAX_SSID_LEN {
        return Err(ConnectivityError::InvalidSsid);
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ConnectivityError> {
    if password.len() > MAX_PASSWORD_LEN {
        return Err(ConnectivityError::InvalidPassword);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// WiFi adapter
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct WifiAdapter {
    wifi: esp_idf_svc::wifi::BlockingWifi<esp_idf_svc::wifi::EspWifi<'static>>,
}

#[cfg(not(target_os = "espidf"))]
pub struct WifiAdapter {
    connected: bool,
    ssid: String,
    sim_fail: bool,
    sim_ip: Ipv4Addr,
}

#[cfg(target_os = "espidf")]
impl WifiAdapter {
    pub fn new(wifi: esp_idf_svc::wifi::BlockingWifi<esp_idf_svc::wifi::EspWifi<'static>>) -> Self {
        Self { wifi }
    }

    fn platform_connect(&mut self, ssid: &str, password: &str, timeout_ms: u32) -> Result<(), ConnectivityError> {
        use core::time::Duration;
        use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};

        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| ConnectivityError::InvalidSsid)?,
            password: password
                .try_into()
                .map_err(|_| ConnectivityError::InvalidPassword)?,
            auth_method: if password.is_empty() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });

        let step = |what: &str, r: Result<(), esp_idf_svc::sys::EspError>| {
            r.map_err(|e| {
                warn!("WiFi: {} failed: {}", what, e);
                ConnectivityError::ConnectionFailed
            })
        };
        step("set_configuration", self.wifi.set_configuration(&config))?;
        if !self.wifi.is_started().unwrap_or(false) {
            step("start", self.wifi.start())?;
        }
        step("connect", self.wifi.connect())?;

        let netif_up = || self.wifi.wifi().sta_netif().is_up().map(|up| !up);
        self.wifi
            .ip_wait_while(netif_up, Some(Duration::from_millis(u64::from(timeout_ms))))
            .map_err(|e| {
                warn!("WiFi: no address within {} ms: {}", timeout_ms, e);
                ConnectivityError::Timeout
            })
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for WifiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl WifiAdapter {
    pub fn new() -> Self {
        Self {
            connected: false,
            ssid: String::new(),
            sim_fail: false,
            sim_ip: Ipv4Addr::new(192, 168, 1, 50),
        }
    }

    fn platform_connect(&mut self, ssid: &str, _password: &str, _timeout_ms: u32) -> Result<(), ConnectivityError> {
        if self.sim_fail {
            warn!("WiFi(sim): join '{}' failed", ssid);
            return Err(ConnectivityError::ConnectionFailed);
        }
        self.ssid = ssid.into();
        self.connected = true;
        Ok(())
    }

    /// Make subsequent joins fail, as an unreachable AP would.
    pub fn set_fail_connect(&mut self, fail: bool) {
        self.sim_fail = fail;
    }

    /// Simulate link loss or recovery.
    pub fn sim_set_link(&mut self, up: bool) {
        self.connected = up;
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }
}

impl NetworkPort for WifiAdapter {
    fn connect(&mut self, ssid: &str, password: &str, timeout_ms: u32) -> Result<(), ConnectivityError> {
        validate_ssid(ssid)?;
        validate_password(password)?;
        self.platform_connect(ssid, password, timeout_ms)
            .inspect(|_| info!("WiFi: connected to '{}'", ssid))
    }

    #[cfg(target_os = "espidf")]
    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    #[cfg(not(target_os = "espidf"))]
    fn is_connected(&self) -> bool {
        self.connected
    }

    #[cfg(target_os = "espidf")]
    fn mac_address(&self) -> Option<[u8; 6]> {
        self.wifi.wifi().sta_netif().get_mac().ok()
    }

    #[cfg(not(target_os = "espidf"))]
    fn mac_address(&self) -> Option<[u8; 6]> {
        Some(super::device_id::read_mac())
    }

    #[cfg(target_os = "espidf")]
    fn ipv4(&self) -> Option<Ipv4Addr> {
        let info = self.wifi.wifi().sta_netif().get_ip_info().ok()?;
        (!info.ip.is_unspecified()).then_some(info.ip)
    }

    #[cfg(not(target_os = "espidf"))]
    fn ipv4(&self) -> Option<Ipv4Addr> {
        self.connected.then_some(self.sim_ip)
    }
}
