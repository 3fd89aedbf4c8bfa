//! Station MAC helpers.
//!
//! The factory MAC is what the gateway sees in the discovery descriptor.
//! It also gives a stable suffix for the BLE advertising name
//! (`MEO-XXYYZZ`) and the network hostname (`meo-xxyyzz`).

use core::fmt::Write;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// `prefix-XXYYZZ` from the last 3 MAC bytes, e.g. `MEO-EFCAFE`.
pub fn advertise_name(prefix: &str, mac: &MacAddress) -> heapless::String<32> {
    let mut name = heapless::String::<32>::new();
    let _ = write!(name, "{}-{:02X}{:02X}{:02X}", prefix, mac[3], mac[4], mac[5]);
    name
}

/// Lowercase network hostname: `meo-xxyyzz`.
pub fn hostname(mac: &MacAddress) -> heapless::String<24> {
    let mut name = heapless::String::<24>::new();
    let _ = write!(name, "meo-{:02x}{:02x}{:02x}", mac[3], mac[4], mac[5]);
    name
}
