//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements     | Connects to                 |
//! |-------------|----------------|-----------------------------|
//! | `ble`       | AttributePort  | NimBLE GATT server          |
//! | `device_id` |                | eFuse factory MAC           |
//! | `log_sink`  | EventSink      | Serial log output           |
//! | `mqtt`      | MqttTransport  | ESP-IDF MQTT client         |
//! | `nvs`       | StoragePort    | NVS / in-memory store       |
//! | `system`    | SystemPort     | Chip reset                  |
//! | `time`      | ClockPort      | ESP32 system timer          |
//! | `wifi`      | NetworkPort    | ESP-IDF WiFi STA            |

pub mod ble;
pub mod device_id;
pub mod log_sink;
pub mod mqtt;
pub mod nvs;
pub mod system;
pub mod time;
pub mod wifi;
