//! MEO node firmware entry point.
//!
//! Wires the ESP-IDF adapters into the [`DeviceService`] and runs the demo
//! application: one invocable method that drives the status LED and one
//! periodic climate event.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  WifiAdapter      BleAdapter       NvsAdapter    Esp32Time     │
//! │  (NetworkPort)    (AttributePort)  (Storage)     (ClockPort)   │
//! │  MqttAdapter      SystemAdapter    LogEventSink                │
//! │  (MqttTransport)  (SystemPort)     (EventSink)                 │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │            DeviceService (orchestrator)                │    │
//! │  │  Provisioner · Registration · Session · Registry       │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Result, anyhow};
use embedded_hal::digital::OutputPin;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::delay::FreeRtos;
use esp_idf_svc::hal::gpio::PinDriver;
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
use log::{info, warn};

use meo_node::adapters::ble::BleAdapter;
use meo_node::adapters::device_id;
use meo_node::adapters::log_sink::LogEventSink;
use meo_node::adapters::mqtt::MqttAdapter;
use meo_node::adapters::nvs::NvsAdapter;
use meo_node::adapters::system::SystemAdapter;
use meo_node::adapters::time::Esp32TimeAdapter;
use meo_node::adapters::wifi::WifiAdapter;
use meo_node::app::ports::ClockPort;
use meo_node::app::provisioning::ProvisioningInbox;
use meo_node::app::registry::FeatureCall;
use meo_node::app::service::{Adapters, DeviceService};
use meo_node::config::DeviceConfig;
use meo_node::error::Error;

const MODEL: &str = "DIY Sensor";
const MANUFACTURER: &str = "ThingAI Lab";
const DEBUG_TAGS: &str = "DEVICE,MQTT";

const CLIMATE_EVENT: &str = "humid_temp_update";
const CLIMATE_PERIOD_MS: u64 = 5_000;
const TICK_MS: u32 = 10;

/// `first + second`, treating missing or non-numeric params as 0.
fn param_sum(call: &FeatureCall) -> i64 {
    let num = |key| call.param(key).and_then(|v| v.trim().parse::<i64>().ok()).unwrap_or(0);
    num("first") + num("second")
}

/// Stand-in climate reading until a real sensor is fitted.
fn read_climate(now_ms: u64) -> (String, String) {
    let step = (now_ms / CLIMATE_PERIOD_MS) % 10;
    let temperature = 22 + step / 2;
    let humidity = 45 + step;
    (temperature.to_string(), humidity.to_string())
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  MEO node v{}                        ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // ── 2. Adapters ───────────────────────────────────────────
    let storage = NvsAdapter::new().map_err(|e| anyhow!("NVS init failed: {}", e))?;
    let wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs_partition))?,
        sys_loop,
    )?;

    let mac = device_id::read_mac();
    let mut config = DeviceConfig::default()
        .with_device_info(MODEL, MANUFACTURER)
        .with_debug_tags(DEBUG_TAGS);
    config.provisioning.advertise_name = device_id::advertise_name("MEO", &mac).as_str().into();
    info!("Device: {} ({})", device_id::hostname(&mac), config.provisioning.advertise_name);

    let attribute_inbox = ProvisioningInbox::new();
    let adapters = Adapters {
        transport: MqttAdapter::new(),
        storage,
        network: WifiAdapter::new(wifi),
        attributes: BleAdapter::new(attribute_inbox.clone()),
        attribute_inbox,
        system: SystemAdapter::new(),
    };
    let mut service = DeviceService::new(config, adapters)?;

    // ── 3. Features ───────────────────────────────────────────
    let mut led = PinDriver::output(peripherals.pins.gpio2)?;
    service
        .add_feature_method("turn_on_led", move |call, responder| {
            let sum = param_sum(call);
            let result = match led.set_high() {
                Ok(()) => responder.respond(true, Some(&format!("LED on, sum={}", sum))),
                Err(e) => {
                    warn!("App: LED write failed: {:?}", e);
                    responder.respond(false, Some("LED unavailable"))
                }
            };
            if let Err(e) = result {
                warn!("App: response not sent: {}", e);
            }
        })
        .map_err(Error::from)?;
    service.add_feature_event(CLIMATE_EVENT).map_err(Error::from)?;

    // ── 4. Bring-up + tick loop ───────────────────────────────
    let clock = Esp32TimeAdapter::new();
    let mut sink = LogEventSink::new();
    let outcome = service.begin(None, clock.now_ms(), &mut sink);
    info!("Device: bring-up finished ({:?})", outcome);

    let mut last_climate_ms = 0u64;
    loop {
        let now = clock.now_ms();
        service.tick(now, &mut sink);

        if service.is_session_live() && now.saturating_sub(last_climate_ms) >= CLIMATE_PERIOD_MS {
            last_climate_ms = now;
            let (temperature, humidity) = read_climate(now);
            if let Err(e) = service.publish_event(
                CLIMATE_EVENT,
                &[("temperature", &temperature), ("humidity", &humidity)],
            ) {
                warn!("App: climate event failed: {}", e);
            }
        }

        FreeRtos::delay_ms(TICK_MS);
    }
}
