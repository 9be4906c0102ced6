//! Prometheus view of the parsed devices.
//!
//! `DaikinExporter` owns its registry for the process lifetime. Every update
//! resets all gauges before repopulating them, so label combinations of
//! vanished devices or capabilities never linger. Reset and repopulation run
//! under the write half of a lock that rendering also takes, which keeps
//! scrapes from observing a half-written set.

use crate::parser::{self, ClimateControl, ParsedDevice};
use log::{debug, error, info};
use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use serde_json::Value;
use std::sync::{PoisonError, RwLock};

const DEVICE_LABELS: &[&str] = &["device_id", "device_model"];
const CONTROL_LABELS: &[&str] = &["device_id", "device_model", "device_name", "control_id"];
const CONTROL_MODE_LABELS: &[&str] = &["device_id", "device_model", "device_name", "control_id", "mode"];

pub mod update_status {
    pub const SUCCESS: &str = "success";
    pub const ERROR: &str = "error";
}

pub struct DaikinExporter {
    registry: Registry,
    room_temperature: GaugeVec,
    room_humidity: GaugeVec,
    outdoor_temperature: GaugeVec,
    target_temperature: GaugeVec,
    device_online: GaugeVec,
    device_power: GaugeVec,
    powerful_mode: GaugeVec,
    error_state: GaugeVec,
    warning_state: GaugeVec,
    consumption_today: GaugeVec,
    consumption_week: GaugeVec,
    consumption_month: GaugeVec,
    data_updates: IntCounterVec,
    publish_lock: RwLock<()>,
}

fn register_gauge(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> prometheus::Result<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

impl DaikinExporter {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        #[cfg(target_os = "linux")]
        registry.register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))?;

        let r = &registry;
        let exporter = DaikinExporter {
            room_temperature: register_gauge(
                r,
                "daikin_room_temperature_celsius",
                "Room temperature in Celsius",
                CONTROL_LABELS,
            )?,
            room_humidity: register_gauge(r, "daikin_room_humidity_percent", "Room humidity in percent", CONTROL_LABELS)?,
            outdoor_temperature: register_gauge(
                r,
                "daikin_outdoor_temperature_celsius",
                "Outdoor temperature in Celsius",
                CONTROL_LABELS,
            )?,
            target_temperature: register_gauge(
                r,
                "daikin_target_temperature_celsius",
                "Target temperature in Celsius",
                CONTROL_MODE_LABELS,
            )?,
            device_online: register_gauge(
                r,
                "daikin_device_online",
                "Device online status (1 = online, 0 = offline)",
                DEVICE_LABELS,
            )?,
            device_power: register_gauge(
                r,
                "daikin_device_power_on",
                "Device power status (1 = on, 0 = off)",
                CONTROL_MODE_LABELS,
            )?,
            powerful_mode: register_gauge(
                r,
                "daikin_powerful_mode",
                "Powerful mode status (1 = on, 0 = off)",
                CONTROL_LABELS,
            )?,
            error_state: register_gauge(
                r,
                "daikin_error_state",
                "Device error state (1 = error, 0 = no error)",
                CONTROL_LABELS,
            )?,
            warning_state: register_gauge(
                r,
                "daikin_warning_state",
                "Device warning state (1 = warning, 0 = no warning)",
                CONTROL_LABELS,
            )?,
            consumption_today: register_gauge(
                r,
                "daikin_consumption_today_kwh",
                "Today energy consumption in kWh",
                CONTROL_LABELS,
            )?,
            consumption_week: register_gauge(
                r,
                "daikin_consumption_week_kwh",
                "This week energy consumption in kWh",
                CONTROL_LABELS,
            )?,
            consumption_month: register_gauge(
                r,
                "daikin_consumption_month_kwh",
                "This month energy consumption in kWh",
                CONTROL_LABELS,
            )?,
            data_updates: {
                let counter = IntCounterVec::new(
                    Opts::new("daikin_data_updates_total", "Total number of data updates from Daikin Cloud"),
                    &["status"],
                )?;
                r.register(Box::new(counter.clone()))?;
                counter
            },
            registry,
            publish_lock: RwLock::new(()),
        };
        Ok(exporter)
    }

    /// Parse raw documents and publish them. A document that breaks the
    /// structural contract counts as a failed update; the previous series stay.
    pub fn publish_documents(&self, documents: &[Value]) -> bool {
        match parser::parse_devices(documents) {
            Ok(devices) => self.update_devices(&devices),
            Err(e) => {
                self.record_update(update_status::ERROR);
                error!("Error parsing device documents: {}", e);
                false
            }
        }
    }

    /// Replace the whole series set with `devices`. Never fails; faults are
    /// logged and counted under `status="error"`.
    pub fn update_devices(&self, devices: &[ParsedDevice]) -> bool {
        let result = {
            let _guard = self.publish_lock.write().unwrap_or_else(PoisonError::into_inner);
            self.clear_metrics();
            devices.iter().try_for_each(|d| self.write_device(d))
        };

        match result {
            Ok(()) => {
                self.record_update(update_status::SUCCESS);
                info!("Updated metrics for {} device(s)", devices.len());
                true
            }
            Err(e) => {
                self.record_update(update_status::ERROR);
                error!("Error updating device metrics: {}", e);
                false
            }
        }
    }

    /// Text exposition of every registered series.
    pub fn render(&self) -> prometheus::Result<String> {
        let families = {
            let _guard = self.publish_lock.read().unwrap_or_else(PoisonError::into_inner);
            self.registry.gather()
        };
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("metrics are not UTF-8: {}", e)))
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    fn record_update(&self, status: &str) {
        self.data_updates.with_label_values(&[status]).inc();
    }

    fn clear_metrics(&self) {
        for gauge in [
            &self.room_temperature,
            &self.room_humidity,
            &self.outdoor_temperature,
            &self.target_temperature,
            &self.device_online,
            &self.device_power,
            &self.powerful_mode,
            &self.error_state,
            &self.warning_state,
            &self.consumption_today,
            &self.consumption_week,
            &self.consumption_month,
        ] {
            gauge.reset();
        }
    }

    fn write_device(&self, device: &ParsedDevice) -> prometheus::Result<()> {
        let device_labels = [device.device_id.as_str(), device.device_model.as_str()];
        self.device_online
            .get_metric_with_label_values(&device_labels)?
            .set(flag(device.is_online));

        for control in &device.climate_controls {
            self.write_control(device, control)?;
        }
        debug!(
            "Device {} ({}): {} climate control(s)",
            device.device_id,
            device.device_model,
            device.climate_controls.len()
        );
        Ok(())
    }

    fn write_control(&self, device: &ParsedDevice, control: &ClimateControl) -> prometheus::Result<()> {
        let labels = [
            device.device_id.as_str(),
            device.device_model.as_str(),
            control.name.as_str(),
            control.id.as_str(),
        ];
        let mode_labels = [labels[0], labels[1], labels[2], labels[3], control.mode.as_str()];

        let optional = [
            (&self.room_temperature, control.room_temperature),
            (&self.room_humidity, control.room_humidity),
            (&self.outdoor_temperature, control.outdoor_temperature),
        ];
        for (gauge, value) in optional {
            if let Some(v) = value {
                gauge.get_metric_with_label_values(&labels)?.set(v);
            }
        }
        if let Some(v) = control.target_temperature {
            self.target_temperature.get_metric_with_label_values(&mode_labels)?.set(v);
        }

        self.device_power
            .get_metric_with_label_values(&mode_labels)?
            .set(flag(control.is_on));

        let always = [
            (&self.powerful_mode, flag(control.powerful_mode)),
            (&self.error_state, flag(control.is_in_error_state)),
            (&self.warning_state, flag(control.is_in_warning_state)),
            (&self.consumption_today, control.consumption_today),
            (&self.consumption_week, control.consumption_this_week),
            (&self.consumption_month, control.consumption_this_month),
        ];
        for (gauge, value) in always {
            gauge.get_metric_with_label_values(&labels)?.set(value);
        }
        Ok(())
    }
}
