//! Normalizes raw Onecta device documents into per-control climate records.
//!
//! Pure functions, no I/O. Optional upstream data stays `Option` in the output
//! so the exporter can tell "not reported" apart from zero.

use crate::models::daikin::{
    value_of, ConsumptionSeries, DeviceDocument, FanModeSettings, Field, ManagementPoint, TemperatureModeSettings,
};
use core::fmt;
use serde::Deserialize;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const UNKNOWN_MODE: &str = "unknown";
pub const UNNAMED_DEVICE: &str = "Unnamed Device";
/// Fan metadata is commonly published only under this mode.
// Mirrors upstream behavior; possibly an accidental default.
pub const FAN_FALLBACK_MODE: &str = "cooling";
const ON: &str = "on";

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDevice {
    pub device_id: String,
    pub device_model: String,
    pub is_online: bool,
    pub climate_controls: Vec<ClimateControl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClimateControl {
    pub id: String,
    pub name: String,
    pub is_on: bool,
    pub mode: String,
    pub room_temperature: Option<f64>,
    pub room_humidity: Option<f64>,
    pub outdoor_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub fan_speed: Option<String>,
    pub fan_direction_horizontal: Option<String>,
    pub fan_direction_vertical: Option<String>,
    pub powerful_mode: bool,
    pub is_in_error_state: bool,
    pub is_in_warning_state: bool,
    pub is_in_caution_state: bool,
    pub consumption_today: f64,
    pub consumption_this_week: f64,
    pub consumption_this_month: f64,
}

/// A device document that violates the structural contract
/// (missing `_id`/`deviceModel`, non-array `managementPoints`, ...).
#[derive(Debug)]
pub struct ParseError {
    /// Position of the document in the fetched collection, when known.
    pub index: Option<usize>,
    /// JSON path of the offending field.
    pub path: String,
    pub source: serde_json::Error,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "device #{} invalid at `{}`: {}", i, self.path, self.source),
            None => write!(f, "device invalid at `{}`: {}", self.path, self.source),
        }
    }
}

impl Error for ParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

impl From<serde_path_to_error::Error<serde_json::Error>> for ParseError {
    fn from(value: serde_path_to_error::Error<serde_json::Error>) -> Self {
        ParseError {
            index: None,
            path: value.path().to_string(),
            source: value.into_inner(),
        }
    }
}

pub fn parse_devices(devices: &[Value]) -> Result<Vec<ParsedDevice>, ParseError> {
    devices
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            parse_device(raw).map_err(|mut e| {
                e.index = Some(i);
                e
            })
        })
        .collect()
}

pub fn parse_device(raw: &Value) -> Result<ParsedDevice, ParseError> {
    let doc: DeviceDocument = serde_path_to_error::deserialize(raw)?;

    let climate_controls = doc
        .management_points
        .iter()
        .filter_map(|mp| ManagementPoint::deserialize(mp).ok())
        .filter(ManagementPoint::is_climate_control)
        .map(|mp| parse_climate_control(&mp))
        .collect();

    Ok(ParsedDevice {
        is_online: value_of(&doc.is_cloud_connection_up).copied().unwrap_or(false),
        device_id: doc.id,
        device_model: doc.device_model,
        climate_controls,
    })
}

fn parse_climate_control(mp: &ManagementPoint) -> ClimateControl {
    let operation_mode = value_of(&mp.operation_mode).map(String::as_str);
    let sensors = value_of(&mp.sensory_data);

    let target_temperature = operation_mode.and_then(|mode| {
        let settings: TemperatureModeSettings = value_of(&mp.temperature_control)?.entry(mode)?;
        value_of(&settings.setpoints?.room_temperature).copied()
    });

    let fan = resolve_fan_settings(mp, operation_mode).unwrap_or_default();
    let fan_direction = fan.fan_direction.unwrap_or_default();

    let cooling = value_of(&mp.consumption_data)
        .and_then(|c| c.electrical.as_ref())
        .and_then(|e| e.cooling.as_ref());

    ClimateControl {
        id: mp.embedded_id.clone().unwrap_or_default(),
        name: value_of(&mp.name).cloned().unwrap_or_else(|| UNNAMED_DEVICE.to_string()),
        is_on: is_on(&mp.on_off_mode),
        mode: operation_mode.unwrap_or(UNKNOWN_MODE).to_string(),
        room_temperature: sensors.and_then(|s| value_of(&s.room_temperature)).copied(),
        room_humidity: sensors.and_then(|s| value_of(&s.room_humidity)).copied(),
        outdoor_temperature: sensors.and_then(|s| value_of(&s.outdoor_temperature)).copied(),
        target_temperature,
        fan_speed: fan.fan_speed.as_ref().and_then(|s| s.value()).map(str::to_string),
        fan_direction_horizontal: fan_direction.horizontal.as_ref().and_then(|h| h.value()).map(str::to_string),
        fan_direction_vertical: fan_direction.vertical.as_ref().and_then(|v| v.value()).map(str::to_string),
        powerful_mode: is_on(&mp.powerful_mode),
        is_in_error_state: is_true(&mp.is_in_error_state),
        is_in_warning_state: is_true(&mp.is_in_warning_state),
        is_in_caution_state: is_true(&mp.is_in_caution_state),
        consumption_today: bucket_total(cooling, |s| &s.d),
        consumption_this_week: bucket_total(cooling, |s| &s.w),
        consumption_this_month: bucket_total(cooling, |s| &s.m),
    }
}

/// Fan settings for the current mode, else the `cooling` entry.
fn resolve_fan_settings(mp: &ManagementPoint, operation_mode: Option<&str>) -> Option<FanModeSettings> {
    let table = value_of(&mp.fan_control)?;
    operation_mode
        .and_then(|mode| table.entry(mode))
        .or_else(|| table.entry(FAN_FALLBACK_MODE))
}

fn is_on(field: &Option<Field<String>>) -> bool {
    value_of(field).is_some_and(|v| v == ON)
}

fn is_true(field: &Option<Field<bool>>) -> bool {
    value_of(field).copied().unwrap_or(false)
}

/// Missing history means nothing was recorded, so the total is 0.
fn bucket_total(
    series: Option<&ConsumptionSeries>,
    bucket: impl Fn(&ConsumptionSeries) -> &Option<Vec<Option<f64>>>,
) -> f64 {
    series
        .and_then(|s| bucket(s).as_ref())
        .map(|values| values.iter().flatten().sum::<f64>())
        .unwrap_or(0.0)
}
