//! Shapes of the Onecta `gateway-devices` documents.
//!
//! Only the parts read by the parser are modeled. The upstream schema varies by
//! hardware capability, so every block below the document root is an `Option`
//! and is decoded leniently: a block holding the wrong JSON type is `None`
//! rather than an error. Only `_id`, `deviceModel` and a non-array
//! `managementPoints` can fail a document.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;

pub const CLIMATE_CONTROL: &str = "climateControl";

/// Decode an optional field, turning a type mismatch into `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// `null` reads as an empty list; any other non-array is still an error.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Onecta wraps nearly every characteristic as `{ "value": ..., ...metadata }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct Field<T> {
    #[serde(default, deserialize_with = "lenient")]
    pub value: Option<T>,
}

/// Inner value of an optional `{ "value": .. }` characteristic.
pub fn value_of<T>(field: &Option<Field<T>>) -> Option<&T> {
    field.as_ref()?.value.as_ref()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub device_model: String,
    #[serde(default, deserialize_with = "lenient")]
    pub is_cloud_connection_up: Option<Field<bool>>,
    /// Kept raw; entries that are not objects are skipped by the parser.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub management_points: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementPoint {
    #[serde(default, deserialize_with = "lenient")]
    pub embedded_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub management_point_type: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<Field<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub on_off_mode: Option<Field<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub operation_mode: Option<Field<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub powerful_mode: Option<Field<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub sensory_data: Option<Field<SensoryData>>,
    #[serde(default, deserialize_with = "lenient")]
    pub temperature_control: Option<Field<ModeTable>>,
    #[serde(default, deserialize_with = "lenient")]
    pub fan_control: Option<Field<ModeTable>>,
    #[serde(default, deserialize_with = "lenient")]
    pub consumption_data: Option<Field<ConsumptionData>>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_in_error_state: Option<Field<bool>>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_in_warning_state: Option<Field<bool>>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_in_caution_state: Option<Field<bool>>,
}

impl ManagementPoint {
    pub fn is_climate_control(&self) -> bool {
        self.management_point_type.as_deref() == Some(CLIMATE_CONTROL)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensoryData {
    #[serde(default, deserialize_with = "lenient")]
    pub room_temperature: Option<Field<f64>>,
    #[serde(default, deserialize_with = "lenient")]
    pub room_humidity: Option<Field<f64>>,
    #[serde(default, deserialize_with = "lenient")]
    pub outdoor_temperature: Option<Field<f64>>,
}

/// `temperatureControl` and `fanControl` both key their settings by operation
/// mode. Entries stay raw and are decoded only for the mode being looked up.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeTable {
    #[serde(default, deserialize_with = "lenient")]
    pub operation_modes: Option<BTreeMap<String, Value>>,
}

impl ModeTable {
    pub fn entry<T: DeserializeOwned>(&self, mode: &str) -> Option<T> {
        let raw = self.operation_modes.as_ref()?.get(mode)?;
        T::deserialize(raw).ok()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureModeSettings {
    #[serde(default, deserialize_with = "lenient")]
    pub setpoints: Option<Setpoints>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setpoints {
    #[serde(default, deserialize_with = "lenient")]
    pub room_temperature: Option<Field<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanModeSettings {
    #[serde(default, deserialize_with = "lenient")]
    pub fan_speed: Option<CurrentMode>,
    #[serde(default, deserialize_with = "lenient")]
    pub fan_direction: Option<FanDirection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanDirection {
    #[serde(default, deserialize_with = "lenient")]
    pub horizontal: Option<CurrentMode>,
    #[serde(default, deserialize_with = "lenient")]
    pub vertical: Option<CurrentMode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentMode {
    #[serde(default, deserialize_with = "lenient")]
    pub current_mode: Option<Field<String>>,
}

impl CurrentMode {
    pub fn value(&self) -> Option<&str> {
        value_of(&self.current_mode).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionData {
    #[serde(default, deserialize_with = "lenient")]
    pub electrical: Option<ElectricalConsumption>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectricalConsumption {
    #[serde(default, deserialize_with = "lenient")]
    pub cooling: Option<ConsumptionSeries>,
}

/// Fixed-size kWh buckets: `d` daily (2-hour slots of yesterday and today),
/// `w` weekly (days of last and current week), `m` monthly (months of last
/// and current year). Unreported slots are `null`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsumptionSeries {
    #[serde(default, deserialize_with = "lenient")]
    pub d: Option<Vec<Option<f64>>>,
    #[serde(default, deserialize_with = "lenient")]
    pub w: Option<Vec<Option<f64>>>,
    #[serde(default, deserialize_with = "lenient")]
    pub m: Option<Vec<Option<f64>>>,
}
