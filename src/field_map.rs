//! # Field Map and Reverse Index
//!
//! The field map is the externally supplied, versioned addressing table:
//!
//! ```text
//! {site, device_type, unit_id, action} -> {function_code, address, field_name, value_type}
//! ```
//!
//! The gateway only consumes it. At decode time the transports need the
//! opposite direction, so the map is inverted into a [`ReverseIndex`] keyed by
//! `function_code:address`.
//!
//! ## Duplicate addresses
//!
//! The same `(function_code, address)` pair may appear under several sites.
//! When the index covers more than one site the last registered entry wins and
//! a warning is logged for every collision. Configure
//! [`GatewayConfig::site`](crate::config::GatewayConfig::site) to scope the
//! index to a single site and avoid the collapse entirely.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::file_figment;
use crate::error::GatewayResult;

/// Semantic type of a field; selects the codec rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    /// On/off flag, any non-zero raw value decodes to `true`
    Boolean,
    /// Plain register value
    Integer,
    /// Measured temperature, ×10 fixed point, read-only
    Temperature,
    /// Writable temperature setpoint, ×10 fixed point
    Setpoint,
    /// Hour of day, clamped to 0-23 on write
    Hour,
    /// Minute of hour, clamped to 0-59 on write
    Minute,
    /// Device-specific operating mode enum
    Mode,
    /// Device-specific fan speed enum
    FanSpeed,
    /// Relative humidity in percent, read-only
    Humidity,
    /// CO2 concentration in ppm, read-only
    Co2,
    /// Device alarm/error code, read-only
    Alarm,
}

impl ValueType {
    /// Read-only fields reject writes before they reach the bus.
    #[inline]
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            ValueType::Temperature | ValueType::Humidity | ValueType::Co2 | ValueType::Alarm
        )
    }

    /// Whether values are ×10 fixed point on the wire.
    #[inline]
    pub fn is_fixed_point(self) -> bool {
        matches!(self, ValueType::Temperature | ValueType::Setpoint)
    }

    /// Plausible domain of decoded values on a given device, used by the
    /// integrity check. Cooler and heater setpoints sit outside comfort range.
    pub fn domain(self, device_type: DeviceType) -> Option<(f64, f64)> {
        match self {
            ValueType::Temperature => Some((-40.0, 80.0)),
            ValueType::Setpoint => match device_type {
                DeviceType::Cooler => Some((-10.0, 10.0)),
                DeviceType::Heater => Some((30.0, 70.0)),
                _ => Some((5.0, 40.0)),
            },
            ValueType::Hour => Some((0.0, 23.0)),
            ValueType::Minute => Some((0.0, 59.0)),
            ValueType::Humidity => Some((0.0, 100.0)),
            ValueType::Co2 => Some((400.0, 10_000.0)),
            ValueType::Boolean
            | ValueType::Integer
            | ValueType::Mode
            | ValueType::FanSpeed
            | ValueType::Alarm => None,
        }
    }
}

/// Kind of equipment behind a unit id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[serde(alias = "ac", alias = "hvac")]
    AirConditioner,
    Cooler,
    Heater,
    Ventilation,
    Lighting,
    Sensor,
    Actuator,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::AirConditioner => "air_conditioner",
            DeviceType::Cooler => "cooler",
            DeviceType::Heater => "heater",
            DeviceType::Ventilation => "ventilation",
            DeviceType::Lighting => "lighting",
            DeviceType::Sensor => "sensor",
            DeviceType::Actuator => "actuator",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the addressing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Site (client) owning the device
    #[serde(alias = "client_id")]
    pub site: String,
    pub device_type: DeviceType,
    /// Modbus slave address of the unit
    pub unit_id: u8,
    /// Operator-facing action name, e.g. `SET_POWER`
    pub action: String,
    pub field_name: String,
    pub value_type: ValueType,
    pub function_code: u8,
    pub address: u16,
}

impl FieldSpec {
    #[inline]
    pub fn key(&self) -> FieldKey {
        FieldKey::new(self.function_code, self.address)
    }
}

/// `function_code:address` lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldKey {
    pub function_code: u8,
    pub address: u16,
}

impl FieldKey {
    #[inline]
    pub const fn new(function_code: u8, address: u16) -> Self {
        Self {
            function_code,
            address,
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.function_code, self.address)
    }
}

/// The versioned addressing table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMap {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl FieldMap {
    pub fn new(version: u32, fields: Vec<FieldSpec>) -> Self {
        Self { version, fields }
    }

    /// Load a table from a TOML, YAML or JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let map: FieldMap = file_figment(path)?.extract()?;
        info!(
            "Loaded field map v{} from {} ({} fields)",
            map.version,
            path.display(),
            map.fields.len()
        );
        Ok(map)
    }

    /// Forward lookup used by device-control handlers.
    pub fn lookup(
        &self,
        site: &str,
        device_type: DeviceType,
        unit_id: u8,
        action: &str,
    ) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| {
            f.site == site
                && f.device_type == device_type
                && f.unit_id == unit_id
                && f.action == action
        })
    }

    /// Distinct sites in registration order.
    pub fn sites(&self) -> Vec<&str> {
        let mut sites: Vec<&str> = Vec::new();
        for field in &self.fields {
            if !sites.contains(&field.site.as_str()) {
                sites.push(&field.site);
            }
        }
        sites
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Address → field lookup used at decode/encode time.
#[derive(Debug, Clone, Default)]
pub struct ReverseIndex {
    by_key: HashMap<FieldKey, FieldSpec>,
    collisions: usize,
}

impl ReverseIndex {
    /// Invert `map`, optionally restricted to one site.
    ///
    /// Entries are registered in table order; a later entry with the same key
    /// replaces the earlier one.
    pub fn build(map: &FieldMap, site: Option<&str>) -> Self {
        let mut by_key = HashMap::with_capacity(map.fields.len());
        let mut collisions = 0;

        for field in map
            .fields
            .iter()
            .filter(|f| site.map_or(true, |s| f.site == s))
        {
            if let Some(previous) = by_key.insert(field.key(), field.clone()) {
                collisions += 1;
                warn!(
                    "Field key {} registered twice: {}/{}/{} replaced by {}/{}/{}",
                    field.key(),
                    previous.site,
                    previous.device_type,
                    previous.field_name,
                    field.site,
                    field.device_type,
                    field.field_name
                );
            }
        }

        debug!(
            "Reverse index built: {} keys, {} collisions, site filter {:?}",
            by_key.len(),
            collisions,
            site
        );

        Self { by_key, collisions }
    }

    #[inline]
    pub fn get(&self, function_code: u8, address: u16) -> Option<&FieldSpec> {
        self.by_key.get(&FieldKey::new(function_code, address))
    }

    /// Number of keys that were overwritten while building.
    #[inline]
    pub fn collisions(&self) -> usize {
        self.collisions
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec> {
        self.by_key.values()
    }
}

/// Shared owner of the field map and its lazily built reverse index.
///
/// The index is built on first use and then served read-only until
/// [`invalidate`](Self::invalidate) or [`replace_map`](Self::replace_map).
#[derive(Debug)]
pub struct FieldRegistry {
    map: RwLock<FieldMap>,
    site: Option<String>,
    index: RwLock<Option<Arc<ReverseIndex>>>,
}

impl FieldRegistry {
    pub fn new(map: FieldMap, site: Option<String>) -> Self {
        Self {
            map: RwLock::new(map),
            site,
            index: RwLock::new(None),
        }
    }

    /// Current reverse index, building it if needed.
    pub fn index(&self) -> Arc<ReverseIndex> {
        if let Some(index) = self.index.read().as_ref() {
            return Arc::clone(index);
        }

        let mut slot = self.index.write();
        if let Some(index) = slot.as_ref() {
            return Arc::clone(index);
        }
        let built = Arc::new(ReverseIndex::build(&self.map.read(), self.site.as_deref()));
        *slot = Some(Arc::clone(&built));
        built
    }

    /// Drop the cached index; the next lookup rebuilds it.
    pub fn invalidate(&self) {
        *self.index.write() = None;
        debug!("Reverse index invalidated");
    }

    /// Swap in a new table and invalidate the index.
    pub fn replace_map(&self, map: FieldMap) {
        info!("Field map replaced with v{} ({} fields)", map.version, map.fields.len());
        *self.map.write() = map;
        self.invalidate();
    }

    /// Clone of the current table.
    pub fn map(&self) -> FieldMap {
        self.map.read().clone()
    }

    pub fn site(&self) -> Option<&str> {
        self.site.as_deref()
    }
}
