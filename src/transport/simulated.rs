//! Simulated transport
//!
//! Mirrors the real transport's contract without hardware. Every call waits a
//! fixed artificial latency, then produces values shaped by the field mapped
//! at each address. Operators flip faults at runtime through a shared
//! [`FaultInjector`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Transport, TransportStats};
use crate::codec::{self, Encoded};
use crate::config::SimulationSettings;
use crate::constants;
use crate::error::{GatewayError, GatewayResult};
use crate::field_map::{DeviceType, FieldRegistry, FieldSpec, ValueType};
use crate::frame;
use crate::value::FieldValue;

/// Failure message while communication failure is injected
pub const SIMULATED_FAILURE_MESSAGE: &str = "Simulated communication failure";

/// Forces the alarm field of one device type to a fixed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmInjection {
    pub device_type: DeviceType,
    pub value: i64,
}

#[derive(Debug, Default)]
struct FaultState {
    communication_failure: AtomicBool,
    alarm: Mutex<Option<AlarmInjection>>,
}

/// Shared fault toggles for the simulator.
///
/// Cloning yields another handle to the same toggles.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    state: Arc<FaultState>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every simulated call fail.
    pub fn set_communication_failure(&self, enabled: bool) {
        self.state
            .communication_failure
            .store(enabled, Ordering::SeqCst);
        info!(
            "Simulated communication failure {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    #[inline]
    pub fn communication_failure(&self) -> bool {
        self.state.communication_failure.load(Ordering::SeqCst)
    }

    pub fn inject_alarm(&self, device_type: DeviceType, value: i64) {
        *self.state.alarm.lock() = Some(AlarmInjection { device_type, value });
        info!("Injected alarm {} for {}", value, device_type);
    }

    pub fn clear_alarm(&self) {
        if self.state.alarm.lock().take().is_some() {
            info!("Alarm injection cleared");
        }
    }

    pub fn alarm(&self) -> Option<AlarmInjection> {
        *self.state.alarm.lock()
    }

    /// Clear every fault.
    pub fn reset(&self) {
        self.state
            .communication_failure
            .store(false, Ordering::SeqCst);
        *self.state.alarm.lock() = None;
    }
}

/// Hardware-free backend.
pub struct SimulatedTransport {
    latency: Duration,
    temperature_offset: f64,
    rng: StdRng,
    faults: FaultInjector,
    fields: Arc<FieldRegistry>,
    connected: bool,
    stats: TransportStats,
}

impl SimulatedTransport {
    pub fn new(
        settings: &SimulationSettings,
        fields: Arc<FieldRegistry>,
        faults: FaultInjector,
    ) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        if settings.communication_failure {
            faults.set_communication_failure(true);
        }
        if let Some(alarm) = settings.alarm {
            faults.inject_alarm(alarm.device_type, alarm.value);
        }

        Self {
            latency: settings.latency(),
            temperature_offset: settings.temperature_offset,
            rng,
            faults,
            fields,
            connected: false,
            stats: TransportStats::default(),
        }
    }

    #[inline]
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    #[inline]
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Latency, then the injected failure if any.
    async fn turnaround(&mut self) -> GatewayResult<()> {
        tokio::time::sleep(self.latency).await;
        self.stats.requests_sent += 1;
        if self.faults.communication_failure() {
            self.stats.errors += 1;
            return Err(GatewayError::connection(SIMULATED_FAILURE_MESSAGE));
        }
        self.stats.responses_received += 1;
        Ok(())
    }

    fn generate(&mut self, spec: &FieldSpec) -> FieldValue {
        if spec.value_type == ValueType::Alarm {
            if let Some(alarm) = self.faults.alarm() {
                if alarm.device_type == spec.device_type {
                    return FieldValue::Int(alarm.value);
                }
            }
        }

        let rng = &mut self.rng;
        match spec.value_type {
            ValueType::Boolean => FieldValue::Bool(rng.gen_bool(0.5)),
            ValueType::Hour => FieldValue::Int(rng.gen_range(0..=23)),
            ValueType::Minute => FieldValue::Int(rng.gen_range(0..=59)),
            ValueType::Setpoint => {
                let (min, max) = setpoint_range(spec.device_type);
                let degrees = rng.gen_range(min..=max) + self.temperature_offset;
                codec::decode_value(ValueType::Setpoint, codec::tenths_to_raw(degrees))
            }
            ValueType::Temperature => {
                let (min, max) = temperature_range(spec.device_type);
                let degrees = rng.gen_range(min..=max);
                codec::decode_value(ValueType::Temperature, codec::tenths_to_raw(degrees))
            }
            ValueType::Mode => FieldValue::Int(rng.gen_range(0..=mode_max(spec.device_type))),
            ValueType::FanSpeed => {
                FieldValue::Int(rng.gen_range(0..=fan_speed_max(spec.device_type)))
            }
            ValueType::Humidity => FieldValue::Int(rng.gen_range(30..=70)),
            ValueType::Co2 => FieldValue::Int(rng.gen_range(400..=1200)),
            ValueType::Alarm => FieldValue::Int(0),
            ValueType::Integer => FieldValue::Int(rng.gen_range(0..=100)),
        }
    }

    fn filler(&mut self, function_code: u8) -> FieldValue {
        let raw = if constants::is_bit_function(function_code) {
            self.rng.gen_range(0..=1)
        } else {
            self.rng.gen_range(0..=constants::SIMULATED_FILLER_MAX)
        };
        codec::decode_unmapped(function_code, raw)
    }
}

/// Setpoint band per device type (degrees)
fn setpoint_range(device_type: DeviceType) -> (f64, f64) {
    match device_type {
        DeviceType::Cooler => (-5.0, 8.0),
        DeviceType::Heater => (35.0, 65.0),
        _ => (18.0, 28.0),
    }
}

/// Measured temperature band per device type (degrees)
fn temperature_range(device_type: DeviceType) -> (f64, f64) {
    match device_type {
        DeviceType::Cooler => (-2.0, 6.0),
        DeviceType::Heater => (40.0, 60.0),
        _ => (18.0, 28.0),
    }
}

fn mode_max(device_type: DeviceType) -> i64 {
    match device_type {
        // auto, cool, heat, dry, fan
        DeviceType::AirConditioner => 4,
        DeviceType::Ventilation => 3,
        DeviceType::Heater | DeviceType::Cooler => 2,
        _ => 1,
    }
}

fn fan_speed_max(device_type: DeviceType) -> i64 {
    match device_type {
        DeviceType::Ventilation => 5,
        DeviceType::AirConditioner => 3,
        _ => 2,
    }
}

impl Transport for SimulatedTransport {
    async fn connect(&mut self) -> GatewayResult<()> {
        if !self.connected {
            self.connected = true;
            info!("Simulated transport connected (latency {:?})", self.latency);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> GatewayResult<()> {
        if self.connected {
            self.connected = false;
            info!("Simulated transport disconnected");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn read_registers(
        &mut self,
        unit_id: u8,
        function_code: u8,
        address: u16,
        quantity: u16,
    ) -> GatewayResult<Vec<FieldValue>> {
        frame::validate_read(unit_id, function_code, quantity)?;
        self.turnaround().await?;

        let index = self.fields.index();
        let mut values = Vec::with_capacity(quantity as usize);
        for offset in 0..quantity {
            let point = address.wrapping_add(offset);
            let value = match index.get(function_code, point) {
                Some(spec) => self.generate(spec),
                None => self.filler(function_code),
            };
            values.push(value);
        }

        debug!(
            "Simulated read slave {} fc 0x{:02X} @{} x{} -> {:?}",
            unit_id, function_code, address, quantity, values
        );
        Ok(values)
    }

    async fn write_register(
        &mut self,
        unit_id: u8,
        function_code: u8,
        address: u16,
        value: FieldValue,
    ) -> GatewayResult<Vec<FieldValue>> {
        frame::validate_write(unit_id, function_code)?;
        self.turnaround().await?;

        let index = self.fields.index();
        let spec = codec::write_target(&index, function_code, address);
        match codec::encode_field(spec, function_code, &value) {
            Encoded::Raw(raw) => {
                let written = codec::decode_field(spec, function_code, raw);
                debug!(
                    "Simulated write slave {} fc 0x{:02X} @{} = {}",
                    unit_id, function_code, address, written
                );
                Ok(vec![written])
            }
            Encoded::ReadOnly => {
                let name = spec.map_or("unknown", |s| s.field_name.as_str());
                warn!(
                    "Rejected write of {} to read-only field {} (slave {}, address {})",
                    value, name, unit_id, address
                );
                Err(GatewayError::validation(format!(
                    "Field {} at address {} is read-only",
                    name, address
                )))
            }
        }
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
