//! Advisory integrity checks on decoded reads.
//!
//! Range validation against the field's plausible domain plus a sliding
//! window per address to spot erratic bursts. Findings are logged; the read
//! itself is always returned unchanged.

use std::collections::{HashMap, VecDeque};

use tracing::warn;

use crate::field_map::FieldSpec;
use crate::value::FieldValue;

/// Samples kept per address unless configured otherwise.
pub const DEFAULT_INTEGRITY_WINDOW: usize = 5;

/// Standard deviation above this share of the domain span is flagged.
const VARIANCE_SPAN_RATIO: f64 = 0.25;

/// Findings for one decoded value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub out_of_range: bool,
    pub high_variance: bool,
}

impl IntegrityReport {
    #[inline]
    pub fn is_clean(&self) -> bool {
        !self.out_of_range && !self.high_variance
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SampleKey {
    unit_id: u8,
    function_code: u8,
    address: u16,
}

#[derive(Debug)]
pub struct IntegrityMonitor {
    window: usize,
    samples: HashMap<SampleKey, VecDeque<f64>>,
}

impl Default for IntegrityMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_INTEGRITY_WINDOW)
    }
}

impl IntegrityMonitor {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            samples: HashMap::new(),
        }
    }

    /// Check one decoded value read from `unit_id`.
    ///
    /// Fields whose type has no numeric domain are ignored.
    pub fn observe(
        &mut self,
        unit_id: u8,
        spec: &FieldSpec,
        value: &FieldValue,
    ) -> IntegrityReport {
        let Some((min, max)) = spec.value_type.domain(spec.device_type) else {
            return IntegrityReport::default();
        };

        let sample = value.as_f64();
        let mut report = IntegrityReport::default();

        if sample < min || sample > max {
            report.out_of_range = true;
            warn!(
                "Unit {} field {} read {} outside plausible range [{}, {}]",
                unit_id, spec.field_name, value, min, max
            );
        }

        let key = SampleKey {
            unit_id,
            function_code: spec.function_code,
            address: spec.address,
        };
        let window = self.samples.entry(key).or_default();
        if window.len() == self.window {
            window.pop_front();
        }
        window.push_back(sample);

        if window.len() == self.window {
            let deviation = std_dev(window);
            if deviation > (max - min) * VARIANCE_SPAN_RATIO {
                report.high_variance = true;
                warn!(
                    "Unit {} field {} is erratic: std dev {:.2} over last {} reads",
                    unit_id,
                    spec.field_name,
                    deviation,
                    window.len()
                );
            }
        }

        report
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

fn std_dev(samples: &VecDeque<f64>) -> f64 {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_map::tests::spec;
    use crate::field_map::{DeviceType, ValueType};

    #[test]
    fn test_humidity_out_of_range() {
        let mut monitor = IntegrityMonitor::default();
        let humidity = spec("s", DeviceType::Sensor, "humidity", ValueType::Humidity, 4, 1);

        assert!(monitor.observe(1, &humidity, &FieldValue::Int(55)).is_clean());
        assert!(monitor.observe(1, &humidity, &FieldValue::Int(140)).out_of_range);
    }

    #[test]
    fn test_co2_lower_bound() {
        let mut monitor = IntegrityMonitor::default();
        let co2 = spec("s", DeviceType::Sensor, "co2", ValueType::Co2, 4, 2);
        assert!(monitor.observe(1, &co2, &FieldValue::Int(120)).out_of_range);
        assert!(!monitor.observe(1, &co2, &FieldValue::Int(650)).out_of_range);
    }

    #[test]
    fn test_high_variance_burst() {
        let mut monitor = IntegrityMonitor::new(4);
        let humidity = spec("s", DeviceType::Sensor, "humidity", ValueType::Humidity, 4, 1);

        let mut last = IntegrityReport::default();
        for value in [0, 100, 0, 100] {
            last = monitor.observe(3, &humidity, &FieldValue::Int(value));
        }
        assert!(last.high_variance);
        assert!(!last.out_of_range);
    }

    #[test]
    fn test_stable_values_not_flagged() {
        let mut monitor = IntegrityMonitor::new(3);
        let temp = spec("s", DeviceType::Sensor, "temp", ValueType::Temperature, 4, 5);
        for value in [21.0, 21.2, 21.1, 21.3] {
            assert!(monitor.observe(1, &temp, &FieldValue::Float(value)).is_clean());
        }
    }

    #[test]
    fn test_setpoint_range_follows_device_type() {
        let mut monitor = IntegrityMonitor::default();
        let cooler = spec("s", DeviceType::Cooler, "setpoint", ValueType::Setpoint, 3, 10);
        let heater = spec("s", DeviceType::Heater, "setpoint", ValueType::Setpoint, 3, 11);
        let ac = spec("s", DeviceType::AirConditioner, "setpoint", ValueType::Setpoint, 3, 12);

        assert!(!monitor.observe(1, &cooler, &FieldValue::Float(-3.5)).out_of_range);
        assert!(!monitor.observe(1, &heater, &FieldValue::Float(60.0)).out_of_range);
        assert!(monitor.observe(1, &ac, &FieldValue::Float(60.0)).out_of_range);
        assert!(monitor.observe(1, &cooler, &FieldValue::Float(24.0)).out_of_range);
    }

    #[test]
    fn test_untyped_fields_ignored() {
        let mut monitor = IntegrityMonitor::new(2);
        let mode = spec("s", DeviceType::AirConditioner, "mode", ValueType::Mode, 3, 7);
        assert!(monitor.observe(1, &mode, &FieldValue::Int(60_000)).is_clean());
    }
}
