//! # Field Codec
//!
//! Conversion between raw 16-bit register words and domain [`FieldValue`]s,
//! driven by the [`ValueType`] of the field mapped at each address.
//!
//! ## Rules
//!
//! | Value type | Decode | Encode |
//! |------------|--------|--------|
//! | boolean | `raw != 0` | `1` / `0` |
//! | temperature | signed ÷10 | rejected (read-only) |
//! | setpoint | signed ÷10 | ×10, rounded |
//! | hour | integer | clamped to 0-23 |
//! | minute | integer | clamped to 0-59 |
//! | humidity, co2, alarm | integer | rejected (read-only) |
//! | integer, mode, fan_speed | integer | clamped to 0-65535 |
//!
//! Addresses without a mapping decode generically: booleans for bit
//! functions, plain integers otherwise.

use crate::constants;
use crate::field_map::{FieldSpec, ReverseIndex, ValueType};
use crate::value::FieldValue;

/// Outcome of encoding a value for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoded {
    /// Register word (or coil state as 0/1) to put on the bus
    Raw(u16),
    /// Target field is read-only; nothing may be written
    ReadOnly,
}

// ============================================================================
// Decoding Functions
// ============================================================================

/// Decode one raw word according to a value type.
pub fn decode_value(value_type: ValueType, raw: u16) -> FieldValue {
    if value_type.is_fixed_point() {
        return FieldValue::Float(raw_to_tenths(raw));
    }
    match value_type {
        ValueType::Boolean => FieldValue::Bool(raw != 0),
        _ => FieldValue::Int(i64::from(raw)),
    }
}

/// Decode a word that has no field mapping.
#[inline]
pub fn decode_unmapped(function_code: u8, raw: u16) -> FieldValue {
    if constants::is_bit_function(function_code) {
        FieldValue::Bool(raw != 0)
    } else {
        FieldValue::Int(i64::from(raw))
    }
}

/// Decode one word using an optional field mapping.
#[inline]
pub fn decode_field(spec: Option<&FieldSpec>, function_code: u8, raw: u16) -> FieldValue {
    match spec {
        Some(spec) => decode_value(spec.value_type, raw),
        None => decode_unmapped(function_code, raw),
    }
}

/// Decode a contiguous block read starting at `start_address`.
///
/// Each word is looked up individually, so a block may mix mapped and
/// unmapped addresses.
pub fn decode_block(
    index: &ReverseIndex,
    function_code: u8,
    start_address: u16,
    raw: &[u16],
) -> Vec<FieldValue> {
    raw.iter()
        .enumerate()
        .map(|(offset, &word)| {
            let address = start_address.wrapping_add(offset as u16);
            decode_field(index.get(function_code, address), function_code, word)
        })
        .collect()
}

/// Signed ×10 fixed point to a float.
#[inline]
pub fn raw_to_tenths(raw: u16) -> f64 {
    f64::from(raw as i16) / 10.0
}

// ============================================================================
// Encoding Functions
// ============================================================================

/// Encode a value for a field of the given type.
pub fn encode_value(value_type: ValueType, value: &FieldValue) -> Encoded {
    if value_type.is_read_only() {
        return Encoded::ReadOnly;
    }

    let raw = match value_type {
        ValueType::Boolean => u16::from(value.is_truthy()),
        _ if value_type.is_fixed_point() => tenths_to_raw(value.as_f64()),
        ValueType::Hour => clamp_hour(value.as_i64()),
        ValueType::Minute => clamp_minute(value.as_i64()),
        _ => clamp_register(value.as_i64()),
    };
    Encoded::Raw(raw)
}

/// Encode a value using an optional field mapping.
///
/// Without a mapping, coil functions take the truthiness of the value and
/// register functions take its integer view clamped to 0-65535.
pub fn encode_field(spec: Option<&FieldSpec>, function_code: u8, value: &FieldValue) -> Encoded {
    match spec {
        Some(spec) => encode_value(spec.value_type, value),
        None if constants::is_bit_function(function_code) => {
            Encoded::Raw(u16::from(value.is_truthy()))
        }
        None => Encoded::Raw(clamp_register(value.as_i64())),
    }
}

/// Field targeted by a write.
///
/// Field maps usually register a point under its read function code, so a
/// write falls back to the matching read table: coils for FC05/FC15, holding
/// registers for FC06/FC16.
pub fn write_target(index: &ReverseIndex, function_code: u8, address: u16) -> Option<&FieldSpec> {
    index.get(function_code, address).or_else(|| {
        let read_fc = match function_code {
            constants::FC_WRITE_SINGLE_COIL | constants::FC_WRITE_MULTIPLE_COILS => {
                constants::FC_READ_COILS
            }
            constants::FC_WRITE_SINGLE_REGISTER | constants::FC_WRITE_MULTIPLE_REGISTERS => {
                constants::FC_READ_HOLDING_REGISTERS
            }
            _ => return None,
        };
        index.get(read_fc, address)
    })
}

/// Float to signed ×10 fixed point, saturating at the i16 range.
#[inline]
pub fn tenths_to_raw(value: f64) -> u16 {
    let scaled = (value * 10.0).round();
    let clamped = scaled.clamp(f64::from(i16::MIN), f64::from(i16::MAX));
    (clamped as i16) as u16
}

#[inline]
pub fn clamp_hour(value: i64) -> u16 {
    value.clamp(0, 23) as u16
}

#[inline]
pub fn clamp_minute(value: i64) -> u16 {
    value.clamp(0, 59) as u16
}

#[inline]
pub fn clamp_register(value: i64) -> u16 {
    value.clamp(0, i64::from(constants::MAX_REGISTER_VALUE)) as u16
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_map::tests::spec;
    use crate::field_map::{DeviceType, FieldMap};
    use proptest::prelude::*;

    #[test]
    fn test_decode_boolean() {
        assert_eq!(decode_value(ValueType::Boolean, 0), FieldValue::Bool(false));
        assert_eq!(decode_value(ValueType::Boolean, 1), FieldValue::Bool(true));
        assert_eq!(decode_value(ValueType::Boolean, 0xFF00), FieldValue::Bool(true));
    }

    #[test]
    fn test_decode_temperature_signed() {
        assert_eq!(decode_value(ValueType::Temperature, 235), FieldValue::Float(23.5));
        assert_eq!(
            decode_value(ValueType::Temperature, (-52_i16) as u16),
            FieldValue::Float(-5.2)
        );
    }

    #[test]
    fn test_decode_integer_types() {
        assert_eq!(decode_value(ValueType::Co2, 850), FieldValue::Int(850));
        assert_eq!(decode_value(ValueType::Hour, 7), FieldValue::Int(7));
    }

    #[test]
    fn test_decode_unmapped() {
        assert_eq!(decode_unmapped(constants::FC_READ_COILS, 1), FieldValue::Bool(true));
        assert_eq!(
            decode_unmapped(constants::FC_READ_HOLDING_REGISTERS, 42),
            FieldValue::Int(42)
        );
    }

    #[test]
    fn test_decode_block_mixes_mapped_and_unmapped() {
        let map = FieldMap::new(
            1,
            vec![
                spec("s", DeviceType::AirConditioner, "power", ValueType::Boolean, 3, 10),
                spec("s", DeviceType::AirConditioner, "setpoint", ValueType::Setpoint, 3, 11),
            ],
        );
        let index = ReverseIndex::build(&map, None);

        let values = decode_block(&index, 3, 10, &[1, 225, 9]);
        assert_eq!(
            values,
            vec![FieldValue::Bool(true), FieldValue::Float(22.5), FieldValue::Int(9)]
        );
    }

    #[test]
    fn test_encode_clamps_time_fields() {
        assert_eq!(encode_value(ValueType::Hour, &FieldValue::Int(30)), Encoded::Raw(23));
        assert_eq!(encode_value(ValueType::Minute, &FieldValue::Int(-5)), Encoded::Raw(0));
        assert_eq!(encode_value(ValueType::Minute, &FieldValue::Int(45)), Encoded::Raw(45));
    }

    #[test]
    fn test_encode_setpoint() {
        assert_eq!(encode_value(ValueType::Setpoint, &FieldValue::Float(22.5)), Encoded::Raw(225));
        assert_eq!(
            encode_value(ValueType::Setpoint, &FieldValue::Float(-1.0)),
            Encoded::Raw((-10_i16) as u16)
        );
    }

    #[test]
    fn test_encode_read_only_rejected() {
        for value_type in [
            ValueType::Temperature,
            ValueType::Humidity,
            ValueType::Co2,
            ValueType::Alarm,
        ] {
            assert_eq!(encode_value(value_type, &FieldValue::Int(1)), Encoded::ReadOnly);
        }
    }

    #[test]
    fn test_encode_boolean_and_unmapped() {
        assert_eq!(encode_value(ValueType::Boolean, &FieldValue::Bool(true)), Encoded::Raw(1));
        assert_eq!(
            encode_field(None, constants::FC_WRITE_SINGLE_COIL, &FieldValue::Int(5)),
            Encoded::Raw(1)
        );
        assert_eq!(
            encode_field(None, constants::FC_WRITE_SINGLE_REGISTER, &FieldValue::Int(70_000)),
            Encoded::Raw(u16::MAX)
        );
        assert_eq!(
            encode_field(None, constants::FC_WRITE_SINGLE_REGISTER, &FieldValue::Int(-3)),
            Encoded::Raw(0)
        );
    }

    #[test]
    fn test_write_target_falls_back_to_read_table() {
        let map = FieldMap::new(
            1,
            vec![
                spec("s", DeviceType::Cooler, "power", ValueType::Boolean, 3, 52),
                spec("s", DeviceType::Sensor, "humidity", ValueType::Humidity, 4, 52),
            ],
        );
        let index = ReverseIndex::build(&map, None);

        let target = write_target(&index, constants::FC_WRITE_SINGLE_REGISTER, 52).unwrap();
        assert_eq!(target.device_type, DeviceType::Cooler);
        assert!(write_target(&index, constants::FC_WRITE_SINGLE_COIL, 52).is_none());
    }

    proptest! {
        #[test]
        fn prop_setpoint_roundtrip_within_resolution(value in -3000.0f64..3000.0) {
            let encoded = encode_value(ValueType::Setpoint, &FieldValue::Float(value));
            let Encoded::Raw(raw) = encoded else {
                panic!("setpoint must be writable");
            };
            let decoded = decode_value(ValueType::Setpoint, raw).as_f64();
            prop_assert!((decoded - value).abs() <= 0.05 + 1e-9);
        }

        #[test]
        fn prop_hour_always_in_range(value in any::<i64>()) {
            let Encoded::Raw(raw) = encode_value(ValueType::Hour, &FieldValue::Int(value)) else {
                panic!("hour must be writable");
            };
            prop_assert!(raw <= 23);
        }
    }
}
