//! RTU frame encoding and decoding
//!
//! An RTU ADU is `slave id (1) + PDU (≤253) + CRC-16/MODBUS (2, little-endian)`.
//! Requests are built into a [`BytesMut`]; responses are read header-first so
//! the total length can be derived without waiting for an inter-frame gap:
//!
//! | Response | Length |
//! |----------|--------|
//! | exception (`fc | 0x80`) | 5 |
//! | FC01-FC04 | 3 + byte count + 2 |
//! | FC05, FC06, FC15, FC16 | 8 |

use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_16_MODBUS};

use crate::constants::{
    self, FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS,
    FC_READ_INPUT_REGISTERS, FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER,
};
use crate::error::{GatewayError, GatewayResult};

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Bytes needed before the response length is known
pub const RESPONSE_HEADER_LEN: usize = 3;

/// Exception flag on the function code byte
const EXCEPTION_FLAG: u8 = 0x80;

#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

fn finish(mut frame: BytesMut) -> Bytes {
    let crc = crc16(&frame);
    frame.put_u16_le(crc);
    frame.freeze()
}

// ============================================================================
// Request Encoding
// ============================================================================

/// Check a read request against the protocol limits.
pub fn validate_read(unit_id: u8, function_code: u8, quantity: u16) -> GatewayResult<()> {
    validate_unit(unit_id)?;
    if !constants::is_read_function(function_code) {
        return Err(GatewayError::validation(format!(
            "Unsupported read function code 0x{:02X}",
            function_code
        )));
    }
    let max = if constants::is_bit_function(function_code) {
        constants::MAX_READ_COILS
    } else {
        constants::MAX_READ_REGISTERS
    };
    if quantity == 0 || quantity > max {
        return Err(GatewayError::validation(format!(
            "Invalid quantity {} for function 0x{:02X} (1-{})",
            quantity, function_code, max
        )));
    }
    Ok(())
}

pub fn validate_write(unit_id: u8, function_code: u8) -> GatewayResult<()> {
    validate_unit(unit_id)?;
    if !constants::is_write_function(function_code) {
        return Err(GatewayError::validation(format!(
            "Unsupported write function code 0x{:02X}",
            function_code
        )));
    }
    Ok(())
}

fn validate_unit(unit_id: u8) -> GatewayResult<()> {
    if !(constants::MIN_SLAVE_ID..=constants::MAX_SLAVE_ID).contains(&unit_id) {
        return Err(GatewayError::validation(format!(
            "Invalid slave id {} (1-247)",
            unit_id
        )));
    }
    Ok(())
}

/// Build a FC01-FC04 request frame.
pub fn encode_read(
    unit_id: u8,
    function_code: u8,
    address: u16,
    quantity: u16,
) -> GatewayResult<Bytes> {
    validate_read(unit_id, function_code, quantity)?;

    let mut frame = BytesMut::with_capacity(8);
    frame.put_u8(unit_id);
    frame.put_u8(function_code);
    frame.put_u16(address);
    frame.put_u16(quantity);
    Ok(finish(frame))
}

/// Build a single-value write frame.
///
/// `raw` is a register word, or a coil state where any non-zero value is ON.
/// FC15/FC16 write exactly one coil/register.
pub fn encode_write(
    unit_id: u8,
    function_code: u8,
    address: u16,
    raw: u16,
) -> GatewayResult<Bytes> {
    validate_write(unit_id, function_code)?;

    let mut frame = BytesMut::with_capacity(11);
    frame.put_u8(unit_id);
    frame.put_u8(function_code);
    frame.put_u16(address);

    match function_code {
        FC_WRITE_SINGLE_COIL => {
            frame.put_u16(if raw != 0 { 0xFF00 } else { 0x0000 });
        }
        FC_WRITE_SINGLE_REGISTER => {
            frame.put_u16(raw);
        }
        FC_WRITE_MULTIPLE_COILS => {
            frame.put_u16(1);
            frame.put_u8(1);
            frame.put_u8(u8::from(raw != 0));
        }
        FC_WRITE_MULTIPLE_REGISTERS => {
            frame.put_u16(1);
            frame.put_u8(2);
            frame.put_u16(raw);
        }
        other => {
            return Err(GatewayError::validation(format!(
                "Unsupported write function code 0x{:02X}",
                other
            )))
        }
    }

    Ok(finish(frame))
}

// ============================================================================
// Response Decoding
// ============================================================================

/// Total frame length implied by the first three response bytes.
pub fn response_length(header: &[u8]) -> GatewayResult<usize> {
    if header.len() < RESPONSE_HEADER_LEN {
        return Err(GatewayError::protocol("Response header too short"));
    }

    let function_code = header[1];
    if function_code & EXCEPTION_FLAG != 0 {
        return Ok(5);
    }

    match function_code {
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS | FC_READ_HOLDING_REGISTERS
        | FC_READ_INPUT_REGISTERS => Ok(RESPONSE_HEADER_LEN + header[2] as usize + 2),
        FC_WRITE_SINGLE_COIL
        | FC_WRITE_SINGLE_REGISTER
        | FC_WRITE_MULTIPLE_COILS
        | FC_WRITE_MULTIPLE_REGISTERS => Ok(8),
        other => Err(GatewayError::protocol(format!(
            "Unexpected function code 0x{:02X} in response",
            other
        ))),
    }
}

/// Validate a complete response frame and return the PDU data after the
/// function code.
pub fn decode_response(unit_id: u8, function_code: u8, frame: &[u8]) -> GatewayResult<Bytes> {
    if frame.len() < constants::MIN_RTU_FRAME_SIZE {
        return Err(GatewayError::protocol(format!(
            "RTU frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame.len() > constants::MAX_RTU_FRAME_SIZE {
        return Err(GatewayError::protocol(format!(
            "RTU frame too large: {} bytes",
            frame.len()
        )));
    }

    let data_len = frame.len() - 2;
    let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
    let calculated = crc16(&frame[..data_len]);
    if received != calculated {
        return Err(GatewayError::hardware(format!(
            "CRC mismatch: expected 0x{:04X}, got 0x{:04X}",
            calculated, received
        )));
    }

    if frame[0] != unit_id {
        return Err(GatewayError::protocol(format!(
            "Response slave ID mismatch: expected {}, got {}",
            unit_id, frame[0]
        )));
    }

    let response_fc = frame[1];
    if response_fc == function_code | EXCEPTION_FLAG {
        let code = frame.get(2).copied().unwrap_or(0);
        return Err(GatewayError::exception(function_code, code));
    }
    if response_fc != function_code {
        return Err(GatewayError::protocol(format!(
            "Unexpected function code in response: expected 0x{:02X}, got 0x{:02X}",
            function_code, response_fc
        )));
    }

    Ok(Bytes::copy_from_slice(&frame[2..data_len]))
}

/// Register words from a FC03/FC04 response body.
pub fn parse_registers(data: &[u8], quantity: u16) -> GatewayResult<Vec<u16>> {
    let (&byte_count, payload) = data
        .split_first()
        .ok_or_else(|| GatewayError::protocol("Empty register response"))?;

    let expected = quantity as usize * 2;
    if byte_count as usize != expected || payload.len() != expected {
        return Err(GatewayError::protocol(format!(
            "Register response length mismatch: expected {} bytes, got {} (byte count {})",
            expected,
            payload.len(),
            byte_count
        )));
    }

    Ok(payload
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

/// Coil/input states from a FC01/FC02 response body, as 0/1 words.
pub fn parse_bits(data: &[u8], quantity: u16) -> GatewayResult<Vec<u16>> {
    let (&byte_count, payload) = data
        .split_first()
        .ok_or_else(|| GatewayError::protocol("Empty coil response"))?;

    let expected = (quantity as usize).div_ceil(8);
    if byte_count as usize != expected || payload.len() != expected {
        return Err(GatewayError::protocol(format!(
            "Coil response length mismatch: expected {} bytes, got {} (byte count {})",
            expected,
            payload.len(),
            byte_count
        )));
    }

    Ok((0..quantity as usize)
        .map(|i| u16::from((payload[i / 8] >> (i % 8)) & 0x01))
        .collect())
}

/// Check that a write response echoes the target address.
pub fn check_write_echo(address: u16, data: &[u8]) -> GatewayResult<()> {
    if data.len() < 4 {
        return Err(GatewayError::protocol("Write response too short"));
    }
    let echoed = u16::from_be_bytes([data[0], data[1]]);
    if echoed != address {
        return Err(GatewayError::protocol(format!(
            "Write response address mismatch: expected {}, got {}",
            address, echoed
        )));
    }
    Ok(())
}
