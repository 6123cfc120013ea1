//! Protocol and gateway constants
//!
//! Frame limits follow the Modbus over serial line specification:
//! an RTU ADU is at most 256 bytes = slave address (1) + PDU (253) + CRC (2).

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum PDU (Protocol Data Unit) size
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum RTU ADU size: slave address + PDU + CRC
pub const MAX_RTU_FRAME_SIZE: usize = 1 + MAX_PDU_SIZE + 2;

/// Smallest valid RTU frame: slave address + function code + CRC
pub const MIN_RTU_FRAME_SIZE: usize = 4;

/// Maximum number of registers for FC03/FC04
///
/// 1 (FC) + 1 (byte count) + N × 2 ≤ 253 → N ≤ 125
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum number of coils for FC01/FC02
pub const MAX_READ_COILS: u16 = 2000;

/// Largest value a holding register can carry
pub const MAX_REGISTER_VALUE: u16 = u16::MAX;

/// Valid slave ids on a shared RS-485 segment (0 is broadcast)
pub const MIN_SLAVE_ID: u8 = 1;
pub const MAX_SLAVE_ID: u8 = 247;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Whether the function code reads bit-addressed data (coils/discrete inputs).
#[inline]
pub fn is_bit_function(function_code: u8) -> bool {
    matches!(
        function_code,
        FC_READ_COILS | FC_READ_DISCRETE_INPUTS | FC_WRITE_SINGLE_COIL | FC_WRITE_MULTIPLE_COILS
    )
}

#[inline]
pub fn is_read_function(function_code: u8) -> bool {
    matches!(
        function_code,
        FC_READ_COILS
            | FC_READ_DISCRETE_INPUTS
            | FC_READ_HOLDING_REGISTERS
            | FC_READ_INPUT_REGISTERS
    )
}

#[inline]
pub fn is_write_function(function_code: u8) -> bool {
    matches!(
        function_code,
        FC_WRITE_SINGLE_COIL
            | FC_WRITE_SINGLE_REGISTER
            | FC_WRITE_MULTIPLE_COILS
            | FC_WRITE_MULTIPLE_REGISTERS
    )
}

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

/// Human readable name of an exception code.
pub fn exception_description(code: u8) -> &'static str {
    match code {
        EXCEPTION_ILLEGAL_FUNCTION => "Illegal Function",
        EXCEPTION_ILLEGAL_DATA_ADDRESS => "Illegal Data Address",
        EXCEPTION_ILLEGAL_DATA_VALUE => "Illegal Data Value",
        EXCEPTION_SERVER_DEVICE_FAILURE => "Server Device Failure",
        EXCEPTION_ACKNOWLEDGE => "Acknowledge",
        EXCEPTION_SERVER_DEVICE_BUSY => "Server Device Busy",
        EXCEPTION_MEMORY_PARITY_ERROR => "Memory Parity Error",
        EXCEPTION_GATEWAY_PATH_UNAVAILABLE => "Gateway Path Unavailable",
        EXCEPTION_GATEWAY_TARGET_FAILED => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

// ============================================================================
// Gateway Defaults
// ============================================================================

/// Artificial bus turnaround applied by both backends (milliseconds)
pub const DEFAULT_TRANSACTION_LATENCY_MS: u64 = 70;

/// Per-transaction response timeout on the real bus (milliseconds)
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;

/// First connection retry delay (milliseconds)
pub const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 1000;

/// Cap for connection retry delays (milliseconds)
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Connection attempts made by one `retry_connection()` call
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default serial path pre-created at startup
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Default bus speed
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Filler returned by the simulator for addresses without a field mapping
pub const SIMULATED_FILLER_MAX: u16 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(MAX_PDU_SIZE, 253);
        assert_eq!(MAX_RTU_FRAME_SIZE, 256);
    }

    #[test]
    fn test_register_limit_fits_pdu() {
        let read_pdu_size = 1 + 1 + (MAX_READ_REGISTERS as usize * 2);
        assert!(read_pdu_size <= MAX_PDU_SIZE);

        let read_coil_pdu = 1 + 1 + (MAX_READ_COILS as usize).div_ceil(8);
        assert!(read_coil_pdu <= MAX_PDU_SIZE);
    }

    #[test]
    fn test_function_code_groups() {
        assert!(is_read_function(FC_READ_HOLDING_REGISTERS));
        assert!(!is_read_function(FC_WRITE_SINGLE_REGISTER));
        assert!(is_write_function(FC_WRITE_SINGLE_COIL));
        assert!(is_bit_function(FC_READ_DISCRETE_INPUTS));
        assert!(!is_bit_function(FC_READ_INPUT_REGISTERS));
    }
}
