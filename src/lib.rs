//! # Voltage BMS Gateway - Modbus RTU Core for Building Automation
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **License:** MIT
//!
//! The communication core of a building-automation gateway that drives HVAC
//! units, lighting, sensors and actuators over a shared RS-485 Modbus RTU
//! bus.
//!
//! ## Features
//!
//! - **Single Master Discipline**: one process-wide command queue, at most one
//!   transaction on the wire at any instant
//! - **Priority Lanes**: operator writes overtake background polling
//! - **Hot-Swappable Backends**: switch between real hardware and a simulator
//!   without restarting
//! - **Per-Field Codec**: fixed-point temperatures, clamped time fields,
//!   read-only sensor guards
//! - **Failure Taxonomy**: every error classified, only connections retried
//!   with exponential backoff
//!
//! ## Architecture
//!
//! ```text
//! caller -> Gateway -> CommandQueue -> Router -> {RtuTransport | SimulatedTransport}
//!                                                      |
//!                                         codec + ReverseIndex (FieldRegistry)
//! ```
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Real | Simulated |
//! |------|----------|------|-----------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils (one value) | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers (one value) | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_bms_gateway::{FieldMap, Gateway, GatewayConfig, GatewayResult};
//!
//! #[tokio::main]
//! async fn main() -> GatewayResult<()> {
//!     voltage_bms_gateway::logging::init_tracing(None);
//!
//!     let config = GatewayConfig::load(None)?;
//!     let gateway = Gateway::new(config, FieldMap::from_file("fields.yaml")?);
//!     let backend = gateway.connect().await?;
//!     println!("Running on {} backend", backend);
//!
//!     // Turn unit 1 on (high priority by default)
//!     let result = gateway.write(1, 6, 1, true).await;
//!     assert!(result.success);
//!
//!     println!("{:?}", gateway.queue_status());
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Error types and failure classification
pub mod error;

/// Protocol limits, function codes and gateway defaults
pub mod constants;

/// Decoded field values
pub mod value;

/// Layered configuration
pub mod config;

/// Tracing setup and frame formatting
pub mod logging;

// ============================================================================
// Protocol and codec
// ============================================================================

/// Addressing table and reverse index
pub mod field_map;

/// Per-field value codec
pub mod codec;

/// RTU frame encoding and decoding
pub mod frame;

/// Advisory range and variance checks on reads
pub mod integrity;

/// Exponential backoff for connection retries
pub mod backoff;

// ============================================================================
// Execution
// ============================================================================

/// Real and simulated transports
pub mod transport;

/// Backend selection and port sessions
pub mod router;

/// Priority command queue
pub mod queue;

/// Orchestration facade
pub mod gateway;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime ===
pub use tokio;

// === Facade ===
pub use gateway::{Gateway, ReadSink};

// === Error handling ===
pub use error::{ErrorKind, GatewayError, GatewayResult};

// === Configuration ===
pub use config::{BackendMode, GatewayConfig, RetrySettings, SerialSettings, SimulationSettings};

// === Core types ===
pub use field_map::{DeviceType, FieldMap, FieldRegistry, FieldSpec, ReverseIndex, ValueType};
pub use queue::{
    CommandQueue, CompletionHandle, Operation, Priority, QueueSnapshot, QueueStats, Transaction,
    TransactionExecutor, TransactionResult,
};
pub use router::{Backend, Router};
pub use value::FieldValue;

// === Transports ===
pub use transport::{
    AlarmInjection, FaultInjector, RtuTransport, SimulatedTransport, Transport, TransportStats,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Voltage BMS Gateway v{} - Modbus RTU gateway core by Evan Liu",
        VERSION
    )
}
