//! # Transports
//!
//! Two backends share one contract:
//!
//! - [`RtuTransport`]: a session on one physical serial port
//! - [`SimulatedTransport`]: generates plausible values without hardware
//!
//! Both apply the field codec, so callers only ever see decoded
//! [`FieldValue`]s. Neither retries a transaction; the real backend only
//! retries its connection.

use serde::Serialize;

use crate::error::GatewayResult;
use crate::value::FieldValue;

pub mod rtu;
pub mod simulated;

pub use rtu::{RtuTransport, SessionState};
pub use simulated::{AlarmInjection, FaultInjector, SimulatedTransport};

/// Common backend interface.
///
/// Methods take `&mut self`; the router serialises access so at most one
/// call is in flight per backend.
pub trait Transport: Send {
    /// Bring the backend up.
    fn connect(&mut self) -> impl std::future::Future<Output = GatewayResult<()>> + Send;

    /// Release the backend's resources.
    fn disconnect(&mut self) -> impl std::future::Future<Output = GatewayResult<()>> + Send;

    fn is_connected(&self) -> bool;

    /// Read `quantity` points starting at `address` and decode them.
    fn read_registers(
        &mut self,
        unit_id: u8,
        function_code: u8,
        address: u16,
        quantity: u16,
    ) -> impl std::future::Future<Output = GatewayResult<Vec<FieldValue>>> + Send;

    /// Encode and write one value; returns the decoded value as written.
    fn write_register(
        &mut self,
        unit_id: u8,
        function_code: u8,
        address: u16,
        value: FieldValue,
    ) -> impl std::future::Future<Output = GatewayResult<Vec<FieldValue>>> + Send;

    fn stats(&self) -> TransportStats;
}

/// Per-backend traffic counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}
