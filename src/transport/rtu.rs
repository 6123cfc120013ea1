//! Modbus RTU transport over a serial port
//!
//! One [`RtuTransport`] is one port session: the serial handle, its line
//! settings, connection state and retry counter. The handle is opened
//! lazily and dropped after any I/O failure, timeout or unreadable reply, so
//! the next transaction reconnects through [`RtuTransport::retry_connection`].
//!
//! Every request waits the configured bus turnaround (never less than the
//! 3.5 character gap) and starts from an empty input buffer, so stray bytes
//! from an earlier reply cannot be taken for the next one.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{ClearBuffer, SerialPort, SerialStream};
use tracing::{debug, info, trace, warn};

use super::{Transport, TransportStats};
use crate::backoff::{Backoff, RetryPolicy};
use crate::codec::{self, Encoded};
use crate::config::SerialSettings;
use crate::constants;
use crate::error::{ErrorKind, GatewayError, GatewayResult};
use crate::field_map::FieldRegistry;
use crate::frame;
use crate::integrity::IntegrityMonitor;
use crate::logging::hex_frame;
use crate::value::FieldValue;

/// Lifecycle of a port session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Last retry cycle gave up
    Failed,
}

/// Minimum silent interval between frames.
///
/// 3.5 character times at 11 bits per character; fixed at 1.75ms above
/// 19200 baud.
pub fn frame_gap(baud_rate: u32) -> Duration {
    if baud_rate > 19_200 {
        return Duration::from_micros(1750);
    }
    let char_time_us = 11_000_000 / u64::from(baud_rate.max(1));
    Duration::from_micros(char_time_us * 35 / 10)
}

/// Real transport session bound to one serial path.
pub struct RtuTransport {
    settings: SerialSettings,
    port: Option<SerialStream>,
    state: SessionState,
    backoff: Backoff,
    frame_gap: Duration,
    fields: Arc<FieldRegistry>,
    integrity: IntegrityMonitor,
    stats: TransportStats,
}

impl RtuTransport {
    pub fn new(settings: SerialSettings, retry: RetryPolicy, fields: Arc<FieldRegistry>) -> Self {
        let frame_gap = frame_gap(settings.baud_rate);
        Self {
            settings,
            port: None,
            state: SessionState::Disconnected,
            backoff: Backoff::new(retry),
            frame_gap,
            fields,
            integrity: IntegrityMonitor::default(),
            stats: TransportStats::default(),
        }
    }

    pub fn with_integrity_window(mut self, window: usize) -> Self {
        self.integrity = IntegrityMonitor::new(window);
        self
    }

    #[inline]
    pub fn port_name(&self) -> &str {
        &self.settings.port
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Check that the device node exists and can be opened read/write.
    #[cfg(unix)]
    async fn check_access(&self) -> GatewayResult<()> {
        let path = &self.settings.port;
        match tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(
                GatewayError::connection(format!("Serial port {} access denied: {}", path, e)),
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(GatewayError::connection(
                format!("Serial port {} not found", path),
            )),
            Err(e) => Err(GatewayError::connection(format!(
                "Serial port {} not accessible: {}",
                path, e
            ))),
        }
    }

    #[cfg(not(unix))]
    async fn check_access(&self) -> GatewayResult<()> {
        Ok(())
    }

    fn open_port(&mut self) -> GatewayResult<()> {
        let builder = tokio_serial::new(&self.settings.port, self.settings.baud_rate)
            .data_bits(self.settings.tokio_data_bits()?)
            .stop_bits(self.settings.tokio_stop_bits()?)
            .parity(self.settings.tokio_parity())
            .timeout(self.settings.response_timeout());

        let port = SerialStream::open(&builder).map_err(|e| {
            GatewayError::connection(format!(
                "Failed to open serial port {}: {}",
                self.settings.port, e
            ))
        })?;

        self.port = Some(port);
        self.state = SessionState::Connected;
        self.backoff.reset();
        info!(
            "Serial port {} opened at {} baud",
            self.settings.port, self.settings.baud_rate
        );
        Ok(())
    }

    /// Reconnect with exponential backoff.
    ///
    /// The accessibility check runs once up front and fails fast; only the
    /// open itself is retried.
    pub async fn retry_connection(&mut self) -> GatewayResult<()> {
        self.backoff.reset();
        self.state = SessionState::Connecting;

        if let Err(e) = self.check_access().await {
            self.state = SessionState::Failed;
            warn!("{}", e);
            return Err(e);
        }

        loop {
            match self.open_port() {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() || self.backoff.exhausted() => {
                    self.state = SessionState::Failed;
                    warn!(
                        "Giving up on serial port {} after {} retries: {}",
                        self.settings.port,
                        self.backoff.attempt(),
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        "Serial port {} open failed ({}), retry {} in {:?}",
                        self.settings.port,
                        e,
                        self.backoff.attempt(),
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn ensure_connected(&mut self) -> GatewayResult<()> {
        if self.port.is_some() {
            return Ok(());
        }
        self.retry_connection().await
    }

    fn drop_port(&mut self, reason: &GatewayError) {
        if self.port.take().is_some() {
            warn!("Dropping serial port {}: {}", self.settings.port, reason);
        }
        self.state = SessionState::Disconnected;
    }

    /// Send one request frame and read the complete response.
    ///
    /// Any failure that may leave reply bytes on the line drops the handle.
    /// Exception replies are complete frames and keep the session.
    async fn transact(
        &mut self,
        request: Bytes,
        unit_id: u8,
        function_code: u8,
    ) -> GatewayResult<Bytes> {
        let response = match self.exchange(&request, unit_id).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.errors += 1;
                if e.kind() == ErrorKind::TimeoutError {
                    self.stats.timeouts += 1;
                }
                self.drop_port(&e);
                return Err(e);
            }
        };

        match frame::decode_response(unit_id, function_code, &response) {
            Ok(data) => Ok(data),
            Err(e) => {
                self.stats.errors += 1;
                if !matches!(e, GatewayError::Exception { .. }) {
                    self.drop_port(&e);
                }
                Err(e)
            }
        }
    }

    async fn exchange(&mut self, request: &[u8], unit_id: u8) -> GatewayResult<Vec<u8>> {
        let response_timeout = self.settings.response_timeout();
        let timeout_ms = self.settings.response_timeout_ms;
        let turnaround = self.settings.turnaround().max(self.frame_gap);

        tokio::time::sleep(turnaround).await;

        let port = self
            .port
            .as_mut()
            .ok_or_else(|| GatewayError::connection("Serial port not connected"))?;

        SerialPort::clear(&*port, ClearBuffer::Input).map_err(|e| {
            GatewayError::connection(format!("Failed to clear serial input: {}", e))
        })?;

        trace!("RTU send -> slave {}: {}", unit_id, hex_frame(request));
        match timeout(response_timeout, async {
            port.write_all(request).await?;
            port.flush().await
        })
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(GatewayError::connection(format!(
                    "Failed to send RTU frame: {}",
                    e
                )))
            }
            Err(_) => return Err(GatewayError::timeout("send request", timeout_ms)),
        }
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += request.len() as u64;

        let read = async {
            let mut response = vec![0u8; frame::RESPONSE_HEADER_LEN];
            port.read_exact(&mut response).await?;

            let total = frame::response_length(&response)?;
            if total > constants::MAX_RTU_FRAME_SIZE {
                return Err(GatewayError::protocol(format!(
                    "RTU frame too large: {} bytes",
                    total
                )));
            }
            response.resize(total, 0);
            port.read_exact(&mut response[frame::RESPONSE_HEADER_LEN..])
                .await?;
            Ok::<_, GatewayError>(response)
        };

        let response = match timeout(response_timeout, read).await {
            Ok(result) => result?,
            Err(_) => return Err(GatewayError::timeout("read response", timeout_ms)),
        };

        self.stats.responses_received += 1;
        self.stats.bytes_received += response.len() as u64;
        trace!("RTU recv <- slave {}: {}", unit_id, hex_frame(&response));

        Ok(response)
    }
}

impl Transport for RtuTransport {
    async fn connect(&mut self) -> GatewayResult<()> {
        if self.port.is_some() {
            return Ok(());
        }
        self.state = SessionState::Connecting;
        let result = match self.check_access().await {
            Ok(()) => self.open_port(),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            self.state = SessionState::Disconnected;
            warn!("Connect to {} failed: {}", self.settings.port, e);
        }
        result
    }

    async fn disconnect(&mut self) -> GatewayResult<()> {
        if self.port.take().is_some() {
            info!("Serial port {} closed", self.settings.port);
        }
        self.state = SessionState::Disconnected;
        self.integrity.reset();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn read_registers(
        &mut self,
        unit_id: u8,
        function_code: u8,
        address: u16,
        quantity: u16,
    ) -> GatewayResult<Vec<FieldValue>> {
        let request = frame::encode_read(unit_id, function_code, address, quantity)?;
        self.ensure_connected().await?;

        let data = self.transact(request, unit_id, function_code).await?;
        let words = if constants::is_bit_function(function_code) {
            frame::parse_bits(&data, quantity)?
        } else {
            frame::parse_registers(&data, quantity)?
        };

        let index = self.fields.index();
        let values = codec::decode_block(&index, function_code, address, &words);

        for (offset, value) in values.iter().enumerate() {
            let point = address.wrapping_add(offset as u16);
            if let Some(spec) = index.get(function_code, point) {
                self.integrity.observe(unit_id, spec, value);
            }
        }

        debug!(
            "RTU read slave {} fc 0x{:02X} @{} x{} -> {:?}",
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

        let index = self.fields.index();
        let spec = codec::write_target(&index, function_code, address);
        let raw = match codec::encode_field(spec, function_code, &value) {
            Encoded::Raw(raw) => raw,
            Encoded::ReadOnly => {
                let name = spec.map_or("unknown", |s| s.field_name.as_str());
                warn!(
                    "Rejected write of {} to read-only field {} (slave {}, address {})",
                    value, name, unit_id, address
                );
                return Err(GatewayError::validation(format!(
                    "Field {} at address {} is read-only",
                    name, address
                )));
            }
        };

        let request = frame::encode_write(unit_id, function_code, address, raw)?;
        self.ensure_connected().await?;

        let data = self.transact(request, unit_id, function_code).await?;
        frame::check_write_echo(address, &data)?;

        let written = codec::decode_field(spec, function_code, raw);
        debug!(
            "RTU write slave {} fc 0x{:02X} @{} = {} (raw {})",
            unit_id, function_code, address, written, raw
        );
        Ok(vec![written])
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_map::tests::spec;
    use crate::field_map::{DeviceType, FieldMap, ValueType};

    const MISSING_PORT: &str = "/dev/voltage-bms-gateway-missing-port";

    fn transport(port: &str) -> RtuTransport {
        let map = FieldMap::new(
            1,
            vec![spec("s", DeviceType::Sensor, "temperature", ValueType::Temperature, 3, 7)],
        );
        RtuTransport::new(
            SerialSettings::for_port(port),
            RetryPolicy::default(),
            Arc::new(FieldRegistry::new(map, None)),
        )
    }

    #[test]
    fn test_frame_gap() {
        // 9600 baud: 1145us per char, 3.5 chars = 4007us
        assert_eq!(frame_gap(9600), Duration::from_micros(4007));
        assert_eq!(frame_gap(115_200), Duration::from_micros(1750));
    }

    #[tokio::test]
    async fn test_connect_missing_port_is_connection_error() {
        let mut rtu = transport(MISSING_PORT);
        let err = rtu.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionError);
        assert!(!rtu.is_connected());
        assert_eq!(rtu.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_retry_connection_fails_fast_when_port_inaccessible() {
        let mut rtu = transport(MISSING_PORT);
        let started = std::time::Instant::now();
        let err = rtu.retry_connection().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionError);
        assert_eq!(rtu.state(), SessionState::Failed);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_read_only_write_rejected_before_bus() {
        let mut rtu = transport(MISSING_PORT);
        let err = rtu
            .write_register(1, constants::FC_WRITE_SINGLE_REGISTER, 7, FieldValue::Float(30.0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(rtu.stats().requests_sent, 0);
    }

    #[tokio::test]
    async fn test_invalid_read_rejected_before_bus() {
        let mut rtu = transport(MISSING_PORT);
        let err = rtu.read_registers(1, 3, 0, 200).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(rtu.state(), SessionState::Disconnected);
    }

    // ========================================================================
    // Scripted slave on a pty pair
    // ========================================================================

    use crate::frame::tests::with_crc;
    use tokio::task::JoinHandle;

    fn registry() -> Arc<FieldRegistry> {
        let map = FieldMap::new(
            1,
            vec![
                spec("s", DeviceType::AirConditioner, "setpoint", ValueType::Setpoint, 3, 7),
                spec("s", DeviceType::AirConditioner, "timer_hour", ValueType::Hour, 3, 8),
            ],
        );
        Arc::new(FieldRegistry::new(map, None))
    }

    /// Opens the slave end of a fresh pty as a session. The master end
    /// answers each 8-byte request with the next scripted reply (`None`
    /// stays silent) and returns the requests it saw.
    fn scripted_bus(
        replies: Vec<Option<Vec<u8>>>,
        turnaround_ms: u64,
        response_timeout_ms: u64,
    ) -> (RtuTransport, SerialStream, JoinHandle<(Vec<Vec<u8>>, SerialStream)>) {
        let (mut master, slave) = SerialStream::pair().unwrap();
        let path = slave.name().unwrap();
        let settings = SerialSettings::for_port(path)
            .with_turnaround_ms(turnaround_ms)
            .with_response_timeout_ms(response_timeout_ms);
        let rtu = RtuTransport::new(settings, RetryPolicy::default(), registry());

        let script = tokio::spawn(async move {
            let mut requests = Vec::new();
            for reply in replies {
                let mut request = [0u8; 8];
                master.read_exact(&mut request).await.unwrap();
                requests.push(request.to_vec());
                if let Some(reply) = reply {
                    master.write_all(&reply).await.unwrap();
                    master.flush().await.unwrap();
                }
            }
            // Keep the master open: dropping it hangs up the slave side.
            (requests, master)
        });

        (rtu, slave, script)
    }

    fn answer_42() -> Vec<u8> {
        with_crc(&[0x01, 0x03, 0x02, 0x00, 0x2A])
    }

    #[tokio::test]
    async fn test_read_decodes_through_codec() {
        let reply = with_crc(&[0x01, 0x03, 0x04, 0x00, 0xDB, 0x00, 0x0F]);
        let (mut rtu, _slave, script) = scripted_bus(vec![Some(reply)], 0, 500);

        let values = rtu.read_registers(1, 3, 7, 2).await.unwrap();
        assert_eq!(values, vec![FieldValue::Float(21.9), FieldValue::Int(15)]);
        assert!(rtu.is_connected());
        assert_eq!(rtu.state(), SessionState::Connected);

        let (requests, _master) = script.await.unwrap();
        assert_eq!(requests[0], with_crc(&[0x01, 0x03, 0x00, 0x07, 0x00, 0x02]));

        let stats = rtu.stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.responses_received, 1);
        assert_eq!(stats.bytes_received, 9);
    }

    #[tokio::test]
    async fn test_write_clamps_and_checks_echo() {
        let request = with_crc(&[0x01, 0x06, 0x00, 0x08, 0x00, 0x17]);
        let wrong_address = with_crc(&[0x01, 0x06, 0x00, 0x09, 0x00, 0x17]);
        let (mut rtu, _slave, script) =
            scripted_bus(vec![Some(request.clone()), Some(wrong_address)], 0, 500);

        let written = rtu
            .write_register(1, constants::FC_WRITE_SINGLE_REGISTER, 8, FieldValue::Int(30))
            .await
            .unwrap();
        assert_eq!(written, vec![FieldValue::Int(23)]);

        let err = rtu
            .write_register(1, constants::FC_WRITE_SINGLE_REGISTER, 8, FieldValue::Int(30))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);

        let (requests, _master) = script.await.unwrap();
        assert_eq!(requests, vec![request.clone(), request]);
    }

    #[tokio::test]
    async fn test_exception_reply_classified_and_session_kept() {
        let exception = with_crc(&[0x01, 0x83, 0x02]);
        let (mut rtu, _slave, script) =
            scripted_bus(vec![Some(exception), Some(answer_42())], 0, 500);

        let err = rtu.read_registers(1, 3, 0, 1).await.unwrap_err();
        assert!(matches!(err, GatewayError::Exception { code: 0x02, .. }));
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert!(rtu.is_connected());

        assert_eq!(rtu.read_registers(1, 3, 0, 1).await.unwrap(), vec![FieldValue::Int(42)]);
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_drops_handle_and_reconnects() {
        let (mut rtu, _slave, script) = scripted_bus(vec![None, Some(answer_42())], 0, 100);

        let err = rtu.read_registers(1, 3, 0, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimeoutError);
        assert!(!rtu.is_connected());
        assert_eq!(rtu.state(), SessionState::Disconnected);
        assert_eq!(rtu.stats().timeouts, 1);

        assert_eq!(rtu.read_registers(1, 3, 0, 1).await.unwrap(), vec![FieldValue::Int(42)]);
        assert!(rtu.is_connected());
        assert_eq!(script.await.unwrap().0.len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_reply_does_not_leak_into_next_read() {
        let garbage = vec![0x01, 0x2B, 0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE];
        let (mut rtu, _slave, script) =
            scripted_bus(vec![Some(garbage), Some(answer_42())], 0, 500);

        let err = rtu.read_registers(1, 3, 0, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert!(!rtu.is_connected());

        assert_eq!(rtu.read_registers(1, 3, 0, 1).await.unwrap(), vec![FieldValue::Int(42)]);
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_turnaround_applied_per_transaction() {
        let (mut rtu, _slave, script) = scripted_bus(vec![Some(answer_42())], 70, 500);

        let started = std::time::Instant::now();
        rtu.read_registers(1, 3, 0, 1).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(70));
        assert!(elapsed < Duration::from_secs(2));
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_backs_off_when_open_fails() {
        // a regular file passes the access check but is not a tty
        let file = tempfile::NamedTempFile::new().unwrap();
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            multiplier: 2.0,
            jitter: false,
        };
        let mut rtu = RtuTransport::new(
            SerialSettings::for_port(file.path().to_string_lossy()),
            policy,
            registry(),
        );

        let started = std::time::Instant::now();
        let err = rtu.retry_connection().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConnectionError);
        assert_eq!(rtu.state(), SessionState::Failed);
        assert_eq!(rtu.backoff.attempt(), 2);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut rtu = transport(MISSING_PORT);
        rtu.disconnect().await.unwrap();
        rtu.disconnect().await.unwrap();
        assert!(!rtu.is_connected());
    }
}
