//! # Gateway Facade
//!
//! Entry point used by upper layers (REST handlers, schedulers, alarm
//! services). It wires the field registry, router and command queue together
//! and turns every call into a queued command.
//!
//! ```rust,no_run
//! use voltage_bms_gateway::{FieldMap, Gateway, GatewayConfig, GatewayResult, Priority};
//!
//! #[tokio::main]
//! async fn main() -> GatewayResult<()> {
//!     let gateway = Gateway::new(GatewayConfig::default(), FieldMap::default());
//!     gateway.connect().await?;
//!
//!     let result = gateway.write_with_priority(1, 6, 1, true, Priority::High).await;
//!     println!("{}", serde_json::to_string(&result).unwrap_or_default());
//!
//!     let temps = gateway.read(1, 3, 0, 4).await;
//!     println!("{:?}", temps.values());
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{BackendMode, GatewayConfig};
use crate::error::GatewayResult;
use crate::field_map::{FieldMap, FieldRegistry};
use crate::queue::{
    CommandQueue, CompletionHandle, Operation, Priority, QueueSnapshot, QueueStats,
    TransactionResult,
};
use crate::router::{Backend, Router};
use crate::transport::FaultInjector;
use crate::value::FieldValue;

/// Persistence hook invoked after every successful read.
///
/// Runs detached from the caller; failures are logged and otherwise
/// ignored.
#[async_trait]
pub trait ReadSink: Send + Sync {
    async fn record(
        &self,
        unit_id: u8,
        function_code: u8,
        address: u16,
        values: &[FieldValue],
    ) -> GatewayResult<()>;
}

/// Orchestration facade over the queue and transports.
pub struct Gateway {
    config: GatewayConfig,
    fields: Arc<FieldRegistry>,
    router: Arc<Router>,
    queue: CommandQueue<Router>,
    sink: Option<Arc<dyn ReadSink>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, field_map: FieldMap) -> Self {
        let fields = Arc::new(FieldRegistry::new(field_map, config.site.clone()));
        let router = Arc::new(Router::new(&config, Arc::clone(&fields)));
        let queue = CommandQueue::new(Arc::clone(&router));

        Self {
            config,
            fields,
            router,
            queue,
            sink: None,
        }
    }

    /// Build from configuration, loading the field map file if one is set.
    pub fn from_config(config: GatewayConfig) -> GatewayResult<Self> {
        let field_map = match &config.field_map {
            Some(path) => FieldMap::from_file(path)?,
            None => FieldMap::default(),
        };
        Ok(Self::new(config, field_map))
    }

    pub fn with_read_sink(mut self, sink: Arc<dyn ReadSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Bring up the backend chosen by the configured mode.
    ///
    /// `Real` propagates connection failures. `Auto` falls back to the
    /// simulator with a warning. Returns the backend that ended up active.
    pub async fn connect(&self) -> GatewayResult<Backend> {
        match self.config.mode {
            BackendMode::Simulated => {
                self.force_mock_mode().await?;
            }
            BackendMode::Real => {
                self.router.set_active_backend(Backend::Real);
                self.router.connect().await?;
            }
            BackendMode::Auto => {
                self.router.set_active_backend(Backend::Real);
                if let Err(e) = self.router.connect().await {
                    warn!("Real hardware unavailable ({}), falling back to simulation", e);
                    self.force_mock_mode().await?;
                }
            }
        }

        let backend = self.router.active_backend();
        info!("Gateway connected using {} backend", backend);
        Ok(backend)
    }

    pub async fn disconnect(&self) -> GatewayResult<()> {
        self.router.disconnect().await?;
        info!("Gateway disconnected");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.router.is_connected().await
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Read at normal priority.
    pub async fn read(
        &self,
        unit_id: u8,
        function_code: u8,
        address: u16,
        quantity: u16,
    ) -> TransactionResult {
        self.read_with_priority(unit_id, function_code, address, quantity, Priority::Normal)
            .await
    }

    pub async fn read_with_priority(
        &self,
        unit_id: u8,
        function_code: u8,
        address: u16,
        quantity: u16,
        priority: Priority,
    ) -> TransactionResult {
        let handle = self.queue.submit(
            Operation::Read { quantity },
            unit_id,
            function_code,
            address,
            priority,
        );
        let result = settle(handle.await);

        if result.success {
            self.notify_sink(unit_id, function_code, address, result.values());
        }
        result
    }

    /// Write at high priority.
    pub async fn write<V: Into<FieldValue>>(
        &self,
        unit_id: u8,
        function_code: u8,
        address: u16,
        value: V,
    ) -> TransactionResult {
        self.write_with_priority(unit_id, function_code, address, value, Priority::High)
            .await
    }

    pub async fn write_with_priority<V: Into<FieldValue>>(
        &self,
        unit_id: u8,
        function_code: u8,
        address: u16,
        value: V,
        priority: Priority,
    ) -> TransactionResult {
        let handle = self.queue.submit(
            Operation::Write {
                value: value.into(),
            },
            unit_id,
            function_code,
            address,
            priority,
        );
        settle(handle.await)
    }

    /// Queue a command without waiting for it.
    pub fn submit(
        &self,
        operation: Operation,
        unit_id: u8,
        function_code: u8,
        address: u16,
        priority: Priority,
    ) -> CompletionHandle {
        self.queue
            .submit(operation, unit_id, function_code, address, priority)
    }

    fn notify_sink(&self, unit_id: u8, function_code: u8, address: u16, values: &[FieldValue]) {
        let Some(sink) = self.sink.as_ref().map(Arc::clone) else {
            return;
        };
        let values = values.to_vec();
        tokio::spawn(async move {
            if let Err(e) = sink.record(unit_id, function_code, address, &values).await {
                warn!(
                    "Read sink failed for slave {} fc 0x{:02X} @{}: {}",
                    unit_id, function_code, address, e
                );
            }
        });
    }

    // ========================================================================
    // Runtime control
    // ========================================================================

    /// Route all further commands to the simulator.
    pub async fn force_mock_mode(&self) -> GatewayResult<()> {
        self.router.set_active_backend(Backend::Simulated);
        self.router.connect().await
    }

    /// Route all further commands to real hardware.
    ///
    /// On failure the previous backend is restored and the error returned.
    pub async fn switch_to_real_mode(&self) -> GatewayResult<()> {
        let previous = self.router.active_backend();
        self.router.set_active_backend(Backend::Real);
        if let Err(e) = self.router.connect().await {
            warn!("Switch to real hardware failed: {}", e);
            self.router.set_active_backend(previous);
            return Err(e);
        }
        Ok(())
    }

    pub fn set_active_backend(&self, backend: Backend) {
        self.router.set_active_backend(backend);
    }

    pub fn active_backend(&self) -> Backend {
        self.router.active_backend()
    }

    pub async fn set_active_port(&self, port: &str) {
        self.router.set_active_port(port).await;
    }

    pub fn queue_status(&self) -> QueueSnapshot {
        self.queue.snapshot()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn clear_queue(&self) -> usize {
        self.queue.clear()
    }

    /// Handle for flipping simulator faults at runtime.
    pub fn fault_injector(&self) -> FaultInjector {
        self.router.faults().clone()
    }

    pub fn invalidate_field_index(&self) {
        self.fields.invalidate();
    }

    pub fn replace_field_map(&self, field_map: FieldMap) {
        self.fields.replace_map(field_map);
    }

    pub fn field_registry(&self) -> &Arc<FieldRegistry> {
        &self.fields
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }
}

fn settle(outcome: GatewayResult<TransactionResult>) -> TransactionResult {
    outcome.unwrap_or_else(|e| TransactionResult::failure(&e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SerialSettings, SimulationSettings};
    use crate::error::{ErrorKind, GatewayError};
    use crate::field_map::tests::spec;
    use crate::field_map::{DeviceType, ValueType};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const MISSING_PORT: &str = "/dev/voltage-bms-gateway-missing-port";

    fn config(mode: BackendMode) -> GatewayConfig {
        GatewayConfig::default()
            .with_mode(mode)
            .with_serial(SerialSettings::for_port(MISSING_PORT))
            .with_simulation(SimulationSettings {
                latency_ms: 5,
                seed: Some(11),
                ..SimulationSettings::default()
            })
    }

    fn field_map() -> FieldMap {
        FieldMap::new(
            1,
            vec![
                spec("s", DeviceType::Sensor, "temperature", ValueType::Temperature, 3, 20),
                spec("s", DeviceType::AirConditioner, "hour", ValueType::Hour, 3, 21),
            ],
        )
    }

    struct ChannelSink(mpsc::UnboundedSender<Vec<FieldValue>>);

    #[async_trait]
    impl ReadSink for ChannelSink {
        async fn record(&self, _: u8, _: u8, _: u16, values: &[FieldValue]) -> GatewayResult<()> {
            let _ = self.0.send(values.to_vec());
            Err(GatewayError::unknown("storage offline"))
        }
    }

    #[tokio::test]
    async fn test_real_mode_propagates_connect_failure() {
        let gateway = Gateway::new(config(BackendMode::Real), field_map());
        let err = gateway.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionError);
        assert_eq!(gateway.active_backend(), Backend::Real);
    }

    #[tokio::test]
    async fn test_auto_mode_falls_back_to_simulation() {
        let gateway = Gateway::new(config(BackendMode::Auto), field_map());
        assert_eq!(gateway.connect().await.unwrap(), Backend::Simulated);
        assert!(gateway.is_connected().await);
    }

    #[tokio::test]
    async fn test_switch_to_real_reverts_on_failure() {
        let gateway = Gateway::new(config(BackendMode::Simulated), field_map());
        gateway.connect().await.unwrap();

        assert!(gateway.switch_to_real_mode().await.is_err());
        assert_eq!(gateway.active_backend(), Backend::Simulated);

        let result = gateway.read(1, 3, 20, 2).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_failures_become_unsuccessful_results() {
        let gateway = Gateway::new(config(BackendMode::Real), field_map());
        let result = gateway.read(1, 3, 20, 1).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ConnectionError));
        assert!(result.error.is_some());

        gateway.force_mock_mode().await.unwrap();
        let result = gateway.read(1, 3, 0, 500).await;
        assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));

        let result = gateway.write(1, 6, 20, 30.0).await;
        assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));
    }

    #[tokio::test]
    async fn test_write_applies_codec() {
        let gateway = Gateway::new(config(BackendMode::Simulated), field_map());
        gateway.connect().await.unwrap();
        let result = gateway.write(1, 6, 21, 30).await;
        assert!(result.success);
        assert_eq!(result.values(), &[FieldValue::Int(23)]);
    }

    #[tokio::test]
    async fn test_read_sink_invoked_and_failure_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gateway = Gateway::new(config(BackendMode::Simulated), field_map())
            .with_read_sink(Arc::new(ChannelSink(tx)));
        gateway.connect().await.unwrap();

        let result = gateway.read(1, 3, 20, 2).await;
        assert!(result.success);

        let recorded = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recorded, result.values());

        // writes do not reach the sink
        assert!(gateway.write(1, 6, 21, 5).await.success);
        assert!(tokio::time::timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_invalidate_picks_up_replaced_map() {
        let gateway = Gateway::new(config(BackendMode::Simulated), FieldMap::default());
        gateway.connect().await.unwrap();

        gateway.replace_field_map(field_map());
        gateway.invalidate_field_index();
        let result = gateway.read(1, 3, 20, 1).await;
        let temperature = result.values()[0].as_f64();
        assert!(matches!(result.values()[0], FieldValue::Float(_)));
        assert!((18.0..=28.0).contains(&temperature));
    }
}
