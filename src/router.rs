//! Transport router
//!
//! Owns every backend and sends each transaction to the active one. Real
//! port sessions live in a small arena keyed by serial path; the default
//! port's session is created up front, others on first use. One simulated
//! transport is shared by all callers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backoff::RetryPolicy;
use crate::config::{BackendMode, GatewayConfig, SerialSettings};
use crate::error::GatewayResult;
use crate::field_map::FieldRegistry;
use crate::queue::{Operation, Transaction, TransactionExecutor};
use crate::transport::{
    FaultInjector, RtuTransport, SimulatedTransport, Transport, TransportStats,
};
use crate::value::FieldValue;

/// Backend selected for new transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Real,
    Simulated,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Real => f.write_str("real"),
            Backend::Simulated => f.write_str("simulated"),
        }
    }
}

/// Port sessions indexed by serial path.
struct SessionRegistry {
    sessions: Vec<RtuTransport>,
    by_port: HashMap<String, usize>,
}

impl SessionRegistry {
    fn new() -> Self {
        Self {
            sessions: Vec::new(),
            by_port: HashMap::new(),
        }
    }

    fn get_or_create<F>(&mut self, port: &str, create: F) -> &mut RtuTransport
    where
        F: FnOnce() -> RtuTransport,
    {
        let index = match self.by_port.get(port) {
            Some(&index) => index,
            None => {
                debug!("Creating port session for {}", port);
                self.sessions.push(create());
                let index = self.sessions.len() - 1;
                self.by_port.insert(port.to_string(), index);
                index
            }
        };
        &mut self.sessions[index]
    }

    fn contains(&self, port: &str) -> bool {
        self.by_port.contains_key(port)
    }
}

/// Dispatches transactions to the real or simulated backend.
pub struct Router {
    backend: RwLock<Backend>,
    active_port: RwLock<String>,
    serial: SerialSettings,
    retry: RetryPolicy,
    integrity_window: usize,
    fields: Arc<FieldRegistry>,
    sessions: Mutex<SessionRegistry>,
    simulated: Mutex<SimulatedTransport>,
    faults: FaultInjector,
}

impl Router {
    pub fn new(config: &GatewayConfig, fields: Arc<FieldRegistry>) -> Self {
        let faults = FaultInjector::new();
        let simulated =
            SimulatedTransport::new(&config.simulation, Arc::clone(&fields), faults.clone());
        let retry = RetryPolicy::from(&config.retry);

        let mut sessions = SessionRegistry::new();
        sessions.get_or_create(&config.serial.port, || {
            RtuTransport::new(config.serial.clone(), retry.clone(), Arc::clone(&fields))
                .with_integrity_window(config.integrity_window)
        });

        let backend = match config.mode {
            BackendMode::Simulated => Backend::Simulated,
            BackendMode::Real | BackendMode::Auto => Backend::Real,
        };

        Self {
            backend: RwLock::new(backend),
            active_port: RwLock::new(config.serial.port.clone()),
            serial: config.serial.clone(),
            retry,
            integrity_window: config.integrity_window,
            fields,
            sessions: Mutex::new(sessions),
            simulated: Mutex::new(simulated),
            faults,
        }
    }

    #[inline]
    pub fn active_backend(&self) -> Backend {
        *self.backend.read()
    }

    pub fn set_active_backend(&self, backend: Backend) {
        let previous = std::mem::replace(&mut *self.backend.write(), backend);
        if previous != backend {
            info!("Active backend switched: {} -> {}", previous, backend);
        }
    }

    pub fn active_port(&self) -> String {
        self.active_port.read().clone()
    }

    /// Route real-backend traffic to `port`, creating its session if needed.
    pub async fn set_active_port(&self, port: &str) {
        {
            let mut sessions = self.sessions.lock().await;
            if !sessions.contains(port) {
                let settings = SerialSettings {
                    port: port.to_string(),
                    ..self.serial.clone()
                };
                sessions.get_or_create(port, || self.new_session(settings));
            }
        }
        let previous = std::mem::replace(&mut *self.active_port.write(), port.to_string());
        if previous != port {
            info!("Active serial port switched: {} -> {}", previous, port);
        }
    }

    fn new_session(&self, settings: SerialSettings) -> RtuTransport {
        RtuTransport::new(settings, self.retry.clone(), Arc::clone(&self.fields))
            .with_integrity_window(self.integrity_window)
    }

    #[inline]
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Bring up the active backend.
    ///
    /// The real backend goes through the session's retry cycle.
    pub async fn connect(&self) -> GatewayResult<()> {
        match self.active_backend() {
            Backend::Real => {
                let port = self.active_port();
                let mut sessions = self.sessions.lock().await;
                let settings = SerialSettings {
                    port: port.clone(),
                    ..self.serial.clone()
                };
                let session = sessions.get_or_create(&port, || self.new_session(settings));
                if session.is_connected() {
                    return Ok(());
                }
                session.retry_connection().await
            }
            Backend::Simulated => self.simulated.lock().await.connect().await,
        }
    }

    /// Close every real session and the simulator.
    pub async fn disconnect(&self) -> GatewayResult<()> {
        {
            let mut sessions = self.sessions.lock().await;
            for session in sessions.sessions.iter_mut() {
                session.disconnect().await?;
            }
        }
        self.simulated.lock().await.disconnect().await
    }

    /// Whether the active backend is connected.
    pub async fn is_connected(&self) -> bool {
        match self.active_backend() {
            Backend::Real => {
                let port = self.active_port();
                let sessions = self.sessions.lock().await;
                sessions
                    .by_port
                    .get(&port)
                    .is_some_and(|&index| sessions.sessions[index].is_connected())
            }
            Backend::Simulated => self.simulated.lock().await.is_connected(),
        }
    }

    /// Run one transaction on the active backend.
    pub async fn execute_one(&self, transaction: &Transaction) -> GatewayResult<Vec<FieldValue>> {
        match self.active_backend() {
            Backend::Real => {
                let port = self.active_port();
                let mut sessions = self.sessions.lock().await;
                let settings = SerialSettings {
                    port: port.clone(),
                    ..self.serial.clone()
                };
                let session = sessions.get_or_create(&port, || self.new_session(settings));
                run(session, transaction).await
            }
            Backend::Simulated => {
                let mut simulated = self.simulated.lock().await;
                run(&mut *simulated, transaction).await
            }
        }
    }

    /// Traffic counters for every real session, keyed by port.
    pub async fn session_stats(&self) -> HashMap<String, TransportStats> {
        let sessions = self.sessions.lock().await;
        sessions
            .by_port
            .iter()
            .map(|(port, &index)| (port.clone(), sessions.sessions[index].stats()))
            .collect()
    }

    pub async fn simulated_stats(&self) -> TransportStats {
        self.simulated.lock().await.stats()
    }
}

async fn run<T: Transport>(
    transport: &mut T,
    transaction: &Transaction,
) -> GatewayResult<Vec<FieldValue>> {
    match transaction.operation {
        Operation::Read { quantity } => {
            transport
                .read_registers(
                    transaction.unit_id,
                    transaction.function_code,
                    transaction.address,
                    quantity,
                )
                .await
        }
        Operation::Write { value } => {
            transport
                .write_register(
                    transaction.unit_id,
                    transaction.function_code,
                    transaction.address,
                    value,
                )
                .await
        }
    }
}

impl TransactionExecutor for Router {
    async fn execute(&self, transaction: Transaction) -> GatewayResult<Vec<FieldValue>> {
        self.execute_one(&transaction).await
    }
}
