//! # Central Command Queue
//!
//! Every bus transaction in the process goes through one [`CommandQueue`].
//! RS-485 is half-duplex with a single master, so the queue guarantees that
//! at most one transaction is executing at any instant.
//!
//! ## Ordering
//!
//! | Lane | Typical use | Served |
//! |------|-------------|--------|
//! | high | operator writes | first |
//! | normal | on-demand reads | when high is empty |
//! | low | background polling | when high and normal are empty |
//!
//! Lanes are FIFO and priority is strict, with no aging. A steady stream of
//! high-priority commands therefore starves the lower lanes.
//!
//! ## Scheduling
//!
//! [`CommandQueue::submit`] never runs a command itself. When the queue is
//! idle it spawns a drain task, which first runs after the submitter yields,
//! so a burst of submissions coalesces into one pass. The drain pops one
//! command at a time, runs it in its own task, settles its handle and yields
//! before the next one. A failing or panicking command only rejects its own
//! handle.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, GatewayError, GatewayResult};
use crate::value::FieldValue;

// ============================================================================
// Command Types
// ============================================================================

/// Command priority lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// What a transaction does
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Operation {
    Read { quantity: u16 },
    Write { value: FieldValue },
}

/// Immutable description of one admitted command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: u64,
    pub unit_id: u8,
    pub function_code: u8,
    pub address: u16,
    pub operation: Operation,
    pub priority: Priority,
    pub submitted_at: DateTime<Utc>,
}

/// Outcome reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<FieldValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
}

impl TransactionResult {
    pub fn success(data: Vec<FieldValue>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(error: &GatewayError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            timestamp: Utc::now(),
        }
    }

    /// Decoded values, empty on failure.
    pub fn values(&self) -> &[FieldValue] {
        self.data.as_deref().unwrap_or(&[])
    }
}

/// Runs one transaction against the bus.
pub trait TransactionExecutor: Send + Sync + 'static {
    fn execute(
        &self,
        transaction: Transaction,
    ) -> impl Future<Output = GatewayResult<Vec<FieldValue>>> + Send;
}

type Responder = oneshot::Sender<GatewayResult<TransactionResult>>;

struct Command {
    transaction: Transaction,
    responder: Responder,
}

/// Resolves once the queue has settled the command.
///
/// Settles exactly once: with a [`TransactionResult`] on success, or with the
/// classified error. Commands removed by [`CommandQueue::clear`] settle with
/// [`GatewayError::Discarded`].
#[derive(Debug)]
pub struct CompletionHandle {
    id: u64,
    receiver: oneshot::Receiver<GatewayResult<TransactionResult>>,
}

impl CompletionHandle {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for CompletionHandle {
    type Output = GatewayResult<TransactionResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(GatewayError::Discarded { id })))
    }
}

// ============================================================================
// Introspection
// ============================================================================

/// Point-in-time view of the lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub high_priority: usize,
    pub normal_priority: usize,
    pub low_priority: usize,
    pub is_processing: bool,
    pub total_commands: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub submitted: u64,
    pub executed: u64,
    pub failed: u64,
    pub discarded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    next_id: AtomicU64,
    submitted: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Default)]
struct Lanes {
    high: VecDeque<Command>,
    normal: VecDeque<Command>,
    low: VecDeque<Command>,
    processing: bool,
}

impl Lanes {
    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<Command> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }

    fn pop(&mut self) -> Option<Command> {
        self.high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front())
    }

    fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }
}

// ============================================================================
// Queue
// ============================================================================

struct Inner<E> {
    executor: Arc<E>,
    lanes: Mutex<Lanes>,
    counters: Counters,
}

/// Process-wide serialising queue in front of a [`TransactionExecutor`].
///
/// Cloning yields another handle to the same queue.
pub struct CommandQueue<E: TransactionExecutor> {
    inner: Arc<Inner<E>>,
}

impl<E: TransactionExecutor> Clone for CommandQueue<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: TransactionExecutor> CommandQueue<E> {
    pub fn new(executor: Arc<E>) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                lanes: Mutex::new(Lanes::default()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn executor(&self) -> &Arc<E> {
        &self.inner.executor
    }

    /// Admit a command and return its completion handle.
    ///
    /// Never waits. Must be called from within a Tokio runtime.
    pub fn submit(
        &self,
        operation: Operation,
        unit_id: u8,
        function_code: u8,
        address: u16,
        priority: Priority,
    ) -> CompletionHandle {
        let id = self.inner.counters.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (responder, receiver) = oneshot::channel();
        let transaction = Transaction {
            id,
            unit_id,
            function_code,
            address,
            operation,
            priority,
            submitted_at: Utc::now(),
        };

        debug!(
            "Queued command {} ({:?}) slave {} fc 0x{:02X} @{} {:?}",
            id, priority, unit_id, function_code, address, operation
        );

        let start_drain = {
            let mut lanes = self.inner.lanes.lock();
            lanes.lane_mut(priority).push_back(Command {
                transaction,
                responder,
            });
            !std::mem::replace(&mut lanes.processing, true)
        };
        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);

        if start_drain {
            tokio::spawn(Self::drain(Arc::clone(&self.inner)));
        }

        CompletionHandle { id, receiver }
    }

    /// Execute every queued command in priority order, then go idle.
    async fn drain(inner: Arc<Inner<E>>) {
        debug!("Drain pass started");
        loop {
            let next = {
                let mut lanes = inner.lanes.lock();
                let next = lanes.pop();
                if next.is_none() {
                    lanes.processing = false;
                }
                next
            };
            let Some(Command {
                transaction,
                responder,
            }) = next
            else {
                break;
            };

            let id = transaction.id;
            let executor = Arc::clone(&inner.executor);
            let joined = tokio::spawn(async move { executor.execute(transaction).await }).await;

            let outcome = match joined {
                Ok(Ok(data)) => {
                    inner.counters.executed.fetch_add(1, Ordering::Relaxed);
                    Ok(TransactionResult::success(data))
                }
                Ok(Err(e)) => {
                    inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                    debug!("Command {} failed: {}", id, e);
                    Err(e)
                }
                Err(join_error) => {
                    inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("Command {} aborted: {}", id, join_error);
                    Err(GatewayError::unknown(format!(
                        "Command {} aborted: {}",
                        id, join_error
                    )))
                }
            };

            if responder.send(outcome).is_err() {
                debug!("Command {} settled after its handle was dropped", id);
            }

            tokio::task::yield_now().await;
        }
        debug!("Drain pass finished");
    }

    /// Non-blocking view of the lanes.
    pub fn snapshot(&self) -> QueueSnapshot {
        let lanes = self.inner.lanes.lock();
        QueueSnapshot {
            high_priority: lanes.high.len(),
            normal_priority: lanes.normal.len(),
            low_priority: lanes.low.len(),
            is_processing: lanes.processing,
            total_commands: lanes.len(),
        }
    }

    /// Discard every pending command.
    ///
    /// The in-flight command, if any, still completes. Discarded handles
    /// settle with [`GatewayError::Discarded`]. Returns the number removed.
    pub fn clear(&self) -> usize {
        let pending: Vec<Command> = {
            let mut lanes = self.inner.lanes.lock();
            let mut pending = Vec::with_capacity(lanes.len());
            pending.extend(lanes.high.drain(..));
            pending.extend(lanes.normal.drain(..));
            pending.extend(lanes.low.drain(..));
            pending
        };

        let count = pending.len();
        for command in pending {
            let id = command.transaction.id;
            let _ = command.responder.send(Err(GatewayError::Discarded { id }));
        }

        if count > 0 {
            self.inner
                .counters
                .discarded
                .fetch_add(count as u64, Ordering::Relaxed);
            info!("Cleared {} pending commands", count);
        }
        count
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.inner.counters;
        QueueStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            executed: c.executed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
        }
    }
}
