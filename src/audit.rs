//! Fire-and-forget statement auditing on a dedicated thread

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use shardbridge_core::{Result, ShardBridgeError, Value};

/// Default number of audit records waiting for the audit thread
pub const DEFAULT_AUDIT_QUEUE: usize = 1024;

/// Receives every statement issued through a session
pub trait SqlAuditor: Send + Sync {
    fn audit(&self, statement: &str, statement_text: Option<&str>, parameter: &Value) -> Result<()>;
}

struct AuditRecord {
    statement: String,
    statement_text: Option<String>,
    parameter: Value,
}

/// Hands audit records to a single background thread.
///
/// Submission never blocks; a record that does not fit in the queue is dropped
/// with a warning.
pub struct AuditDispatcher {
    sender: Mutex<Option<Sender<AuditRecord>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AuditDispatcher {
    pub fn new(auditor: Arc<dyn SqlAuditor>, capacity: usize) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));

        let handle = thread::Builder::new()
            .name("shardbridge-audit".into())
            .spawn(move || audit_loop(auditor, receiver))
            .map_err(|e| {
                ShardBridgeError::internal(format!("Failed to spawn audit thread: {}", e))
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn submit(&self, statement: &str, statement_text: Option<String>, parameter: &Value) {
        let sender = match self.sender.lock().clone() {
            Some(sender) => sender,
            None => return,
        };

        let record = AuditRecord {
            statement: statement.to_string(),
            statement_text,
            parameter: parameter.clone(),
        };
        match sender.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                tracing::warn!("Audit queue full, dropping record for '{}'", record.statement);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Close the queue and wait up to `timeout` for pending records
    pub fn shutdown(&self, timeout: Duration) -> bool {
        drop(self.sender.lock().take());

        let handle = match self.handle.lock().take() {
            Some(handle) => handle,
            None => return true,
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!("Audit thread still busy after {:?}", timeout);
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        handle.join().is_ok()
    }
}

impl Drop for AuditDispatcher {
    fn drop(&mut self) {
        self.sender.get_mut().take();
    }
}

fn audit_loop(auditor: Arc<dyn SqlAuditor>, receiver: Receiver<AuditRecord>) {
    for record in receiver.iter() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            auditor.audit(&record.statement, record.statement_text.as_deref(), &record.parameter)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Auditing '{}' failed: {}", record.statement, e),
            Err(_) => tracing::warn!("Auditor panicked on '{}'", record.statement),
        }
    }
}
