//! Mock stations for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::{LeadRecord, PipelineContext};
use crate::errors::StationError;
use crate::stations::{Station, StationContract, StationOutput};

#[derive(Debug, Clone)]
enum Behavior {
    Return(StationOutput),
    Error(String),
    Panic(String),
}

/// A station that records its calls and does whatever it is told.
#[derive(Debug)]
pub struct MockStation {
    contract: StationContract,
    behavior: Mutex<Behavior>,
    delay: Option<Duration>,
    timeout: Option<Duration>,
    timeout_is_fatal: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<LeadRecord>>,
}

impl MockStation {
    /// Creates a mock that continues without writing anything.
    #[must_use]
    pub fn new(contract: StationContract) -> Self {
        Self {
            contract,
            behavior: Mutex::new(Behavior::Return(StationOutput::proceed_empty())),
            delay: None,
            timeout: None,
            timeout_is_fatal: true,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Returns `output` from every call.
    #[must_use]
    pub fn returning(self, output: StationOutput) -> Self {
        *self.behavior.lock() = Behavior::Return(output);
        self
    }

    /// Fails every call with an execution error.
    #[must_use]
    pub fn erroring(self, reason: impl Into<String>) -> Self {
        *self.behavior.lock() = Behavior::Error(reason.into());
        self
    }

    /// Panics on every call.
    #[must_use]
    pub fn panicking(self, message: impl Into<String>) -> Self {
        *self.behavior.lock() = Behavior::Panic(message.into());
        self
    }

    /// Sleeps before answering.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sets the station's own timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Lets the route continue when this station times out.
    #[must_use]
    pub const fn non_fatal_timeout(mut self) -> Self {
        self.timeout_is_fatal = false;
        self
    }

    /// Changes the output of later calls.
    pub fn set_output(&self, output: StationOutput) {
        *self.behavior.lock() = Behavior::Return(output);
    }

    /// Number of times `process` was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The lead as seen by each call.
    #[must_use]
    pub fn seen_records(&self) -> Vec<LeadRecord> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Station for MockStation {
    fn contract(&self) -> &StationContract {
        &self.contract
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn timeout_is_fatal(&self) -> bool {
        self.timeout_is_fatal
    }

    async fn process(&self, ctx: &PipelineContext) -> Result<StationOutput, StationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(ctx.data().clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.behavior.lock().clone();
        match behavior {
            Behavior::Return(output) => Ok(output),
            Behavior::Error(reason) => Err(StationError::execution(&self.contract.name, reason)),
            Behavior::Panic(message) => panic!("{message}"),
        }
    }
}
