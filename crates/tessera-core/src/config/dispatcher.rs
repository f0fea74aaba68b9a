use crate::error::{Result, TesseraError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the notification dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Number of worker loops sharing the queue
    /// Default: available parallelism
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the bounded notification queue
    /// Default: 1000
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Delay applied by a re-queue before the notification may run again
    /// Default: 50ms
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_retry_delay_ms() -> u64 {
    50
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Re-queue delay; a zero value falls back to the 50ms default
    pub fn retry_delay(&self) -> Duration {
        if self.retry_delay_ms == 0 {
            Duration::from_millis(default_retry_delay_ms())
        } else {
            Duration::from_millis(self.retry_delay_ms)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(TesseraError::InvalidArgument(
                "workers must be greater than zero".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(TesseraError::InvalidArgument(
                "queue_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
