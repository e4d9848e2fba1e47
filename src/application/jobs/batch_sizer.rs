//! Adaptive claim batch size driven by an EMA of observed job duration.
//!
//! The sizer is a step controller: every completion moves the batch size by at
//! most one in either direction, so noisy durations cannot make it swing.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use metrics::gauge;
use thiserror::Error;
use tracing::debug;

/// Weight given to the newest duration sample.
pub const EMA_ALPHA: f64 = 0.2;

const METRIC_BATCH_EMA_MS: &str = "quire_batch_ema_ms";
const METRIC_BATCH_SIZE: &str = "quire_batch_size";

// Finite samples never encode to this bit pattern (it is a NaN payload).
const NO_SAMPLE: u64 = u64::MAX;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchSizerError {
    #[error("adaptive batch sizer misconfigured: {reason}")]
    Misconfigured { reason: String },
}

impl BatchSizerError {
    fn misconfigured(reason: impl Into<String>) -> Self {
        Self::Misconfigured {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizerConfig {
    pub min_batch_size: u32,
    pub max_batch_size: u32,
    /// EMA below this grows the batch.
    pub fast_threshold_ms: u64,
    /// EMA above this shrinks the batch.
    pub slow_threshold_ms: u64,
}

impl Default for BatchSizerConfig {
    fn default() -> Self {
        Self {
            min_batch_size: 1,
            max_batch_size: 10,
            fast_threshold_ms: 2_000,
            slow_threshold_ms: 5_000,
        }
    }
}

impl BatchSizerConfig {
    pub fn validate(&self) -> Result<(), BatchSizerError> {
        if self.min_batch_size == 0 {
            return Err(BatchSizerError::misconfigured(
                "min_batch_size must be greater than zero",
            ));
        }
        if self.min_batch_size > self.max_batch_size {
            return Err(BatchSizerError::misconfigured(format!(
                "min_batch_size ({}) exceeds max_batch_size ({})",
                self.min_batch_size, self.max_batch_size
            )));
        }
        if self.fast_threshold_ms >= self.slow_threshold_ms {
            return Err(BatchSizerError::misconfigured(format!(
                "fast_threshold_ms ({}) must be below slow_threshold_ms ({})",
                self.fast_threshold_ms, self.slow_threshold_ms
            )));
        }
        Ok(())
    }
}

/// What a completion did to the batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAdjustment {
    Increased,
    Decreased,
    Held,
}

/// Lock-free EMA and batch size shared between the poller and its job tasks.
#[derive(Debug)]
pub struct AdaptiveBatchSizer {
    config: BatchSizerConfig,
    ema_bits: AtomicU64,
    batch_size: AtomicU32,
}

impl AdaptiveBatchSizer {
    /// Start at `min_batch_size` with no samples.
    pub fn new(config: BatchSizerConfig) -> Result<Self, BatchSizerError> {
        config.validate()?;
        gauge!(METRIC_BATCH_SIZE).set(f64::from(config.min_batch_size));
        Ok(Self {
            config,
            ema_bits: AtomicU64::new(NO_SAMPLE),
            batch_size: AtomicU32::new(config.min_batch_size),
        })
    }

    pub fn config(&self) -> &BatchSizerConfig {
        &self.config
    }

    pub fn current_batch_size(&self) -> u32 {
        self.batch_size.load(Ordering::Acquire)
    }

    /// Current EMA in milliseconds, `None` before the first completion.
    pub fn ema_ms(&self) -> Option<f64> {
        match self.ema_bits.load(Ordering::Acquire) {
            NO_SAMPLE => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    /// Fold one job duration into the EMA and step the batch size.
    pub fn record_completion(&self, duration_ms: u64) -> BatchAdjustment {
        let sample = duration_ms as f64;
        let mut ema = sample;
        // Always `Ok`: the update closure never declines.
        let _ = self
            .ema_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                ema = match bits {
                    NO_SAMPLE => sample,
                    old => EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * f64::from_bits(old),
                };
                Some(ema.to_bits())
            });

        let adjustment = self.step(ema);
        let batch_size = self.current_batch_size();
        gauge!(METRIC_BATCH_EMA_MS).set(ema);
        gauge!(METRIC_BATCH_SIZE).set(f64::from(batch_size));

        debug!(
            target = "application::jobs::batch_sizer",
            duration_ms,
            ema_ms = ema,
            batch_size,
            ?adjustment,
            "Recorded job completion"
        );
        adjustment
    }

    fn step(&self, ema: f64) -> BatchAdjustment {
        let BatchSizerConfig {
            min_batch_size,
            max_batch_size,
            fast_threshold_ms,
            slow_threshold_ms,
        } = self.config;

        if ema < fast_threshold_ms as f64 {
            let grown = self
                .batch_size
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                    (size < max_batch_size).then(|| size + 1)
                });
            if grown.is_ok() {
                return BatchAdjustment::Increased;
            }
        } else if ema > slow_threshold_ms as f64 {
            let shrunk = self
                .batch_size
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                    (size > min_batch_size).then(|| size - 1)
                });
            if shrunk.is_ok() {
                return BatchAdjustment::Decreased;
            }
        }
        BatchAdjustment::Held
    }
}
