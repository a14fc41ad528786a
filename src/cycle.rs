//! The generation loop: produce, normalize, write, wait, repeat.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::config::Config;
use crate::error::CycleError;
use crate::producer::Producer;
use crate::record::{normalize, GeneratedRecord};
use crate::storage::write_json_atomic;

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// Wall-clock sleeper that wakes early once `cancel` is set.
pub struct ThreadSleeper {
    cancel: CancelFlag,
}

impl ThreadSleeper {
    pub fn new(cancel: CancelFlag) -> Self {
        Self { cancel }
    }
}

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.cancel.is_cancelled() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            std::thread::sleep(left.min(SLEEP_SLICE));
        }
    }
}

/// Shared stop request, honoured between cycles.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub written: u64,
    pub skipped: u64,
    pub failed_writes: u64,
}

pub struct CycleRunner<P, S = ThreadSleeper> {
    producer: P,
    sleeper: S,
    output_path: PathBuf,
    interval: Duration,
    max_cycles: Option<u64>,
    cancel: CancelFlag,
}

impl<P: Producer, S: Sleeper> CycleRunner<P, S> {
    pub fn new(producer: P, sleeper: S, config: &Config, cancel: CancelFlag) -> Self {
        Self {
            producer,
            sleeper,
            output_path: config.output_path.clone(),
            interval: config.interval,
            max_cycles: config.max_cycles,
            cancel,
        }
    }

    /// One produce -> normalize -> write pass. Nothing is written unless the
    /// producer returned data.
    pub fn run_cycle(&mut self) -> Result<GeneratedRecord, CycleError> {
        let raw = self.producer.generate()?;
        let record = normalize(&raw);
        write_json_atomic(&self.output_path, &record)?;
        Ok(record)
    }

    fn should_stop(&self, cycles: u64) -> bool {
        self.cancel.is_cancelled() || self.max_cycles.is_some_and(|max| cycles >= max)
    }

    /// Run cycles until cancelled or `max_cycles` is reached. Failed cycles
    /// are logged and never end the loop.
    pub fn run(&mut self) -> RunSummary {
        let mut summary = RunSummary::default();
        info!(
            "Starting {} producer, writing {} every {:?}",
            self.producer.name(),
            self.output_path.display(),
            self.interval
        );

        while !self.should_stop(summary.cycles) {
            summary.cycles += 1;

            match self.run_cycle() {
                Ok(record) => {
                    summary.written += 1;
                    info!(
                        "[cycle {}] JSON updated: {} replies, corp {}",
                        summary.cycles,
                        record.replies.len(),
                        record.corp_name.as_deref().unwrap_or("-")
                    );
                }
                Err(CycleError::Persistence(e)) => {
                    summary.failed_writes += 1;
                    error!("[cycle {}] {e}", summary.cycles);
                }
                Err(CycleError::UnresolvedJson { reason, raw }) => {
                    summary.skipped += 1;
                    warn!("[cycle {}] skipped, no usable JSON: {reason}", summary.cycles);
                    debug!("Model output was:\n{raw}");
                }
                Err(e) => {
                    summary.skipped += 1;
                    warn!("[cycle {}] skipped: {e}", summary.cycles);
                }
            }

            if self.should_stop(summary.cycles) {
                break;
            }
            self.sleeper.sleep(self.interval);
        }

        info!(
            "Stopped after {} cycles ({} written, {} skipped, {} failed writes)",
            summary.cycles, summary.written, summary.skipped, summary.failed_writes
        );
        summary
    }
}
