/// Cycle-counter time base
///
/// `read_cycles` reads the CPU timestamp counter on x86_64 (no syscall). Other
/// targets substitute a monotonic clock in nanoseconds, which calibrates to a
/// ratio of ~1.0.
///
/// The ns/cycle ratio is fixed at calibration and does not track frequency
/// drift. That holds for a bounded trading session; long-lived processes
/// should recalibrate.

use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

pub const CALIBRATION_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum CalibrationError {
    #[error("cycle counter did not advance over {interval:?}")]
    CounterStalled { interval: Duration },

    #[error("invalid ns-per-cycle ratio: {0}")]
    InvalidRatio(f64),
}

/// True when `read_cycles` is backed by a hardware counter
pub const fn has_hardware_counter() -> bool {
    cfg!(target_arch = "x86_64")
}

/// Raw cycle count, unserialized
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    // SAFETY: rdtsc is available on every x86_64 CPU
    unsafe { core::arch::x86_64::_rdtsc() }
}

/// Cycle count after all prior instructions retire
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_cycles_serialized() -> u64 {
    let mut aux = 0u32;
    // SAFETY: rdtscp is available on every x86_64 CPU the pipeline targets
    unsafe { core::arch::x86_64::__rdtscp(&mut aux) }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub fn read_cycles() -> u64 {
    monotonic_origin().elapsed().as_nanos() as u64
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub fn read_cycles_serialized() -> u64 {
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    read_cycles()
}

#[cfg(not(target_arch = "x86_64"))]
fn monotonic_origin() -> &'static Instant {
    use std::sync::OnceLock;
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    ORIGIN.get_or_init(Instant::now)
}

/// Calibrated cycles <-> nanoseconds converter. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBase {
    ns_per_cycle: f64,
    cycles_per_ns: f64,
    base_cycles: u64,
}

impl TimeBase {
    /// Calibrate over the default interval. Blocks for ~10ms.
    pub fn calibrate() -> Result<Self, CalibrationError> {
        Self::calibrate_over(CALIBRATION_INTERVAL)
    }

    /// Measure cycle-counter deltas against wall-clock time over `interval`
    pub fn calibrate_over(interval: Duration) -> Result<Self, CalibrationError> {
        let wall_start = Instant::now();
        let start = read_cycles_serialized();
        thread::sleep(interval);
        let end = read_cycles_serialized();
        let wall_ns = wall_start.elapsed().as_nanos() as f64;

        let cycles = end.saturating_sub(start);
        if cycles == 0 {
            return Err(CalibrationError::CounterStalled { interval });
        }

        let time_base = Self::from_ratio(wall_ns / cycles as f64)?;
        info!(
            ghz = time_base.ghz(),
            hardware_counter = has_hardware_counter(),
            "time base calibrated"
        );
        Ok(time_base)
    }

    /// Build from a known ratio, taking the baseline from the counter now
    pub fn from_ratio(ns_per_cycle: f64) -> Result<Self, CalibrationError> {
        if !ns_per_cycle.is_finite() || ns_per_cycle <= 0.0 {
            return Err(CalibrationError::InvalidRatio(ns_per_cycle));
        }
        Ok(TimeBase {
            ns_per_cycle,
            cycles_per_ns: 1.0 / ns_per_cycle,
            base_cycles: read_cycles_serialized(),
        })
    }

    #[inline(always)]
    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        (cycles as f64 * self.ns_per_cycle) as u64
    }

    #[inline(always)]
    pub fn ns_to_cycles(&self, ns: u64) -> u64 {
        (ns as f64 * self.cycles_per_ns) as u64
    }

    /// Current counter reading in nanoseconds
    #[inline(always)]
    pub fn now_ns(&self) -> u64 {
        self.cycles_to_ns(read_cycles())
    }

    /// Nanoseconds since this time base was built
    #[inline(always)]
    pub fn elapsed_ns(&self) -> u64 {
        self.cycles_to_ns(read_cycles().saturating_sub(self.base_cycles))
    }

    pub fn ns_per_cycle(&self) -> f64 {
        self.ns_per_cycle
    }

    pub fn cycles_per_ns(&self) -> f64 {
        self.cycles_per_ns
    }

    /// Counter frequency; cycles per ns is GHz
    pub fn ghz(&self) -> f64 {
        self.cycles_per_ns
    }

    pub fn base_cycles(&self) -> u64 {
        self.base_cycles
    }
}

/// Serialized start/elapsed cycle measurement
#[derive(Debug, Clone, Copy)]
pub struct CycleTimer {
    start: u64,
}

impl CycleTimer {
    #[inline(always)]
    pub fn start() -> Self {
        CycleTimer {
            start: read_cycles_serialized(),
        }
    }

    #[inline(always)]
    pub fn elapsed_cycles(&self) -> u64 {
        read_cycles_serialized().saturating_sub(self.start)
    }

    pub fn elapsed_ns(&self, time_base: &TimeBase) -> u64 {
        time_base.cycles_to_ns(self.elapsed_cycles())
    }
}
