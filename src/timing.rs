//! Timing policy: turns a PWM configuration into edge durations and
//! waits for edge deadlines with the configured discipline.

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{
    COOPERATIVE_SPIN_THRESHOLD_US, DUTY_MAX, FREQ_MAX, FREQ_MIN, REALTIME_SPIN_THRESHOLD_US,
};
use crate::error::PwmError;
use crate::line::{Edge, Level};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Frequency, duty cycle and timing discipline of one pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmConfig {
    pub frequency_hz: u32,
    pub duty_percent: u32,
    pub realtime: bool,
}

/// What the output does for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// 0% or 100%: drive once and keep the level.
    Hold(Level),
    /// Drive high for `high`, then low for `low`.
    Toggle { high: Duration, low: Duration },
}

impl PwmConfig {
    pub fn new(frequency_hz: u32, duty_percent: u32, realtime: bool) -> Result<Self, PwmError> {
        let config = Self {
            frequency_hz,
            duty_percent,
            realtime,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PwmError> {
        if !(FREQ_MIN..=FREQ_MAX).contains(&self.frequency_hz) {
            return Err(PwmError::InvalidFrequency(self.frequency_hz));
        }
        if self.duty_percent > DUTY_MAX {
            return Err(PwmError::InvalidDuty(self.duty_percent));
        }
        Ok(())
    }

    /// One full cycle, `1 / frequency`.
    pub fn period(&self) -> Duration {
        Duration::from_nanos(NANOS_PER_SEC / u64::from(self.frequency_hz.max(1)))
    }

    pub fn timing(&self) -> Timing {
        match self.duty_percent {
            0 => Timing::Hold(Level::Low),
            d if d >= DUTY_MAX => Timing::Hold(Level::High),
            duty => {
                let period = self.period();
                let high_ns =
                    NANOS_PER_SEC * u64::from(duty) / (100 * u64::from(self.frequency_hz.max(1)));
                let high = Duration::from_nanos(high_ns);
                Timing::Toggle {
                    high,
                    low: period.saturating_sub(high),
                }
            }
        }
    }

    pub fn discipline(&self) -> Discipline {
        if self.realtime {
            Discipline::Realtime
        } else {
            Discipline::Cooperative
        }
    }
}

/// How a generator waits for the next edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// Sleep through the scheduler, spin only for the last few microseconds.
    Cooperative,
    /// Elevated priority and a longer spin tail. More CPU, less jitter.
    Realtime,
}

impl Discipline {
    /// Remaining time below which sleeping is no longer trusted.
    pub fn spin_threshold(self) -> Duration {
        match self {
            Discipline::Cooperative => Duration::from_micros(COOPERATIVE_SPIN_THRESHOLD_US),
            Discipline::Realtime => Duration::from_micros(REALTIME_SPIN_THRESHOLD_US),
        }
    }

    /// Wait until `deadline`. Sleeps while far away, then busy-waits the rest so
    /// a short phase is never overslept.
    ///
    /// The sleep parks the thread, so an `unpark` from `stop` cuts it short.
    /// Returns `false` if `cancel` was raised before the deadline.
    pub fn wait_until(self, deadline: Instant, cancel: &AtomicBool) -> bool {
        let threshold = self.spin_threshold();
        loop {
            if cancel.load(Ordering::Acquire) {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            if remaining > threshold {
                thread::park_timeout(remaining - threshold);
            } else {
                hint::spin_loop();
            }
        }
    }
}

// Packed layout: bits 0..32 frequency, 32..40 duty, bit 40 realtime.
// Frequency 0 means "no configuration".
const DUTY_SHIFT: u32 = 32;
const REALTIME_BIT: u64 = 1 << 40;

/// A `PwmConfig` readable and writable as one atomic value, so a reader never
/// sees the frequency of one update with the duty cycle of another.
#[derive(Debug, Default)]
pub struct AtomicConfig {
    bits: AtomicU64,
}

impl AtomicConfig {
    pub fn new(config: Option<PwmConfig>) -> Self {
        Self {
            bits: AtomicU64::new(pack(config)),
        }
    }

    pub fn load(&self) -> Option<PwmConfig> {
        unpack(self.bits.load(Ordering::Acquire))
    }

    pub fn store(&self, config: PwmConfig) {
        self.bits.store(pack(Some(config)), Ordering::Release);
    }

    pub fn clear(&self) {
        self.bits.store(0, Ordering::Release);
    }
}

fn pack(config: Option<PwmConfig>) -> u64 {
    match config {
        None => 0,
        Some(c) => {
            let mut bits = u64::from(c.frequency_hz) | (u64::from(c.duty_percent & 0xFF) << DUTY_SHIFT);
            if c.realtime {
                bits |= REALTIME_BIT;
            }
            bits
        }
    }
}

fn unpack(bits: u64) -> Option<PwmConfig> {
    let frequency_hz = (bits & 0xFFFF_FFFF) as u32;
    if frequency_hz == 0 {
        return None;
    }
    Some(PwmConfig {
        frequency_hz,
        duty_percent: ((bits >> DUTY_SHIFT) & 0xFF) as u32,
        realtime: bits & REALTIME_BIT != 0,
    })
}

/// Statistics over complete high/low cycles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DutyStats {
    pub cycles: usize,
    pub mean_period: Duration,
    pub mean_high: Duration,
    /// Observed high time over period, 0.0..=1.0.
    pub duty: f64,
}

impl DutyStats {
    pub fn frequency_hz(&self) -> f64 {
        let secs = self.mean_period.as_secs_f64();
        if secs > 0.0 { 1.0 / secs } else { 0.0 }
    }
}

/// Measure the cycles contained in a sequence of writes.
/// A cycle runs from one rising edge to the next. Returns `None` without a full cycle.
pub fn measure_duty(edges: &[Edge]) -> Option<DutyStats> {
    let mut changes: Vec<Edge> = Vec::with_capacity(edges.len());
    for edge in edges {
        if changes.last().map(|last| last.level) != Some(edge.level) {
            changes.push(*edge);
        }
    }

    let mut cycles = 0usize;
    let mut total_period = Duration::ZERO;
    let mut total_high = Duration::ZERO;
    let mut rise: Option<Instant> = None;
    let mut fall: Option<Instant> = None;

    for change in changes {
        match change.level {
            Level::High => {
                if let (Some(r), Some(f)) = (rise, fall) {
                    cycles += 1;
                    total_period += change.at - r;
                    total_high += f - r;
                }
                rise = Some(change.at);
                fall = None;
            }
            Level::Low => {
                if rise.is_some() {
                    fall = Some(change.at);
                }
            }
        }
    }

    if cycles == 0 || total_period.is_zero() {
        return None;
    }
    let n = cycles as u32;
    Some(DutyStats {
        cycles,
        mean_period: total_period / n,
        mean_high: total_high / n,
        duty: total_high.as_secs_f64() / total_period.as_secs_f64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_durations() {
        let config = PwmConfig::new(100, 75, false).unwrap();
        assert_eq!(config.period(), Duration::from_millis(10));
        assert_eq!(
            config.timing(),
            Timing::Toggle {
                high: Duration::from_micros(7500),
                low: Duration::from_micros(2500),
            }
        );

        // Odd frequency: the two phases still add up to the period.
        let config = PwmConfig::new(45_000, 33, false).unwrap();
        match config.timing() {
            Timing::Toggle { high, low } => {
                assert!(!high.is_zero() && !low.is_zero());
                assert_eq!(high + low, config.period());
            }
            other => panic!("expected toggle, got {other:?}"),
        }
    }

    #[test]
    fn test_hold_levels() {
        let off = PwmConfig::new(1, 0, false).unwrap();
        assert_eq!(off.timing(), Timing::Hold(Level::Low));

        let on = PwmConfig::new(1000, 100, true).unwrap();
        assert_eq!(on.timing(), Timing::Hold(Level::High));
        assert_eq!(on.discipline(), Discipline::Realtime);
    }

    #[test]
    fn test_validation() {
        assert_eq!(
            PwmConfig::new(0, 50, false),
            Err(PwmError::InvalidFrequency(0))
        );
        assert_eq!(
            PwmConfig::new(45_001, 50, false),
            Err(PwmError::InvalidFrequency(45_001))
        );
        assert_eq!(PwmConfig::new(100, 101, false), Err(PwmError::InvalidDuty(101)));
        assert!(PwmConfig::new(1, 0, false).is_ok());
        assert!(PwmConfig::new(45_000, 100, true).is_ok());
    }

    #[test]
    fn test_atomic_config() {
        let cell = AtomicConfig::default();
        assert_eq!(cell.load(), None);

        let config = PwmConfig::new(45_000, 100, true).unwrap();
        cell.store(config);
        assert_eq!(cell.load(), Some(config));

        cell.store(PwmConfig::new(1, 0, false).unwrap());
        assert_eq!(cell.load(), Some(PwmConfig::new(1, 0, false).unwrap()));

        cell.clear();
        assert_eq!(cell.load(), None);
    }

    #[test]
    fn test_wait_until_does_not_return_early() {
        let cancel = AtomicBool::new(false);
        for discipline in [Discipline::Cooperative, Discipline::Realtime] {
            let start = Instant::now();
            let deadline = start + Duration::from_micros(1500);
            assert!(discipline.wait_until(deadline, &cancel));
            assert!(Instant::now() >= deadline);
        }
    }

    #[test]
    fn test_wait_until_spins_short_phases() {
        // Below the spin threshold nothing sleeps, so the overshoot stays small.
        let cancel = AtomicBool::new(false);
        let deadline = Instant::now() + Duration::from_micros(20);
        assert!(Discipline::Cooperative.wait_until(deadline, &cancel));
        assert!(Instant::now().duration_since(deadline) < Duration::from_millis(5));
    }

    #[test]
    fn test_wait_until_cancelled() {
        let cancel = AtomicBool::new(true);
        let start = Instant::now();
        assert!(!Discipline::Cooperative.wait_until(start + Duration::from_secs(10), &cancel));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_measure_duty() {
        let t0 = Instant::now();
        let at = |us: u64| t0 + Duration::from_micros(us);
        let mut edges = Vec::new();
        for cycle in 0..4u64 {
            let start = cycle * 10_000;
            edges.push(Edge { at: at(start), level: Level::High });
            // Repeated writes of the same level are not edges.
            edges.push(Edge { at: at(start + 100), level: Level::High });
            edges.push(Edge { at: at(start + 7_500), level: Level::Low });
        }
        edges.push(Edge { at: at(40_000), level: Level::High });

        let stats = measure_duty(&edges).unwrap();
        assert_eq!(stats.cycles, 4);
        assert_eq!(stats.mean_period, Duration::from_millis(10));
        assert_eq!(stats.mean_high, Duration::from_micros(7500));
        assert!((stats.duty - 0.75).abs() < 1e-9);
        assert!((stats.frequency_hz() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_measure_duty_without_cycle() {
        let now = Instant::now();
        assert!(measure_duty(&[]).is_none());
        assert!(measure_duty(&[Edge { at: now, level: Level::Low }]).is_none());
    }
}
