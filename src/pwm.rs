use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{HOLD_POLL_MS, MAX_REOPEN_ATTEMPTS, MAX_WRITE_FAILURES, REALTIME_PRIORITY};
use crate::error::{LastError, PwmError};
use crate::line::{Level, LineDriver, LineMode, OutputLine};
use crate::sched;
use crate::timing::{AtomicConfig, Discipline, PwmConfig, Timing};

/// Lifecycle of a pin generator.
///
/// Reconfiguration is not a state of its own: the worker picks up the latest
/// configuration at the start of each cycle while staying `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GeneratorState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl GeneratorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => GeneratorState::Created,
            1 => GeneratorState::Running,
            2 => GeneratorState::Stopping,
            _ => GeneratorState::Stopped,
        }
    }
}

/// State shared between a `PinGenerator` and its worker thread.
struct Shared {
    config: Arc<AtomicConfig>,
    stop: AtomicBool,
    state: AtomicU8,
}

impl Shared {
    fn state(&self) -> GeneratorState {
        GeneratorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: GeneratorState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Software PWM on one pin, driven by its own thread.
///
/// The worker thread exclusively owns the line. Callers only touch the
/// configuration cell and the stop flag.
pub struct PinGenerator {
    pin: u8,
    shared: Arc<Shared>,
    thread: Thread,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PinGenerator {
    /// Open `pin` as an output and start toggling it.
    pub fn start(
        pin: u8,
        config: PwmConfig,
        driver: Arc<dyn LineDriver>,
        errors: Arc<LastError>,
    ) -> Result<Self, PwmError> {
        Self::start_with_cell(pin, config, driver, errors, Arc::default())
    }

    /// Like `start`, but publishes the configuration through `cell`, which the
    /// registry reads without locking.
    pub(crate) fn start_with_cell(
        pin: u8,
        config: PwmConfig,
        driver: Arc<dyn LineDriver>,
        errors: Arc<LastError>,
        cell: Arc<AtomicConfig>,
    ) -> Result<Self, PwmError> {
        Self::spawn(pin, config, driver, errors, cell, REALTIME_PRIORITY)
    }

    /// Open the line and spawn the worker, which requests `priority` when
    /// realtime timing is configured.
    pub(crate) fn spawn(
        pin: u8,
        config: PwmConfig,
        driver: Arc<dyn LineDriver>,
        errors: Arc<LastError>,
        cell: Arc<AtomicConfig>,
        priority: i32,
    ) -> Result<Self, PwmError> {
        config.validate()?;
        let line = driver.open(pin, LineMode::OutputLow)?;

        cell.store(config);
        let shared = Arc::new(Shared {
            config: cell,
            stop: AtomicBool::new(false),
            state: AtomicU8::new(GeneratorState::Created as u8),
        });

        let worker = Worker {
            pin,
            line: Some(line),
            driver,
            shared: Arc::clone(&shared),
            errors,
            driven: Some(Level::Low),
            failures: 0,
            reopens: 0,
            realtime_requested: false,
            priority,
            discipline: Discipline::Cooperative,
        };

        let handle = thread::Builder::new()
            .name(format!("swpwm-gpio{pin}"))
            .spawn(move || worker.run())
            .map_err(|e| {
                shared.config.clear();
                PwmError::Spawn {
                    pin,
                    reason: e.to_string(),
                }
            })?;

        info!(
            pin,
            frequency_hz = config.frequency_hz,
            duty_percent = config.duty_percent,
            realtime = config.realtime,
            "software pwm started"
        );

        Ok(Self {
            pin,
            shared,
            thread: handle.thread().clone(),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Replace the configuration seen by the worker. Applied at the next cycle
    /// boundary; the phase in flight always runs to its end.
    pub fn reconfigure(&self, config: PwmConfig) -> Result<(), PwmError> {
        config.validate()?;
        if !self.is_running() {
            return Err(PwmError::line(self.pin, "generator is stopped"));
        }
        self.shared.config.store(config);
        // The worker may have given up between the check and the store.
        // It marks itself stopped before clearing, so this catches it.
        if self.state() == GeneratorState::Stopped {
            self.shared.config.clear();
            return Err(PwmError::line(self.pin, "generator is stopped"));
        }
        // Wakes a held 0%/100% output. A toggling phase just goes back to sleep.
        self.thread.unpark();
        debug!(
            pin = self.pin,
            frequency_hz = config.frequency_hz,
            duty_percent = config.duty_percent,
            realtime = config.realtime,
            "software pwm reconfigured"
        );
        Ok(())
    }

    /// Stop the worker, drive the line low and release it.
    ///
    /// Returns once the thread has exited. Safe to call from any thread and
    /// any number of times; concurrent callers wait for the first one.
    pub fn stop(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(worker) = handle.take() else {
            return;
        };

        if self.state() != GeneratorState::Stopped {
            self.shared.set_state(GeneratorState::Stopping);
        }
        self.shared.stop.store(true, Ordering::Release);
        self.thread.unpark();

        if worker.join().is_err() {
            error!(pin = self.pin, "software pwm thread panicked");
        }

        self.shared.set_state(GeneratorState::Stopped);
        self.shared.config.clear();
        info!(pin = self.pin, "software pwm stopped");
    }

    /// Last committed configuration, `None` once stopped.
    pub fn query(&self) -> Option<PwmConfig> {
        self.shared.config.load()
    }

    pub fn state(&self) -> GeneratorState {
        self.shared.state()
    }

    /// False once stopped, including when the worker gave up on its line.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            GeneratorState::Created | GeneratorState::Running
        )
    }
}

impl Drop for PinGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The toggle loop, owned by the generator thread.
struct Worker {
    pin: u8,
    line: Option<Box<dyn OutputLine>>,
    driver: Arc<dyn LineDriver>,
    shared: Arc<Shared>,
    errors: Arc<LastError>,
    /// Level last written successfully.
    driven: Option<Level>,
    failures: u32,
    reopens: u32,
    realtime_requested: bool,
    priority: i32,
    discipline: Discipline,
}

impl Worker {
    fn run(mut self) {
        let _ = self.shared.state.compare_exchange(
            GeneratorState::Created as u8,
            GeneratorState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        let mut edge = Instant::now();
        let mut gave_up = false;

        while !self.shared.stop.load(Ordering::Acquire) {
            let Some(config) = self.shared.config.load() else {
                break;
            };
            self.negotiate_priority(config.realtime);

            let outcome = match config.timing() {
                Timing::Hold(level) => {
                    let outcome = self.hold(level);
                    edge = Instant::now();
                    outcome
                }
                Timing::Toggle { high, low } => self.cycle(high, low, &mut edge),
            };

            if let Err(err) = outcome {
                error!(pin = self.pin, %err, "gpio line lost, stopping software pwm");
                self.errors.record(&err);
                gave_up = true;
                break;
            }
        }

        self.release();
        if self.realtime_requested
            && sched::is_realtime()
            && let Err(err) = sched::relax()
        {
            warn!(pin = self.pin, %err, "could not leave realtime scheduling");
        }

        if gave_up {
            self.shared.set_state(GeneratorState::Stopped);
            self.shared.config.clear();
        }
    }

    /// Drive a constant level once, then wait for a new configuration.
    fn hold(&mut self, level: Level) -> Result<(), PwmError> {
        if self.driven != Some(level) {
            self.drive(level)?;
        }
        thread::park_timeout(Duration::from_millis(HOLD_POLL_MS));
        Ok(())
    }

    /// One high phase followed by one low phase, paced on absolute deadlines.
    fn cycle(&mut self, high: Duration, low: Duration, edge: &mut Instant) -> Result<(), PwmError> {
        self.drive(Level::High)?;
        *edge += high;
        if !self.discipline.wait_until(*edge, &self.shared.stop) {
            return Ok(());
        }

        self.drive(Level::Low)?;
        *edge += low;
        if !self.discipline.wait_until(*edge, &self.shared.stop) {
            return Ok(());
        }

        // More than a period behind (long preemption): resync instead of bursting.
        let now = Instant::now();
        if now > *edge + high + low {
            *edge = now;
        }
        Ok(())
    }

    /// Write `level`. A failed write is recorded and left for the next phase to
    /// retry; only a line that cannot be recovered is an error.
    fn drive(&mut self, level: Level) -> Result<(), PwmError> {
        let Some(line) = self.line.as_mut() else {
            return self.reopen();
        };

        match line.write(level) {
            Ok(()) => {
                self.driven = Some(level);
                self.failures = 0;
                self.reopens = 0;
                Ok(())
            }
            Err(err) => {
                self.driven = None;
                self.failures += 1;
                if self.failures == 1 {
                    warn!(pin = self.pin, %err, "gpio write failed, retrying");
                }
                self.errors.record(&err);
                if self.failures >= MAX_WRITE_FAILURES {
                    self.reopen()
                } else {
                    Ok(())
                }
            }
        }
    }

    fn reopen(&mut self) -> Result<(), PwmError> {
        if self.reopens >= MAX_REOPEN_ATTEMPTS {
            return Err(PwmError::line(
                self.pin,
                format!("writes still failing after {} reopens", self.reopens),
            ));
        }
        if let Some(line) = self.line.take() {
            line.close();
        }

        self.reopens += 1;
        self.failures = 0;
        let line = self.driver.open(self.pin, LineMode::OutputLow)?;
        warn!(pin = self.pin, attempt = self.reopens, "gpio line reopened");
        self.line = Some(line);
        self.driven = Some(Level::Low);
        Ok(())
    }

    /// Ask for realtime scheduling when the flag turns on, give it back when it
    /// turns off. A refusal only downgrades to cooperative timing.
    fn negotiate_priority(&mut self, realtime: bool) {
        if realtime == self.realtime_requested {
            return;
        }
        self.realtime_requested = realtime;

        if !realtime {
            self.discipline = Discipline::Cooperative;
            if sched::is_realtime()
                && let Err(err) = sched::relax()
            {
                warn!(pin = self.pin, %err, "could not leave realtime scheduling");
            }
            return;
        }

        match sched::elevate(self.priority) {
            Ok(()) => {
                self.discipline = Discipline::Realtime;
                debug!(pin = self.pin, priority = self.priority, "realtime scheduling granted");
            }
            Err(err) => {
                self.discipline = Discipline::Cooperative;
                warn!(pin = self.pin, %err, "falling back to cooperative timing");
                self.errors.record(&err);
            }
        }
    }

    /// Leave the line low and hand it back.
    fn release(&mut self) {
        if let Some(mut line) = self.line.take() {
            if let Err(err) = line.write(Level::Low) {
                warn!(pin = self.pin, %err, "could not drive line low on stop");
                self.errors.record(&err);
            }
            line.close();
            self.driven = None;
        }
    }
}

impl Drop for Worker {
    // Also runs if the loop panics, so the line is never left high.
    fn drop(&mut self) {
        self.release();
    }
}
