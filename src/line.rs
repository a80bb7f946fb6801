use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use rppal::gpio::{Gpio, OutputPin};
use tracing::debug;

use crate::error::PwmError;

/// Output level of a GPIO line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<Level> for rppal::gpio::Level {
    fn from(level: Level) -> Self {
        match level {
            Level::Low => rppal::gpio::Level::Low,
            Level::High => rppal::gpio::Level::High,
        }
    }
}

/// How a line is configured when opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMode {
    /// Output, initially driven low.
    OutputLow,
    /// Output, initially driven high.
    OutputHigh,
}

/// Opens GPIO lines. Shared between the registry and every generator thread.
pub trait LineDriver: Send + Sync {
    fn open(&self, pin: u8, mode: LineMode) -> Result<Box<dyn OutputLine>, PwmError>;
}

/// An opened output line, exclusively owned by one generator.
pub trait OutputLine: Send {
    fn write(&mut self, level: Level) -> Result<(), PwmError>;

    /// Release the line. The caller drives it low first.
    fn close(self: Box<Self>);
}

/// Line driver backed by the GPIO character device through rppal.
#[derive(Clone)]
pub struct RppalLineDriver {
    gpio: Gpio,
}

impl RppalLineDriver {
    pub fn new() -> Result<Self, PwmError> {
        let gpio = Gpio::new().map_err(|e| PwmError::LineUnavailable {
            pin: 0,
            reason: format!("gpio chip: {e}"),
        })?;
        Ok(Self { gpio })
    }
}

impl LineDriver for RppalLineDriver {
    fn open(&self, pin: u8, mode: LineMode) -> Result<Box<dyn OutputLine>, PwmError> {
        let raw = self.gpio.get(pin).map_err(|e| PwmError::line(pin, e))?;
        let mut output = match mode {
            LineMode::OutputLow => raw.into_output_low(),
            LineMode::OutputHigh => raw.into_output_high(),
        };
        // rppal reverts the pin to an input on drop, which would leave it floating.
        output.set_reset_on_drop(false);
        debug!(pin, ?mode, "gpio line opened");
        Ok(Box::new(RppalLine { pin, output }))
    }
}

struct RppalLine {
    pin: u8,
    output: OutputPin,
}

impl OutputLine for RppalLine {
    fn write(&mut self, level: Level) -> Result<(), PwmError> {
        self.output.write(level.into());
        Ok(())
    }

    fn close(self: Box<Self>) {
        debug!(pin = self.pin, "gpio line closed");
    }
}

/// A level change observed on a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub at: Instant,
    pub level: Level,
}

type EdgeLog = Arc<Mutex<HashMap<u8, Vec<Edge>>>>;

/// Wraps another driver and timestamps every write, for measuring
/// the edge placement a generator actually achieves.
pub struct RecordingDriver<D> {
    inner: D,
    edges: EdgeLog,
}

impl<D: LineDriver> RecordingDriver<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            edges: Arc::default(),
        }
    }

    /// Drain the edges recorded for `pin` so far.
    pub fn take_edges(&self, pin: u8) -> Vec<Edge> {
        self.edges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&pin)
            .unwrap_or_default()
    }
}

impl<D: LineDriver> LineDriver for RecordingDriver<D> {
    fn open(&self, pin: u8, mode: LineMode) -> Result<Box<dyn OutputLine>, PwmError> {
        let inner = self.inner.open(pin, mode)?;
        Ok(Box::new(RecordingLine {
            pin,
            inner,
            edges: Arc::clone(&self.edges),
        }))
    }
}

struct RecordingLine {
    pin: u8,
    inner: Box<dyn OutputLine>,
    edges: EdgeLog,
}

impl OutputLine for RecordingLine {
    fn write(&mut self, level: Level) -> Result<(), PwmError> {
        self.inner.write(level)?;
        let at = Instant::now();
        self.edges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(self.pin)
            .or_default()
            .push(Edge { at, level });
        Ok(())
    }

    fn close(self: Box<Self>) {
        self.inner.close();
    }
}
