// This file is only compiled during tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::PwmError;
use crate::line::{Edge, Level, LineDriver, LineMode, OutputLine};

#[derive(Default)]
struct MockPin {
    open: bool,
    opens: usize,
    level: Option<Level>,
    edges: Vec<Edge>,
    failing_writes: usize,
    fail_every_write: bool,
}

#[derive(Default)]
struct MockState {
    pins: HashMap<u8, MockPin>,
    unavailable: HashSet<u8>,
}

/// In-memory GPIO lines shared with generator threads.
/// Opening a line that is already open fails, like a busy character device.
#[derive(Clone, Default)]
pub struct MockLineDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockLineDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_pin<R>(&self, pin: u8, f: impl FnOnce(&mut MockPin) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(state.pins.entry(pin).or_default())
    }

    // test helper: every open of `pin` fails from now on
    pub fn fail_open(&self, pin: u8) {
        self.state.lock().unwrap().unavailable.insert(pin);
    }

    // test helper: the next `count` writes to `pin` fail
    pub fn fail_writes(&self, pin: u8, count: usize) {
        self.with_pin(pin, |p| p.failing_writes = count);
    }

    // test helper: every write to `pin` fails until cleared
    pub fn fail_every_write(&self, pin: u8, fail: bool) {
        self.with_pin(pin, |p| p.fail_every_write = fail);
    }

    pub fn is_open(&self, pin: u8) -> bool {
        self.with_pin(pin, |p| p.open)
    }

    /// Number of times `pin` has been opened.
    pub fn opens(&self, pin: u8) -> usize {
        self.with_pin(pin, |p| p.opens)
    }

    /// Level currently driven on `pin`, `None` if it was never opened.
    pub fn level(&self, pin: u8) -> Option<Level> {
        self.with_pin(pin, |p| p.level)
    }

    /// Every successful write to `pin`, in order.
    pub fn edges(&self, pin: u8) -> Vec<Edge> {
        self.with_pin(pin, |p| p.edges.clone())
    }
}

impl LineDriver for MockLineDriver {
    fn open(&self, pin: u8, mode: LineMode) -> Result<Box<dyn OutputLine>, PwmError> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable.contains(&pin) {
            return Err(PwmError::line(pin, "mock: unavailable"));
        }
        let mock_pin = state.pins.entry(pin).or_default();
        if mock_pin.open {
            return Err(PwmError::line(pin, "mock: busy"));
        }
        mock_pin.open = true;
        mock_pin.opens += 1;
        mock_pin.level = Some(match mode {
            LineMode::OutputLow => Level::Low,
            LineMode::OutputHigh => Level::High,
        });
        Ok(Box::new(MockLine {
            pin,
            driver: self.clone(),
        }))
    }
}

struct MockLine {
    pin: u8,
    driver: MockLineDriver,
}

impl OutputLine for MockLine {
    fn write(&mut self, level: Level) -> Result<(), PwmError> {
        self.driver.with_pin(self.pin, |p| {
            if p.fail_every_write {
                return Err(PwmError::line(self.pin, "mock: write failed"));
            }
            if p.failing_writes > 0 {
                p.failing_writes -= 1;
                return Err(PwmError::line(self.pin, "mock: write failed"));
            }
            p.level = Some(level);
            p.edges.push(Edge {
                at: Instant::now(),
                level,
            });
            Ok(())
        })
    }

    fn close(self: Box<Self>) {
        self.driver.with_pin(self.pin, |p| p.open = false);
    }
}
