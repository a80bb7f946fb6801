use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::config::{DUTY_MAX, DUTY_MIN, FREQ_MAX, FREQ_MIN, MAX_PIN};

/// Errors reported by the software PWM engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PwmError {
    #[error("invalid pin {0} (valid 0..={max})", max = MAX_PIN)]
    InvalidPin(u32),

    #[error("invalid frequency {0} Hz (valid {min}..={max})", min = FREQ_MIN, max = FREQ_MAX)]
    InvalidFrequency(u32),

    #[error("invalid duty cycle {0}% (valid {min}..={max})", min = DUTY_MIN, max = DUTY_MAX)]
    InvalidDuty(u32),

    #[error("gpio line {pin} unavailable: {reason}")]
    LineUnavailable { pin: u8, reason: String },

    /// Realtime scheduling was refused. Never fatal.
    #[error("realtime priority denied: {0}")]
    PriorityDenied(String),

    #[error("cannot start pwm thread for pin {pin}: {reason}")]
    Spawn { pin: u8, reason: String },
}

impl PwmError {
    pub(crate) fn line(pin: u8, reason: impl ToString) -> Self {
        PwmError::LineUnavailable {
            pin,
            reason: reason.to_string(),
        }
    }
}

/// Last error seen by a registry or any of its generator threads.
/// Last writer wins.
#[derive(Debug, Default)]
pub struct LastError {
    slot: Mutex<Option<PwmError>>,
}

impl LastError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, err: &PwmError) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.clone());
    }

    pub fn get(&self) -> Option<PwmError> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Error description, empty if nothing has failed yet.
    pub fn text(&self) -> String {
        self.get().map(|err| err.to_string()).unwrap_or_default()
    }
}
