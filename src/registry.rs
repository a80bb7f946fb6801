use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::config::PIN_COUNT;
use crate::error::{LastError, PwmError};
use crate::line::{LineDriver, RppalLineDriver};
use crate::pwm::PinGenerator;
use crate::timing::{AtomicConfig, PwmConfig};

/// One pin's entry. The lifecycle lock serializes start/reconfigure/stop;
/// `config` mirrors the running generator so queries never wait on that lock.
#[derive(Default)]
struct Slot {
    generator: Mutex<Option<PinGenerator>>,
    config: Arc<AtomicConfig>,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, Option<PinGenerator>> {
        self.generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns every software PWM generator of the process, at most one per pin.
///
/// Create one at startup and pass it by reference to whatever configures pins.
/// Dropping it (or calling `shutdown`) stops every generator and leaves the
/// lines driven low.
pub struct PwmRegistry {
    driver: Arc<dyn LineDriver>,
    slots: Vec<Slot>,
    errors: Arc<LastError>,
}

impl PwmRegistry {
    pub fn new(driver: Arc<dyn LineDriver>) -> Self {
        Self {
            driver,
            slots: (0..PIN_COUNT).map(|_| Slot::default()).collect(),
            errors: Arc::new(LastError::new()),
        }
    }

    /// Registry on the board's GPIO chip.
    pub fn open() -> Result<Self, PwmError> {
        Ok(Self::new(Arc::new(RppalLineDriver::new()?)))
    }

    /// Start software PWM on `pin`, or update the generator already running there.
    ///
    /// A frequency of 0 stops the pin instead. Realtime changes are applied by
    /// the running generator, it is never recreated.
    pub fn set_pwm(
        &self,
        pin: u32,
        frequency_hz: u32,
        duty_percent: u32,
        realtime: bool,
    ) -> Result<(), PwmError> {
        let result = self.try_set_pwm(pin, frequency_hz, duty_percent, realtime);
        self.note(result)
    }

    fn try_set_pwm(
        &self,
        pin: u32,
        frequency_hz: u32,
        duty_percent: u32,
        realtime: bool,
    ) -> Result<(), PwmError> {
        let index = check_pin(pin)?;
        if frequency_hz == 0 {
            self.stop_slot(index);
            return Ok(());
        }
        let config = PwmConfig::new(frequency_hz, duty_percent, realtime)?;

        let slot = &self.slots[usize::from(index)];
        let mut generator = slot.lock();

        if let Some(running) = generator.as_ref().filter(|g| g.is_running()) {
            return running.reconfigure(config);
        }

        // Reap a generator that gave up on its line before reusing the pin.
        if let Some(stale) = generator.take() {
            debug!(pin = index, "replacing stopped generator");
            stale.stop();
        }

        *generator = Some(PinGenerator::start_with_cell(
            index,
            config,
            Arc::clone(&self.driver),
            Arc::clone(&self.errors),
            Arc::clone(&slot.config),
        )?);
        Ok(())
    }

    /// Stop software PWM on `pin`. Succeeds on a pin that has none.
    pub fn deinit_gpio(&self, pin: u32) -> Result<(), PwmError> {
        let result = check_pin(pin).map(|index| {
            self.stop_slot(index);
        });
        self.note(result)
    }

    /// Configured frequency of `pin`, 0 if it has no running generator.
    pub fn get_pwm_frequency(&self, pin: u32) -> u32 {
        self.query(pin).map_or(0, |config| config.frequency_hz)
    }

    /// Configured duty cycle of `pin`, 0 if it has no running generator.
    pub fn get_pwm_dutycycle(&self, pin: u32) -> u32 {
        self.query(pin).map_or(0, |config| config.duty_percent)
    }

    /// Snapshot of the configuration running on `pin`.
    pub fn query(&self, pin: u32) -> Option<PwmConfig> {
        let index = check_pin(pin).ok()?;
        self.slots[usize::from(index)].config.load()
    }

    /// Description of the last error, empty if nothing failed.
    pub fn error_text(&self) -> String {
        self.errors.text()
    }

    pub fn last_error(&self) -> Option<PwmError> {
        self.errors.get()
    }

    /// Pins that currently have a running generator.
    pub fn active_pins(&self) -> Vec<u8> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.config.load().is_some())
            .map(|(pin, _)| pin as u8)
            .collect()
    }

    /// Stop every generator. The registry stays usable afterwards.
    pub fn shutdown(&self) {
        let mut stopped = 0;
        for index in 0..self.slots.len() {
            if self.stop_slot(index as u8) {
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!(stopped, "all software pwm generators stopped");
        }
    }

    /// Stop and remove the generator on `index`. Returns whether one existed.
    fn stop_slot(&self, index: u8) -> bool {
        let slot = &self.slots[usize::from(index)];
        let mut generator = slot.lock();
        let existed = match generator.take() {
            Some(g) => {
                g.stop();
                true
            }
            None => false,
        };
        slot.config.clear();
        existed
    }

    fn note(&self, result: Result<(), PwmError>) -> Result<(), PwmError> {
        if let Err(err) = &result {
            self.errors.record(err);
        }
        result
    }
}

impl Drop for PwmRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_pin(pin: u32) -> Result<u8, PwmError> {
    if pin < PIN_COUNT {
        Ok(pin as u8)
    } else {
        Err(PwmError::InvalidPin(pin))
    }
}
