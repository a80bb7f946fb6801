//! Software PWM for GPIO pins without a PWM peripheral.
//!
//! Each configured pin gets its own thread that toggles the line at the
//! requested frequency and duty cycle. Cooperative timing sleeps through the
//! scheduler and is accurate up to roughly 800 Hz; realtime timing asks for
//! SCHED_FIFO and spins longer before each edge, at a higher CPU cost.
//!
//! ```no_run
//! use swpwm::PwmRegistry;
//!
//! let registry = PwmRegistry::open()?;
//! // 100 Hz, 75 %: 7.5 ms high, 2.5 ms low.
//! registry.set_pwm(20, 100, 75, false)?;
//! assert_eq!(registry.get_pwm_dutycycle(20), 75);
//! registry.deinit_gpio(20)?;
//! # Ok::<(), swpwm::PwmError>(())
//! ```

pub mod config;
pub mod error;
pub mod line;
pub mod pwm;
pub mod registry;
pub mod sched;
pub mod timing;

// Re-export commonly used types
pub use error::{LastError, PwmError};
pub use line::{Level, LineDriver, LineMode, OutputLine, RecordingDriver, RppalLineDriver};
pub use pwm::{GeneratorState, PinGenerator};
pub use registry::PwmRegistry;
pub use timing::{PwmConfig, Timing};

#[cfg(test)]
pub(crate) mod mocks;
