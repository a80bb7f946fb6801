// ** PIN CONFIGURATION ** //

/// GPIO pins usable for software PWM (BCM numbering 0..27).
pub const PIN_COUNT: u32 = 28;
pub const MAX_PIN: u32 = PIN_COUNT - 1;

// ** PWM LIMITS ** //

/// Frequency range accepted by `set_pwm` (Hz).
pub const FREQ_MIN: u32 = 1;
pub const FREQ_MAX: u32 = 45_000;
/// Duty cycle range accepted by `set_pwm` (%).
pub const DUTY_MIN: u32 = 0;
pub const DUTY_MAX: u32 = 100;

// ** TIMING CONFIGURATION ** //

/// Remaining time below which a cooperative wait stops sleeping and spins.
/// Roughly the default Linux timer slack plus wake-up latency.
pub const COOPERATIVE_SPIN_THRESHOLD_US: u64 = 80;
/// Realtime mode spins for a longer tail so wake-up jitter never pushes an edge late.
pub const REALTIME_SPIN_THRESHOLD_US: u64 = 250;
/// SCHED_FIFO priority requested by realtime generators (1..99).
pub const REALTIME_PRIORITY: i32 = 50;
/// Above this frequency cooperative timing loses duty-cycle accuracy.
/// Calibration target only: measure it on the deployment board with `calibrate`.
pub const COOPERATIVE_ACCURACY_CEILING_HZ: u32 = 800;
/// Accepted |observed - configured| duty ratio over a full sampling window.
/// Realtime timing must hold the tighter band.
pub const COOPERATIVE_DUTY_TOLERANCE: f64 = 0.08;
pub const REALTIME_DUTY_TOLERANCE: f64 = 0.05;
/// How often a generator holding 0% or 100% re-checks its configuration.
pub const HOLD_POLL_MS: u64 = 50;

// ** RECOVERY CONFIGURATION ** //

/// Consecutive failed writes before the line is closed and reopened.
pub const MAX_WRITE_FAILURES: u32 = 8;
/// Reopens in a row without a successful write before a generator gives up.
pub const MAX_REOPEN_ATTEMPTS: u32 = 3;

// ** DEMO CONFIGURATION ** //

/// Output pin used by the `swpwm` demo.
pub const DEMO_PIN: u32 = 20;
pub const DEMO_FREQUENCY_HZ: u32 = 100;
/// Seconds between duty cycle steps in the demo.
pub const DEMO_STEP_SECS: u64 = 2;

// ** CALIBRATION CONFIGURATION ** //

/// Output pin driven by the `calibrate` tool.
pub const CALIBRATION_PIN: u32 = 20;
/// Frequencies swept during calibration (Hz).
pub const CALIBRATION_FREQUENCIES_HZ: [u32; 8] = [50, 100, 200, 400, 800, 1600, 5000, 20_000];
pub const CALIBRATION_DUTY: u32 = 50;
/// Sampling window per frequency (milliseconds).
pub const CALIBRATION_WINDOW_MS: u64 = 1000;
