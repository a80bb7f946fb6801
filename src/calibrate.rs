use std::sync::Arc;
use std::thread;
use std::time::Duration;

use swpwm::config::{
    CALIBRATION_DUTY, CALIBRATION_FREQUENCIES_HZ, CALIBRATION_PIN, CALIBRATION_WINDOW_MS,
    COOPERATIVE_ACCURACY_CEILING_HZ,
};
use swpwm::timing::measure_duty;
use swpwm::{PwmRegistry, RecordingDriver, RppalLineDriver};
use tracing_subscriber::EnvFilter;

/// Duty error (percentage points) still counted as accurate.
const ACCEPTABLE_ERROR: f64 = 2.0;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("╔══════════════════════════════════════════════════════╗");
    println!("║     Software PWM Calibration Tool                    ║");
    println!("╚══════════════════════════════════════════════════════╝\n");

    println!("Instructions:");
    println!("1. Leave GPIO {} unconnected (or on an LED)", CALIBRATION_PIN);
    println!("2. Keep the board otherwise idle");
    println!("3. Run once as a normal user and once with sudo to compare realtime\n");

    let recorder = Arc::new(RecordingDriver::new(RppalLineDriver::new()?));
    let registry = PwmRegistry::new(recorder.clone());
    let pin = CALIBRATION_PIN as u8;

    println!(
        "{:^10} | {:^11} | {:^8} | {:^12} | {:^10}",
        "Freq (Hz)", "Mode", "Cycles", "Duty (%)", "Error (pp)"
    );
    println!("{:-<10}-+-{:-<11}-+-{:-<8}-+-{:-<12}-+-{:-<10}", "", "", "", "", "");

    let mut ceiling = [None, None];

    for frequency in CALIBRATION_FREQUENCIES_HZ {
        for (column, realtime) in [false, true].into_iter().enumerate() {
            recorder.take_edges(pin);
            registry.set_pwm(CALIBRATION_PIN, frequency, CALIBRATION_DUTY, realtime)?;
            thread::sleep(Duration::from_millis(CALIBRATION_WINDOW_MS));
            registry.deinit_gpio(CALIBRATION_PIN)?;

            let mode = if realtime { "realtime" } else { "cooperative" };
            match measure_duty(&recorder.take_edges(pin)) {
                Some(stats) => {
                    let duty = stats.duty * 100.0;
                    let error = (duty - f64::from(CALIBRATION_DUTY)).abs();
                    if error <= ACCEPTABLE_ERROR {
                        ceiling[column] = Some(frequency);
                    }
                    println!(
                        "{:>10} | {:^11} | {:>8} | {:>12.2} | {:>10.2}",
                        frequency, mode, stats.cycles, duty, error
                    );
                }
                None => println!("{:>10} | {:^11} | {:>8} | {:>12} | {:>10}", frequency, mode, 0, "-", "-"),
            }
        }
    }

    if !registry.error_text().is_empty() {
        println!("\nLast error: {}", registry.error_text());
    }

    println!(
        "\nHighest accurate frequency (within {:.1} pp, reference {} Hz):",
        ACCEPTABLE_ERROR, COOPERATIVE_ACCURACY_CEILING_HZ
    );
    for (label, value) in ["cooperative", "realtime"].iter().zip(ceiling) {
        match value {
            Some(hz) => println!("  {:<12} {} Hz", label, hz),
            None => println!("  {:<12} none", label),
        }
    }

    Ok(())
}
