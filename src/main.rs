use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use swpwm::PwmRegistry;
use swpwm::config::{DEMO_FREQUENCY_HZ, DEMO_PIN, DEMO_STEP_SECS};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Duty cycle steps the demo walks through (%).
const DUTY_STEPS: [u32; 5] = [0, 25, 50, 75, 100];

// Usage:
//  Connect an LED (with resistor) to GPIO 20.
//  The LED is dimmed through 0% → 25% → 50% → 75% → 100% and starts over.
//  Ctrl+C stops the generator and leaves the pin low.
fn main() {
    setup_tracing();

    if let Err(e) = run() {
        error!("software pwm demo failed: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("*** software pwm demo ***");
    println!("stop program with Ctrl+C\n");

    let registry = PwmRegistry::open()?;

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running_clone.store(false, Ordering::SeqCst);
    })?;

    println!("  Output: GPIO {}", DEMO_PIN);
    println!("  Frequency: {} Hz", DEMO_FREQUENCY_HZ);
    println!("  Step: {} s\n", DEMO_STEP_SECS);

    let step = Duration::from_secs(DEMO_STEP_SECS);
    let mut next_step = Instant::now();
    let mut steps = DUTY_STEPS.iter().cycle();

    while running.load(Ordering::SeqCst) {
        if Instant::now() >= next_step {
            let duty = *steps.next().unwrap_or(&0);
            registry.set_pwm(DEMO_PIN, DEMO_FREQUENCY_HZ, duty, false)?;
            println!(
                "  → GPIO {}: {} Hz, {}% duty",
                DEMO_PIN,
                registry.get_pwm_frequency(DEMO_PIN),
                registry.get_pwm_dutycycle(DEMO_PIN)
            );
            next_step += step;
        }
        thread::sleep(Duration::from_millis(50));
    }

    registry.deinit_gpio(DEMO_PIN)?;
    registry.shutdown();
    println!("\nprogram stopped");
    Ok(())
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
