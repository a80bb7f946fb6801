//! Best-effort realtime scheduling for generator threads.
//!
//! On Linux `sched_setscheduler(0, ..)` applies to the calling thread only,
//! so each generator negotiates its own class. Denial is reported, never fatal.

use crate::error::PwmError;

/// Move the calling thread to SCHED_FIFO at `priority`.
#[cfg(target_os = "linux")]
pub fn elevate(priority: i32) -> Result<(), PwmError> {
    set_scheduler(libc::SCHED_FIFO, priority)
}

/// Return the calling thread to the default time-sharing class.
#[cfg(target_os = "linux")]
pub fn relax() -> Result<(), PwmError> {
    set_scheduler(libc::SCHED_OTHER, 0)
}

/// True if the calling thread currently runs in a realtime class.
#[cfg(target_os = "linux")]
pub fn is_realtime() -> bool {
    let policy = unsafe { libc::sched_getscheduler(0) };
    policy == libc::SCHED_FIFO || policy == libc::SCHED_RR
}

#[cfg(target_os = "linux")]
fn set_scheduler(policy: libc::c_int, priority: i32) -> Result<(), PwmError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, policy, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(PwmError::PriorityDenied(format!(
            "sched_setscheduler(policy {policy}, priority {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn elevate(_priority: i32) -> Result<(), PwmError> {
    Err(PwmError::PriorityDenied(
        "realtime scheduling is only supported on Linux".to_string(),
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn relax() -> Result<(), PwmError> {
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn is_realtime() -> bool {
    false
}
