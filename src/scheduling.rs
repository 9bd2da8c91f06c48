use std::io;

use nix::libc;

/// Asks the kernel for realtime scheduling to reduce sender/receiver jitter.
///
/// Switches the process to `SCHED_FIFO` at the highest priority and lowers its
/// nice value to -19. Both steps are best effort: without `CAP_SYS_NICE` they
/// fail, which is logged and otherwise ignored.
pub fn request_realtime() {
    let priority = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    if priority == -1 {
        log::warn!(
            "sched_get_priority_max(SCHED_FIFO) failed: {}",
            io::Error::last_os_error()
        );
    } else {
        let param = libc::sched_param {
            sched_priority: priority,
        };
        let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
        if ret == -1 {
            log::warn!(
                "sched_setscheduler(SCHED_FIFO) failed: {}",
                io::Error::last_os_error()
            );
        } else {
            log::info!("Running with SCHED_FIFO priority {}", priority);
        }
    }

    let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, -19) };
    if ret == -1 {
        log::warn!("setpriority(-19) failed: {}", io::Error::last_os_error());
    }
}
