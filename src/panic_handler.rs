//! Panic hook for the pipeline binaries.
//!
//! A panic in a producer or consumer is logged through `tracing` with the
//! process role, so it lands next to the step narrative instead of only on
//! raw stderr. The process still unwinds and exits non-zero, which the
//! orchestrator reports as a failed step.

use std::any::Any;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{error, warn};

static PANIC_HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);
static PANIC_COUNT: AtomicU64 = AtomicU64::new(0);

/// Install the hook once per process; later calls are ignored.
///
/// `role` names the process in the log line, e.g. `producer:orders`.
pub fn install_panic_hook(role: &str) {
    if PANIC_HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        warn!("Panic hook already installed, skipping");
        return;
    }

    let role = role.to_string();
    panic::set_hook(Box::new(move |info| {
        PANIC_COUNT.fetch_add(1, Ordering::SeqCst);
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        let message = payload_message(info.payload());
        let thread = std::thread::current();

        error!(
            role = %role,
            location = %location,
            thread = thread.name().unwrap_or("unnamed"),
            "Panic: {message}"
        );
        if std::env::var("RUST_BACKTRACE").is_err() {
            warn!("Set RUST_BACKTRACE=1 for a backtrace");
        }
    }));

    tracing::debug!("Panic hook installed");
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub fn is_panic_hook_installed() -> bool {
    PANIC_HOOK_INSTALLED.load(Ordering::SeqCst)
}

/// Panics observed by the hook in this process.
pub fn panic_count() -> u64 {
    PANIC_COUNT.load(Ordering::SeqCst)
}
