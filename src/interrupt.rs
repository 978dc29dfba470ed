//! Operator interrupts.
//!
//! The first Ctrl-C raises a flag the supervisor checks between ticks, so
//! processors already running can finish their pass. A second Ctrl-C exits
//! immediately.

use std::io;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{error, warn};

/// Exit status for an interrupted run (128 + SIGINT).
pub const EXIT_INTERRUPTED: i32 = 130;

/// A flag raised when the operator asks us to stop.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Start listening for SIGINT on a background thread.
pub fn install() -> io::Result<Interrupt> {
    let interrupt = Interrupt::default();
    let raised = interrupt.clone();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to listen for interrupts");
                    return;
                }
                warn!("interrupted; waiting for active processors to finish (Ctrl-C again to exit now)");
                raised.raise();

                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted again; exiting");
                    process::exit(EXIT_INTERRUPTED);
                }
            });
        })?;

    Ok(interrupt)
}
