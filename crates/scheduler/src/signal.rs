//! Interrupt handling: the first interrupt stops gracefully, the second exits.

use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use trawl_plugin::{Interrupt, RunStatus};

/// Exit status used when a second interrupt cuts the shutdown short.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Wait for Ctrl+C, or SIGTERM on unix.
async fn next_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = async {
        terminate.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        () = terminate => Ok(()),
    }
}

/// Apply one interrupt to the run status. Returns `true` when the process
/// should exit immediately.
fn on_interrupt(status: &RunStatus) -> bool {
    match status.interrupt() {
        Interrupt::Stopping => {
            info!("Interrupt received; finishing current work (interrupt again to exit immediately)");
            false
        },
        Interrupt::Escalate => {
            warn!("Second interrupt received; exiting without waiting for plugins");
            true
        },
    }
}

/// Spawn a task that turns process interrupts into stop requests on
/// `status`. A second interrupt exits the process with
/// [`INTERRUPTED_EXIT_CODE`].
pub fn install_interrupt_handler(status: RunStatus) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(err) = next_signal().await {
                error!(error = %err, "Unable to listen for interrupts");
                return;
            }
            if on_interrupt(&status) {
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
        }
    })
}
