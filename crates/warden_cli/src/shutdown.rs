use console::Term;
use warden::Shutdown;

/// Set up the Ctrl+C handler for graceful shutdown.
///
/// The first Ctrl+C requests a cooperative stop: in-flight waits return
/// early and each organization still records its run. A second one exits
/// immediately with status 130.
pub(crate) fn setup_shutdown_handler(shutdown: Shutdown) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            return;
        }

        let is_tty = Term::stderr().is_term();
        if is_tty {
            eprintln!("\n\nShutdown requested, finishing current operations...");
            eprintln!("Press Ctrl+C again to force quit.");
        } else {
            tracing::warn!("Shutdown requested, finishing current operations");
        }

        shutdown.request();

        if tokio::signal::ctrl_c().await.is_ok() {
            if is_tty {
                eprintln!("Force quit!");
            }
            std::process::exit(130);
        }
    });
}
