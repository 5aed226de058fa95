//! KODEGEN Bundler Pipeline: builds, signs, verifies and publishes installers.

use kodegen_bundler_pipeline::EnvConfig;
use kodegen_bundler_pipeline::cli;
use kodegen_bundler_pipeline::cli::OutputManager;
use std::process;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    env_logger::init();

    // Library code only ever sees this snapshot.
    let env = EnvConfig::capture();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received; cancelling run");
            on_interrupt.cancel();
        }
    });

    match cli::run(env, cancel).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            let output = OutputManager::new(false, false);
            output.error(&format!("Fatal error: {e}"));

            let suggestions = e.recovery_suggestions();
            if !suggestions.is_empty() {
                let _ = output.println("\n💡 Recovery suggestions:");
                for suggestion in suggestions {
                    let _ = output.indent(&suggestion);
                }
            }

            process::exit(cli::exit_code_for(&e));
        }
    }
}
