//! Entry point for the `ottoman` query server.

use std::io::{self, BufReader};
use std::process::ExitCode;

use ottoman::{SystemConfigLoader, bootstrap_with};

fn main() -> ExitCode {
    let bootstrapped = match bootstrap_with(&SystemConfigLoader) {
        Ok(bootstrapped) => bootstrapped,
        Err(error) => {
            report(&error);
            return ExitCode::FAILURE;
        }
    };

    match bootstrapped.serve(BufReader::new(io::stdin()), io::stdout()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "query server stopped");
            ExitCode::FAILURE
        }
    }
}

#[expect(
    clippy::print_stderr,
    reason = "telemetry is not available before bootstrap completes"
)]
fn report(error: &dyn std::error::Error) {
    eprintln!("ottoman: {error}");
}
