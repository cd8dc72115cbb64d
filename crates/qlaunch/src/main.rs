//! qlaunch - typed PBS job launcher for the K2 light-curve analyses.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use miette::Result;
use qlaunch_cli::Args;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn log_level(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    // RUST_LOG wins over -v/-q
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level(verbose, quiet)));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    commands::dispatch(&args).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0, false), "warn");
        assert_eq!(log_level(2, false), "debug");
        assert_eq!(log_level(9, false), "trace");
        assert_eq!(log_level(0, true), "error");
    }
}
