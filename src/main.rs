use std::io::{stdin, stdout};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use quarry::cli::Cli;
use quarry::config::load_effective_config;
use quarry::server::StdioServer;

fn main() -> ExitCode {
    // Logging goes to stderr; stdout carries only JSON-line responses.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match load_effective_config(&cli.repo_root, &cli.overrides()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("quarry: configuration error: {error}");
            return ExitCode::from(2);
        }
    };

    let server = match StdioServer::new(config) {
        Ok(server) => server,
        Err(error) => {
            eprintln!("quarry: startup error: {error:#}");
            return ExitCode::from(2);
        }
    };

    // Serve until input EOF; a broken pipe mid-stream is a hard failure.
    match server.serve(stdin().lock(), stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("quarry: transport error: {error:#}");
            ExitCode::from(1)
        }
    }
}
