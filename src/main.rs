//! opsguard binary entry point.

use std::process::ExitCode;

use opsguard::{api, cli, logging, Config};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Run 'opsguard --help' for usage.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if logging::init_with_level(config.log_filter()).is_err() {
        eprintln!("warning: logging was already initialized");
    }

    info!("opsguard v{}", env!("CARGO_PKG_VERSION"));

    // A malformed policy, root list or limiter must stop startup.
    let state = match config.build_state() {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let server_config = match config.to_server_config() {
        Ok(server_config) => server_config,
        Err(e) => {
            error!(error = %e, "invalid server configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(
        roots = state.validator.paths().roots().len(),
        rate_limit = state.limiter.is_enabled(),
        "security layer initialized"
    );

    match api::serve_with_state(server_config, state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server error");
            ExitCode::FAILURE
        }
    }
}
