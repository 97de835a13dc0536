// ringlogd: TCP command log daemon
use std::fs::OpenOptions;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use ringlog_core::{to_exit_code, Error, ErrorKind};
use ringlog_daemon::cli::Cli;
use ringlog_daemon::Server;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(log_file: Option<&Path>) -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true);

    let installed = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| {
                    Error::new(ErrorKind::Init)
                        .with_message("cannot open log file")
                        .with_path(path)
                        .with_source(err)
                })?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|err| {
        Error::new(ErrorKind::Init).with_message(format!("cannot install logger: {err}"))
    })
}

fn run(cli: Cli) -> Result<(), Error> {
    let config = cli.server_config()?;
    let server = Server::bind(config)?;

    // the port is bound before detaching so bind errors reach the terminal
    if cli.daemon {
        nix::unistd::daemon(false, false).map_err(|err| {
            Error::new(ErrorKind::Init)
                .with_message("cannot detach")
                .with_source(err)
        })?;
        info!(pid = std::process::id(), "running in background");
    }

    let shutdown = server.shutdown_handle();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, shutdown.clone()).map_err(|err| {
            Error::new(ErrorKind::Init)
                .with_message(format!("cannot register handler for signal {signal}"))
                .with_source(err)
        })?;
    }

    server.run()?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.log_file.as_deref()) {
        eprintln!("ringlogd: {err}");
        return ExitCode::from(to_exit_code(err.kind()) as u8);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "ringlogd failed");
            ExitCode::from(to_exit_code(err.kind()) as u8)
        }
    }
}
