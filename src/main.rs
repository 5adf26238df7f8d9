use std::{env, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result, anyhow};
use childcare::{
    Config, Role,
    config::{self, HELP},
    supervisor::{self, WORKER_ARG},
};
use tracing_subscriber::{EnvFilter, fmt};

const EXIT_USAGE: u8 = 1;
const EXIT_RUNTIME: u8 = 2;

fn main() -> ExitCode {
    init_tracing();
    let args: Vec<String> = env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some(WORKER_ARG) {
        return match worker_process(&args[1..]) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::from(EXIT_RUNTIME)
            }
        };
    }

    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}.");
            print!("{HELP}");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let log_path = config::output_path();
    match supervisor::run_processes(&config, &log_path)
        .with_context(|| format!("simulation failed (log: {})", log_path.display()))
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

fn worker_process(args: &[String]) -> Result<()> {
    let [role, segment, log_path] = args else {
        return Err(anyhow!("usage: {WORKER_ARG} <adult|child> <segment> <log path>"));
    };
    let role: Role = role.parse().map_err(|e: String| anyhow!(e))?;
    let id = supervisor::run_worker_process(role, segment, &PathBuf::from(log_path))
        .with_context(|| format!("{} worker on {segment}", role.as_str()))?;
    tracing::debug!(role = role.as_str(), id, "worker done");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
