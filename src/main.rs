use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use jaffle_cli::config::{CONFIG_FILE_NAME, JaffleConfig, load_config};
use jaffle_cli::logging::init_tracing;
use jaffle_cli::orchestrator::{Orchestrator, STOP_TIMEOUT};
use jaffle_cli::state::{Status, status_path};
use jaffle_cli::template::FunctionRegistry;
use jaffle_cli::variables::runtime_variables;

#[derive(Parser)]
#[command(name = "jaffle")]
#[command(
	author,
	version,
	about = "Development-environment orchestrator with templated config and file-watch actions"
)]
#[command(arg_required_else_help = true)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Start kernels, apps and processes from the config files
	Start {
		/// Config files, merged in order (default: jaffle.toml)
		#[arg(value_name = "FILE")]
		files: Vec<PathBuf>,

		/// Variable values, overriding J_VAR_* environment variables
		#[arg(long, value_name = "NAME=VALUE", num_args = 1..)]
		variables: Vec<String>,
	},
	/// Configuration management commands
	Config {
		#[command(subcommand)]
		action: ConfigAction,
	},
	/// Stop the instance running in the current directory
	Stop {
		/// Seconds to wait after SIGTERM before sending SIGKILL
		#[arg(long, value_name = "SECONDS", default_value_t = STOP_TIMEOUT.as_secs())]
		timeout: u64,
	},
	/// Show the status of the instance running in the current directory
	Status,
}

#[derive(Subcommand)]
enum ConfigAction {
	/// Print the merged, rendered configuration as JSON
	Show {
		#[arg(value_name = "FILE")]
		files: Vec<PathBuf>,
	},
	/// Check the config files for errors without starting anything
	Validate {
		#[arg(value_name = "FILE")]
		files: Vec<PathBuf>,
	},
}

fn main() -> ExitCode {
	init_tracing();
	match run() {
		Ok(code) => code,
		Err(e) => {
			eprintln!("error: {e:?}");
			ExitCode::FAILURE
		}
	}
}

fn run() -> Result<ExitCode> {
	let cli = Cli::parse();

	match cli.command {
		Commands::Start { files, variables } => handle_start(&files, &variables),
		Commands::Config { action } => match action {
			ConfigAction::Show { files } => handle_config_show(&files),
			ConfigAction::Validate { files } => handle_config_validate(&files),
		},
		Commands::Stop { timeout } => handle_stop(Duration::from_secs(timeout)),
		Commands::Status => handle_status(),
	}
}

fn config_files(files: &[PathBuf]) -> Vec<PathBuf> {
	if files.is_empty() {
		vec![PathBuf::from(CONFIG_FILE_NAME)]
	} else {
		files.to_vec()
	}
}

fn load(files: &[PathBuf], assignments: &[String]) -> Result<JaffleConfig> {
	let overrides = runtime_variables(std::env::vars(), assignments).context("Invalid variable assignment")?;
	load_config(&config_files(files), &overrides, FunctionRegistry::builtin()).context("Failed to load configuration")
}

fn handle_start(files: &[PathBuf], variables: &[String]) -> Result<ExitCode> {
	let cwd = std::env::current_dir().context("Failed to get current directory")?;
	let config = load(files, variables)?;
	let orchestrator = Orchestrator::new(config, cwd);

	let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
	runtime.block_on(async {
		// Install the handlers before the status file exists so `jaffle stop` is never lost.
		let shutdown = shutdown_signal().context("Failed to install signal handlers")?;
		orchestrator.run(shutdown).await?;
		Ok::<(), anyhow::Error>(())
	})?;

	Ok(ExitCode::SUCCESS)
}

/// Completes on Ctrl+C, or on SIGTERM from `jaffle stop`.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut interrupt = signal(SignalKind::interrupt())?;
	let mut terminate = signal(SignalKind::terminate())?;
	Ok(async move {
		tokio::select! {
			_ = interrupt.recv() => tracing::info!("Received Ctrl+C"),
			_ = terminate.recv() => tracing::info!("Received SIGTERM"),
		}
	})
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()>> {
	Ok(async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!("Failed to listen for Ctrl+C: {}", e);
			std::future::pending::<()>().await;
		}
	})
}

#[cfg(unix)]
fn handle_stop(timeout: Duration) -> Result<ExitCode> {
	use jaffle_cli::orchestrator::{StopOutcome, stop_running};

	let cwd = std::env::current_dir().context("Failed to get current directory")?;
	let path = status_path(&cwd);

	match stop_running(&path, timeout).with_context(|| format!("Failed to stop jaffle ({})", path.display()))? {
		StopOutcome::NotRunning => {
			eprintln!("jaffle is not running.");
			Ok(ExitCode::FAILURE)
		}
		StopOutcome::Stale => {
			println!("jaffle had already stopped; removed {}", path.display());
			Ok(ExitCode::SUCCESS)
		}
		StopOutcome::Stopped { pid } => {
			println!("Stopped jaffle (pid {pid}).");
			Ok(ExitCode::SUCCESS)
		}
		StopOutcome::Killed { pid } => {
			println!("Killed jaffle (pid {pid}) after it ignored SIGTERM.");
			Ok(ExitCode::SUCCESS)
		}
	}
}

#[cfg(not(unix))]
fn handle_stop(_timeout: Duration) -> Result<ExitCode> {
	anyhow::bail!("jaffle stop needs a unix platform")
}

fn handle_status() -> Result<ExitCode> {
	let cwd = std::env::current_dir().context("Failed to get current directory")?;
	let path = status_path(&cwd);

	if !path.exists() {
		println!("jaffle is not running.");
		return Ok(ExitCode::SUCCESS);
	}

	let status = Status::load(&path).with_context(|| format!("Failed to read {}", path.display()))?;

	if let Some(pid) = status.pid {
		println!("pid: {pid}");
	}
	if let Some(port) = status.port {
		println!("port: {port}");
	}

	println!("sessions:");
	for session in status.sessions.values() {
		match &session.kernel {
			Some(kernel) => println!("  {} ({}, {})", session.name, kernel.name, session.id),
			None => println!("  {} ({})", session.name, session.id),
		}
	}

	println!("apps:");
	for app in status.apps.values() {
		match &app.session_name {
			Some(session) => println!("  {} [{}] on {}", app.name, app.class, session),
			None => println!("  {} [{}]", app.name, app.class),
		}
	}

	if !status.variables.is_empty() {
		println!("variables:");
		for (name, value) in &status.variables {
			println!("  {name} = {value}");
		}
	}

	Ok(ExitCode::SUCCESS)
}
