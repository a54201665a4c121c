use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use pai_supervisor::dependency::binary::BinaryAcquisitionResult;
use pai_supervisor::dependency::logs::read_rotated_logs;
use pai_supervisor::dependency::{
    BinaryProvisioner, ExecutableLocator, LogSink, ServiceKind, ServiceSupervisor, StatusEvent,
    StatusListener, SupervisorConfig, UiEvent,
};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Desktop shell supervisor for the PAI assistant's local services.
#[derive(Parser, Debug)]
#[command(name = "pai-shell", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start both services and supervise them until Ctrl-C
    Run {
        /// Print status events as JSON lines instead of text
        #[arg(long)]
        json: bool,
    },
    /// Make sure the Qdrant binary is installed, then exit
    Provision,
    /// Print the persisted service log
    Logs {
        /// Only print the last N lines
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },
}

/// Prints status updates for a terminal or a webview bridge
struct ConsoleListener {
    json: bool,
    /// Closes the session when startup fails
    close: mpsc::Sender<UiEvent>,
}

impl StatusListener for ConsoleListener {
    fn on_status(&self, event: &StatusEvent) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Failed to serialize status event"),
            }
        } else {
            println!("[{:?}] {}", event.overall, event.text);
        }
    }

    fn on_readiness(&self, ready: bool) {
        if self.json {
            println!("{}", serde_json::json!({ "ready": ready }));
        } else if ready {
            println!("PAI assistant is ready. Press Ctrl-C to quit.");
        } else {
            println!("PAI assistant failed to start.");
        }

        if !ready {
            let _ = self.close.try_send(UiEvent::WindowClosed);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pai_supervisor=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = SupervisorConfig::from_env();

    match cli.command.unwrap_or(Command::Run { json: false }) {
        Command::Run { json } => run(config, json).await,
        Command::Provision => provision(config).await,
        Command::Logs { lines } => print_logs(&config, lines),
    }
}

async fn run(config: SupervisorConfig, json: bool) -> Result<()> {
    config.validate()?;
    config.prepare_dirs()?;

    let sink = Arc::new(
        LogSink::with_file(config.buffer_lines, &config.log_file())
            .context("Failed to open the service log")?,
    );
    info!(log = %config.log_file().path.display(), "Persisting service output");

    let (events_tx, mut events_rx) = mpsc::channel(4);
    let listener = Arc::new(ConsoleListener {
        json,
        close: events_tx.clone(),
    });
    let mut supervisor = ServiceSupervisor::new(&config, sink, listener)?;

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
        let _ = events_tx.send(UiEvent::WindowClosed).await;
    });

    let report = supervisor.run_until_closed(&mut events_rx).await;
    info!(
        final_status = ?report.final_status,
        stop_request_acknowledged = report.stop_request_acknowledged,
        "Session ended"
    );

    match supervisor.failure_text() {
        Some(text) => anyhow::bail!("Startup failed:\n{text}"),
        None => Ok(()),
    }
}

async fn provision(config: SupervisorConfig) -> Result<()> {
    config.validate()?;

    let target = match config.qdrant_locator()? {
        ExecutableLocator::Path(path) => {
            println!("Using pre-installed Qdrant at {}", path.display());
            return Ok(());
        }
        ExecutableLocator::Provisioned(target) => target,
    };

    let provisioner = BinaryProvisioner::new(ServiceKind::VectorDb.process_name())?;
    let progress = |p: pai_supervisor::dependency::ProvisionProgress| {
        print!("\rDownloading Qdrant... {}", p.describe());
        let _ = std::io::stdout().flush();
    };

    match provisioner.acquire(&target, &progress).await? {
        BinaryAcquisitionResult::Existing(path) => {
            println!("Qdrant already installed at {}", path.display());
        }
        BinaryAcquisitionResult::Downloaded(path) => {
            println!("\nQdrant installed at {}", path.display());
        }
    }
    Ok(())
}

fn print_logs(config: &SupervisorConfig, lines: Option<usize>) -> Result<()> {
    let log_file = config.log_file();
    let contents = read_rotated_logs(&log_file.path, log_file.backups)?;

    if contents.is_empty() {
        println!("No log file found at {}", log_file.path.display());
        return Ok(());
    }

    match lines {
        Some(n) => {
            let all: Vec<&str> = contents.lines().collect();
            for line in &all[all.len().saturating_sub(n)..] {
                println!("{line}");
            }
        }
        None => print!("{contents}"),
    }
    Ok(())
}
