mod channels;
mod config;
mod deployment;
#[cfg(feature = "serve")]
mod geo;
mod launcher;
mod locator;
mod lock;
mod logs;
#[cfg(feature = "serve")]
mod serve;
mod signals;
mod signature;
mod stats;
mod status;
mod supervisor;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::channels::ConfigStore;
use crate::config::ConsoleConfig;
use crate::deployment::Deployment;
use crate::launcher::WorkerLauncher;
use crate::locator::{ProcessLocator, SysinfoTable};
use crate::lock::ConsoleLock;
use crate::signals::NixTerminator;
use crate::stats::HistoryStats;
use crate::status::{ControlReply, StatusReport};
use crate::supervisor::{Supervisor, SupervisorPolicy};

/// Operator console for a single long-running ingest-and-republish worker:
/// check it, start it, stop it, read its log and edit its channel config.
#[derive(Parser, Debug)]
#[command(name = "shepherd", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "shepherd.toml")]
    config: PathBuf,

    /// Debug logging (liveness checks, signal delivery)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the console HTTP API
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show whether the worker is running
    Status,
    /// Start the worker unless it is already running
    Start,
    /// Stop every worker process, escalating to SIGKILL if needed
    Stop,
    /// Stop, pause, start
    Restart,
    /// Print the tail of the worker log
    Logs {
        /// Number of lines
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },
    /// Print the worker's channel configuration
    ShowConfig,
    /// Print processing statistics
    Stats,
    /// Look up where a proxy host is (host[:port:user:pass])
    CheckProxy { proxy: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "shepherd=debug"
    } else {
        "shepherd=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ConsoleConfig::load(&cli.config)?;
    let deployment = Deployment::from_config(&config.worker);

    match cli.command {
        Command::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.serve.bind = bind;
            }
            if let Some(port) = port {
                config.serve.port = port;
            }
            let supervisor = Arc::new(build_supervisor(&config, &deployment)?);
            serve_api(&config, supervisor).await
        }
        Command::Status => {
            let supervisor = build_supervisor(&config, &deployment)?;
            let state = supervisor.status()?;
            println!("{}", StatusReport::new(&state, None).render());
            Ok(())
        }
        command @ (Command::Start | Command::Stop | Command::Restart) => {
            let _lock = ConsoleLock::acquire(&deployment.lock())?;
            let supervisor = build_supervisor(&config, &deployment)?;
            let reply = control(&supervisor, &command).await?;
            println!("{}", reply.message);
            if !reply.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Logs { lines } => {
            for line in logs::tail(deployment.log_file(), logs::clamp_lines(lines)) {
                println!("{line}");
            }
            Ok(())
        }
        Command::ShowConfig => {
            let store = ConfigStore::new(deployment.config_file());
            let document = store.load();
            println!("# {}", store.path().display());
            println!("{}", serde_json::to_string_pretty(&document)?);
            if let Err(problems) = document.validate() {
                for p in problems {
                    eprintln!("warning: {p}");
                }
            }
            Ok(())
        }
        Command::Stats => {
            println!("{}", HistoryStats::load(deployment.history_file()).render());
            Ok(())
        }
        Command::CheckProxy { proxy } => {
            let proxy: channels::ProxyConfig = proxy.parse()?;
            check_proxy(&config, &proxy.host).await
        }
    }
}

#[cfg(feature = "serve")]
async fn serve_api(
    config: &ConsoleConfig,
    supervisor: Arc<Supervisor>,
) -> Result<(), Box<dyn std::error::Error>> {
    serve::run(config, supervisor).await
}

#[cfg(not(feature = "serve"))]
async fn serve_api(
    _config: &ConsoleConfig,
    _supervisor: Arc<Supervisor>,
) -> Result<(), Box<dyn std::error::Error>> {
    Err("shepherd was built without the `serve` feature".into())
}

#[cfg(feature = "serve")]
async fn check_proxy(
    config: &ConsoleConfig,
    host: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = geo::GeoLocator::new(&config.geo).lookup(host).await;
    println!("{host}: {}", result.country);
    Ok(())
}

#[cfg(not(feature = "serve"))]
async fn check_proxy(
    _config: &ConsoleConfig,
    _host: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    Err("shepherd was built without the `serve` feature".into())
}

fn build_supervisor(
    config: &ConsoleConfig,
    deployment: &Deployment,
) -> Result<Supervisor, Box<dyn std::error::Error>> {
    let signature = config.worker_signature()?;
    let launcher = WorkerLauncher::new(&config.worker, deployment);
    tracing::debug!(
        root = %deployment.root().display(),
        program = %launcher.program().display(),
        executable = signature.executable_pattern(),
        argument = signature.argument_pattern(),
        "supervising worker"
    );
    let locator = ProcessLocator::new(Arc::new(SysinfoTable), signature);
    Ok(Supervisor::new(
        locator,
        Arc::new(NixTerminator),
        Arc::new(launcher),
        SupervisorPolicy::from(&config.supervisor),
    ))
}

/// Run a mutating command. Refusals come back as unsuccessful replies;
/// infrastructure failures are errors.
async fn control(
    supervisor: &Supervisor,
    command: &Command,
) -> Result<ControlReply, Box<dyn std::error::Error>> {
    match command {
        Command::Start => match supervisor.start().await {
            Ok(worker) => {
                println!(
                    "log: {} (spawned {})",
                    worker.log_file.display(),
                    worker.spawned_at.to_rfc3339()
                );
                Ok(ControlReply::started(&worker))
            }
            Err(e) if e.is_infrastructure() => Err(e.into()),
            Err(e) => Ok(ControlReply::refused(&e)),
        },
        Command::Stop => Ok(ControlReply::stopped(&supervisor.stop().await?)),
        Command::Restart => {
            let report = supervisor.restart().await?;
            let reply = ControlReply::restarted(&report);
            match report.start {
                Err(e) if e.is_infrastructure() => Err(e.into()),
                _ => Ok(reply),
            }
        }
        _ => Err(format!("{command:?} is not a control command").into()),
    }
}
