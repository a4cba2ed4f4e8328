use clap::{Parser, Subcommand};
use lantern_desktop_lib::{
    supervisor_from_environment, EnvironmentId, Supervisor, SupervisorError, SupervisorEvent,
};
use log::error;
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "lantern", version, about = "Lantern local server launcher")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Live server status
    Status,
    Start,
    Stop,
    Restart,
    /// Install or update the server in the current environment
    Install,
    /// Remove the current environment's install root
    Uninstall,
    /// Print captured server output
    Logs {
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: usize,
    },
    Env {
        #[command(subcommand)]
        command: Option<EnvCommand>,
    },
    /// URL for opening Lantern from another device
    Lan,
    /// LAN URL as an SVG QR code
    Qr,
    /// Node.js runtime status
    Runtime,
    /// Start the server and stream its output until Ctrl-C
    Run,
}

#[derive(Subcommand, Debug)]
enum EnvCommand {
    Show,
    /// Select `default`, `development` or `custom <path>`
    Set {
        id: EnvironmentId,
        path: Option<PathBuf>,
    },
}

fn print_event(event: &SupervisorEvent, as_json: bool) {
    if as_json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{}", line);
        }
        return;
    }
    match event {
        SupervisorEvent::StatusChanged(state) => println!("status: {}", state),
        SupervisorEvent::LogLine(line) => println!("{}", line),
        SupervisorEvent::InstallProgress(_) => {}
    }
}

/// Drive `op` to completion, printing events it causes along the way
async fn follow<F>(supervisor: &Supervisor, op: F, as_json: bool) -> Result<(), SupervisorError>
where
    F: Future<Output = Result<(), SupervisorError>>,
{
    let mut events = supervisor.subscribe();
    tokio::pin!(op);
    loop {
        tokio::select! {
            result = &mut op => {
                for event in events.drain() {
                    print_event(&event, as_json);
                }
                return result;
            }
            Some(event) = events.recv() => print_event(&event, as_json),
        }
    }
}

async fn run(cli: Cli) -> Result<(), SupervisorError> {
    let supervisor = supervisor_from_environment()?;
    let as_json = cli.json;

    match cli.command {
        Commands::Status => {
            let state = supervisor.get_status().await;
            if as_json {
                println!(
                    "{}",
                    json!({ "status": state, "environment": supervisor.get_environment() })
                );
            } else {
                println!("{}", state);
            }
        }
        Commands::Start => follow(&supervisor, supervisor.start(), as_json).await?,
        Commands::Stop => supervisor.stop().await,
        Commands::Restart => follow(&supervisor, supervisor.restart(), as_json).await?,
        Commands::Install => follow(&supervisor, supervisor.install(), as_json).await?,
        Commands::Uninstall => supervisor.uninstall().await?,
        Commands::Logs { lines } => {
            for line in supervisor.get_logs(lines) {
                println!("{}", line);
            }
        }
        Commands::Env { command } => {
            let environment = match command {
                None | Some(EnvCommand::Show) => supervisor.get_environment(),
                Some(EnvCommand::Set { id, path }) => supervisor.set_environment(id, path).await?,
            };
            if as_json {
                println!("{}", json!(environment));
            } else {
                println!("{}: {}", environment.label, environment.install_root.display());
            }
        }
        Commands::Lan => println!("{}", supervisor.get_lan_url()?),
        Commands::Qr => println!("{}", supervisor.get_qr_code()?),
        Commands::Runtime => {
            let status = supervisor.runtime_status().await;
            println!("{}", json!(status));
        }
        Commands::Run => {
            tokio::select! {
                result = follow(&supervisor, supervisor.start(), as_json) => result?,
                _ = tokio::signal::ctrl_c() => {
                    supervisor.shutdown().await;
                    return Ok(());
                }
            }

            let mut events = supervisor.subscribe();
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => print_event(&event, as_json),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            supervisor.shutdown().await;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let as_json = cli.json;
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            if as_json {
                eprintln!("{}", e.to_json());
            } else {
                eprintln!("{}", e.user_message());
            }
            ExitCode::FAILURE
        }
    }
}
