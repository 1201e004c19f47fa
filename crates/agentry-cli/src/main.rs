use std::io::Write;
use std::path::PathBuf;

use agentry_config::{find_config_path, load_with_env, Config};
use agentry_core::{Catalog, RunEvent, RunOptions, Runtime};
use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser)]
#[command(name = "agentry", about = "Agents and teams over an OpenAI-compatible API", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Listen host (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Listen port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// List agent ids
    Agents,
    /// List team ids
    Teams,
    /// List tool set ids
    Toolsets,
    /// Send one message to an agent (or team) and stream the answer
    Run {
        /// Agent id, or team id with --team
        id: String,
        /// Message to send
        #[arg(short, long)]
        message: String,
        /// Treat the id as a team
        #[arg(long)]
        team: bool,
        /// Model override (gpt-4.1, o4-mini, o3)
        #[arg(long)]
        model: Option<String>,
        /// User id for memories
        #[arg(short, long)]
        user: Option<String>,
        /// Session id to continue
        #[arg(short, long)]
        session: Option<String>,
        /// Log tool traffic at info level
        #[arg(long)]
        debug: bool,
    },
    /// Fetch and index an agent's knowledge sources
    LoadKnowledge {
        agent_id: String,
        /// Skip documents whose content has not changed
        #[arg(long)]
        no_upsert: bool,
    },
}

fn init_logging(config: &Config) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(find_config_path);
    let mut config = load_with_env(&config_path)?;
    init_logging(&config);
    info!("Config: {}", config_path.display());

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            agentry_api::serve(config).await
        }
        Commands::Agents => {
            let catalog = Catalog::builtin(Runtime::in_memory(config)?);
            for id in catalog.available_agents() {
                let name = catalog
                    .agent_config(&id)
                    .map(|c| c.name.as_str())
                    .unwrap_or_default();
                println!("{id}\t{name}");
            }
            Ok(())
        }
        Commands::Teams => {
            let catalog = Catalog::builtin(Runtime::in_memory(config)?);
            for id in catalog.available_teams() {
                if let Some(cfg) = catalog.team_config(&id) {
                    println!("{id}\t{} ({}: {})", cfg.name, cfg.mode, cfg.members.join(", "));
                }
            }
            Ok(())
        }
        Commands::Toolsets => {
            let catalog = Catalog::builtin(Runtime::in_memory(config)?);
            for id in catalog.available_toolsets() {
                let name = catalog.toolset_config(&id).map(|c| c.name).unwrap_or_default();
                println!("{id}\t{name}");
            }
            Ok(())
        }
        Commands::Run {
            id,
            message,
            team,
            model,
            user,
            session,
            debug,
        } => {
            let catalog = Catalog::builtin(Runtime::new(config)?);
            let opts = RunOptions {
                model_id: model,
                user_id: user,
                session_id: session,
                debug_mode: debug,
            };
            run_once(&catalog, &id, team, &message, &opts).await
        }
        Commands::LoadKnowledge {
            agent_id,
            no_upsert,
        } => {
            let catalog = Catalog::builtin(Runtime::new(config)?);
            match catalog.load_knowledge(&agent_id, !no_upsert).await {
                Ok(report) => {
                    println!(
                        "Loaded knowledge for '{agent_id}': {} document(s), {} chunk(s), {} unchanged",
                        report.documents, report.chunks, report.skipped
                    );
                    Ok(())
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Stream one run to stdout. The session id goes to stderr so it can be reused.
async fn run_once(
    catalog: &Catalog,
    id: &str,
    team: bool,
    message: &str,
    opts: &RunOptions,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<RunEvent>(64);
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            if let RunEvent::Content(text) = event {
                print!("{text}");
                let _ = stdout.flush();
            }
        }
        println!();
    });

    let result = if team {
        let team = catalog.get_team(id, opts)?;
        team.run(message, Some(&tx)).await
    } else {
        let agent = catalog.get_agent(id, opts)?;
        agent.run(message, Some(&tx)).await
    };
    drop(tx);
    let _ = printer.await;

    let response = result?;
    eprintln!("session: {}", response.session_id);
    Ok(())
}
