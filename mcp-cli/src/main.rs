use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mcp_installer::{InstallOptions, InstallerConfig};
use mcp_manager::Manager;

#[derive(Parser)]
#[command(name = "mcp-host")]
#[command(about = "Install and supervise Model Context Protocol servers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Directory holding the persisted server catalog. Defaults to
    /// `$HOME/.vscode/mcp-servers/.data`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install a server from a GitHub/GitLab/Bitbucket URL, an npm or pip
    /// package reference, a tarball URL, or a local path.
    Install {
        url: String,
        #[arg(long)]
        auto_start: bool,
        #[arg(long)]
        allow_high_risk: bool,
        #[arg(long)]
        force_reinstall: bool,
    },
    /// Remove an installed server and its source tree.
    Uninstall { id: String },
    /// List installed servers.
    List,
    /// Show the runtime status of one server.
    Status { id: String },
    /// Start an installed server.
    Start { id: String },
    /// Stop a running server.
    Stop { id: String },
    /// Restart a server.
    Restart { id: String },
    /// Probe a running server with a `tools/list` call.
    Health { id: String },
    /// Call a tool on a running server, args as a JSON object.
    CallTool { id: String, tool: String, args: String },
    /// Start every server with `metadata.autoStart = true`.
    StartAutoStart,
    /// Remove all installer cache metadata (leaves source trees in place).
    ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let install_root = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vscode")
        .join("mcp-servers");
    let data_dir = cli.data_dir.unwrap_or_else(|| install_root.join(".data"));

    let mut installer_config = InstallerConfig::default();
    installer_config.install_root = install_root;

    let manager = Manager::new(data_dir, installer_config)
        .await
        .context("failed to initialize manager")?;

    match cli.command {
        Commands::Install {
            url,
            auto_start,
            allow_high_risk,
            force_reinstall,
        } => {
            let options = InstallOptions {
                auto_start,
                allow_high_risk,
                force_reinstall,
                ..Default::default()
            };
            let record = manager.install(&url, options).await?;
            println!("installed {} ({})", record.id, record.install_url);
        }
        Commands::Uninstall { id } => {
            manager.uninstall(&id).await?;
            println!("uninstalled {id}");
        }
        Commands::List => {
            for record in manager.list().await {
                let status = manager.status(&record.id).await;
                let state = status.map(|s| format!("{:?}", s.state)).unwrap_or_else(|| "unknown".to_string());
                println!("{}\t{}\t{}", record.id, state, record.install_url);
            }
        }
        Commands::Status { id } => match manager.status(&id).await {
            Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            None => println!("no status recorded for {id}"),
        },
        Commands::Start { id } => {
            manager.start(&id).await?;
            println!("started {id}");
        }
        Commands::Stop { id } => {
            manager.stop(&id).await?;
            println!("stopped {id}");
        }
        Commands::Restart { id } => {
            manager.restart(&id).await?;
            println!("restarted {id}");
        }
        Commands::Health { id } => {
            let healthy = manager.health(&id).await;
            println!("{id}: {}", if healthy { "healthy" } else { "unhealthy" });
        }
        Commands::CallTool { id, tool, args } => {
            let args: serde_json::Value = serde_json::from_str(&args).context("args must be valid JSON")?;
            let result = manager.call_tool(&id, &tool, args).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::StartAutoStart => {
            let outcomes = manager.start_auto_start_servers().await;
            for (id, outcome) in outcomes {
                match outcome {
                    Ok(()) => println!("{id}: started"),
                    Err(e) => println!("{id}: failed ({e})"),
                }
            }
        }
        Commands::ClearCache => {
            manager.clear_cache().await?;
            println!("cache cleared");
        }
    }

    Ok(())
}
