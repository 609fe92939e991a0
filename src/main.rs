use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use shared_file_repo::config::Config;
use shared_file_repo::manager::service::ManagerServer;
use shared_file_repo::repository::service::RepositoryServer;
use shared_file_repo::repository::store::RecordStore;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Shared file repository server
#[derive(Parser, Debug)]
#[command(name = "shared-file-repo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at DEBUG instead of INFO
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Run the authoritative record store
    Repository(RepositoryArgs),
    /// Run the client-facing request manager
    Manager(ManagerArgs),
}

#[derive(Args, Debug)]
struct RepositoryArgs {
    #[arg(long)]
    host: Option<IpAddr>,
    /// TCP port the Manager connects to
    #[arg(long)]
    tcp_port: Option<u16>,
    /// UDP port for discovery and queries
    #[arg(long)]
    udp_port: Option<u16>,
    /// Manager TCP port announced to clients
    #[arg(long)]
    manager_port: Option<u16>,
}

#[derive(Args, Debug)]
struct ManagerArgs {
    #[arg(long)]
    host: Option<IpAddr>,
    /// TCP port clients connect to
    #[arg(long)]
    tcp_port: Option<u16>,
    /// UDP port of the stats relay
    #[arg(long)]
    udp_port: Option<u16>,
    /// Repository TCP address
    #[arg(long)]
    repository: Option<SocketAddr>,
    /// Upstream round-trip budget in milliseconds
    #[arg(long)]
    upstream_timeout_ms: Option<u64>,
    /// Forward every OPEN without consulting the shadow lock table
    #[arg(long)]
    no_shadow_locks: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let mut config = Config::load_or_default(cli.config.as_deref())?;

    match cli.role {
        Role::Repository(args) => {
            let repo = &mut config.repository;
            if let Some(host) = args.host {
                repo.host = host;
            }
            if let Some(port) = args.tcp_port {
                repo.tcp_port = port;
            }
            if let Some(port) = args.udp_port {
                repo.udp_port = port;
            }
            if let Some(port) = args.manager_port {
                repo.manager_port = port;
            }

            tracing::info!("Starting repository");
            let server = RepositoryServer::bind(repo, RecordStore::new()).await?;
            serve_until_ctrl_c(server.run()).await
        }
        Role::Manager(args) => {
            let manager = &mut config.manager;
            if let Some(host) = args.host {
                manager.host = host;
            }
            if let Some(port) = args.tcp_port {
                manager.tcp_port = port;
            }
            if let Some(port) = args.udp_port {
                manager.udp_port = port;
            }
            if let Some(addr) = args.repository {
                manager.repository_addr = addr;
            }
            if let Some(ms) = args.upstream_timeout_ms {
                manager.upstream_timeout_ms = ms;
            }
            if args.no_shadow_locks {
                manager.shadow_locks = false;
            }

            tracing::info!("Starting manager");
            let server = ManagerServer::bind(manager).await?;
            serve_until_ctrl_c(server.run()).await
        }
    }
}

async fn serve_until_ctrl_c(server: impl Future<Output = Result<()>>) -> Result<()> {
    tracing::info!("Press Ctrl+C to shutdown");

    tokio::select! {
        result = server => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}
