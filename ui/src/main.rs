use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use shared_file_repo::client::FileClient;
use shared_file_repo::config::Config;
use shared_file_repo::protocol::ClientId;
use shared_file_repo::protocol::types::{StatsSummary, format_timestamp};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Command-line client for the shared file repository
#[derive(Parser, Debug)]
#[command(name = "repo-client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Client identifier used for authorship and locks
    #[arg(short, long)]
    id: String,

    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Repository UDP address used for discovery and queries
    #[arg(long)]
    repository: Option<SocketAddr>,

    /// Log at DEBUG instead of WARN
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// List all records (UDP, no session)
    List,
    /// Create a record from a local file or inline text
    Upload {
        name: String,
        /// Read the content from this file
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
        /// Use this text as the content
        #[arg(short, long)]
        text: Option<String>,
    },
    /// Print a record, or save it to a file
    Download {
        name: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace a record's content under a lease (OPEN, EDIT, CLOSE)
    Edit {
        name: String,
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
        #[arg(short, long)]
        text: Option<String>,
    },
    /// Delete a record under a lease (OPEN, DELETE)
    Delete { name: String },
    /// Byte totals and the latest record modified on or after a date (UDP)
    Stats {
        /// Cutoff date, yyyy-mm-dd
        #[arg(long)]
        after: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .init();

    let mut config = Config::load_or_default(cli.config.as_deref())?.client;
    if let Some(addr) = cli.repository {
        config.repository_udp_addr = addr;
    }
    let client_id = ClientId::new(cli.id);

    match cli.command {
        Action::List => {
            let entries = shared_file_repo::client::discovery::list(
                config.repository_udp_addr,
                config.request_timeout(),
            )
            .await?;
            if entries.is_empty() {
                println!("(no records)");
            }
            for entry in entries {
                println!(
                    "{:<30} {:<15} {} {}",
                    entry.name,
                    entry.author,
                    format_timestamp(&entry.last_modified),
                    if entry.locked { "locked" } else { "" }
                );
            }
        }
        Action::Stats { after } => {
            let summary = shared_file_repo::client::discovery::stats(
                config.repository_udp_addr,
                Some(&client_id),
                after,
                config.request_timeout(),
            )
            .await?;
            print_stats(&client_id, &summary);
        }
        Action::Upload { name, file, text } => {
            let content = read_content(file, text)?;
            let mut client = FileClient::connect(config, client_id).await?;
            client.upload(&name, &content).await?;
            println!("Uploaded {}", name);
        }
        Action::Download { name, output } => {
            let mut client = FileClient::connect(config, client_id).await?;
            let view = client.download(&name).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &view.content)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!(
                        "Saved {} ({} by {}, {}) to {}",
                        name,
                        view.content.len(),
                        view.author,
                        format_timestamp(&view.last_modified),
                        path.display()
                    );
                }
                None => print!("{}", view.content),
            }
        }
        Action::Edit { name, file, text } => {
            let content = read_content(file, text)?;
            let mut client = FileClient::connect(config, client_id).await?;
            client.edit_file(&name, &content).await?;
            println!("Edited {}", name);
        }
        Action::Delete { name } => {
            let mut client = FileClient::connect(config, client_id).await?;
            client.delete_file(&name).await?;
            println!("Deleted {}", name);
        }
    }

    Ok(())
}

fn read_content(file: Option<PathBuf>, text: Option<String>) -> Result<String> {
    match (file, text) {
        (Some(path), _) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display())),
        (None, Some(text)) => Ok(text),
        (None, None) => anyhow::bail!("Provide the content with --file or --text"),
    }
}

fn print_stats(client_id: &ClientId, summary: &StatsSummary) {
    println!("Bytes authored by {}: {}", client_id, summary.my_files);
    match &summary.latest_after {
        Some(latest) => println!(
            "Latest: {} by {} at {}",
            latest.name,
            latest.author,
            format_timestamp(&latest.last_modified)
        ),
        None => println!("Latest: none"),
    }
    for (author, bytes) in &summary.totals {
        println!("  {:<15} {}", author, bytes);
    }
}
