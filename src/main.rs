use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod auth;
mod calculator;
mod db;
mod error;
mod groups;
mod memory;
mod models;
mod report;
mod risk;
mod students;
mod validation;
mod web;

use auth::DefaultIdentity;
use db::{PgStore, Store};
use groups::resolve_collection;
use models::Tier;

#[derive(Parser)]
#[command(name = "student-zone-tracker")]
#[command(about = "Sorts students into Red Zone, Average and Good tiers", long_about = None)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 5, global = true)]
    db_max_connections: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the web application
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:5000")]
        bind: SocketAddr,
        /// Keep everything in process memory instead of Postgres
        #[arg(long)]
        in_memory: bool,
        #[arg(long, env = "DEFAULT_USERNAME", default_value = "admin")]
        default_username: String,
        #[arg(long, env = "DEFAULT_PASSWORD", default_value = "admin123", hide_env_values = true)]
        default_password: String,
    },
    /// Create or upgrade the database schema
    InitDb,
    /// Load one sample student per tier
    Seed {
        #[arg(long)]
        group: Option<String>,
    },
    /// Import students from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        group: Option<String>,
    },
    /// Print tier counts, or the students in one tier
    Zones {
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        zone: Option<Tier>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        group: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

async fn connect(cli: &Cli) -> anyhow::Result<PgStore> {
    let database_url = cli
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a Postgres instance")?;
    PgStore::connect(database_url, cli.db_max_connections).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Serve {
        bind,
        in_memory,
        default_username,
        default_password,
    } = &cli.command
    {
        let store: Arc<dyn Store> = if *in_memory {
            Arc::new(memory::MemoryStore::new())
        } else {
            let store = connect(&cli).await?;
            store.init_db().await?;
            Arc::new(store)
        };
        let identity = DefaultIdentity {
            username: default_username.clone(),
            password: default_password.clone(),
        };
        return web::serve(web::AppState::new(store, identity), *bind).await;
    }

    let pg = connect(&cli).await?;
    let store: Arc<dyn Store> = Arc::new(pg.clone());

    match cli.command {
        Commands::Serve { .. } => {}
        Commands::InitDb => {
            pg.init_db().await?;
            println!("Schema ready.");
        }
        Commands::Seed { group } => {
            let collection = resolve_collection(&store, group.as_deref());
            let inserted = db::seed(&collection).await?;
            println!("Inserted {inserted} sample students into the {}.", collection.key());
        }
        Commands::Import { csv, group } => {
            let collection = resolve_collection(&store, group.as_deref());
            let summary = db::import_csv(&collection, &csv).await?;
            println!(
                "Inserted {} students from {} ({} skipped).",
                summary.inserted,
                csv.display(),
                summary.skipped
            );
        }
        Commands::Zones { group, zone } => {
            let collection = resolve_collection(&store, group.as_deref());
            let students = students::list_students(&collection).await?;

            match zone {
                Some(tier) => {
                    let matching: Vec<_> = students
                        .iter()
                        .filter(|student| student.zone() == tier)
                        .collect();
                    if matching.is_empty() {
                        println!("No {tier} students in the {}.", collection.key());
                        return Ok(());
                    }
                    println!("{tier} students in the {}:", collection.key());
                    for student in matching {
                        println!("- {} ({})", student.name(), student.id);
                    }
                }
                None => {
                    let counts = models::ZoneCounts::tally(&students);
                    println!("Zone mix for the {}:", collection.key());
                    for tier in Tier::ALL {
                        println!("- {tier}: {}", counts.get(tier));
                    }
                }
            }
        }
        Commands::Report { group, out } => {
            let collection = resolve_collection(&store, group.as_deref());
            let students = students::list_students(&collection).await?;
            let report = report::build_report(collection.key(), chrono::Utc::now(), &students);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
