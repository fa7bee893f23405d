mod config;
mod pages;
mod serve_cmd;
mod show_cmd;
#[cfg(test)]
mod test_util;

use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use musterpoint_core::PlanService;
use musterpoint_core::store::{MemoryPlanStore, PgPlanStore, PlanStore};
use musterpoint_db::config::DbConfig;
use musterpoint_db::pool;

use config::MusterpointConfig;

#[derive(Parser)]
#[command(name = "musterpoint", about = "Family emergency meeting plans")]
struct Cli {
    /// Database URL (overrides MUSTERPOINT_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a musterpoint config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = DbConfig::DEFAULT_URL)]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the musterpoint database (requires config file or env vars)
    DbInit,
    /// Serve the plan pages over HTTP
    Serve {
        /// Address to bind (default from config, else 127.0.0.1)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (default from config, else 8080)
        #[arg(long)]
        port: Option<u16>,
        /// Keep plans in memory instead of PostgreSQL (lost on exit)
        #[arg(long)]
        in_memory: bool,
    },
    /// Show the plan a member belongs to
    Show {
        /// Member email
        email: String,
    },
    /// Print shell completions to stdout
    Completions {
        shell: Shell,
    },
}

/// Execute the `musterpoint init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        server: config::ServerSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  server.bind = {}:{}", cfg.server.bind, cfg.server.port);
    println!("  server.identity_header = {}", cfg.server.identity_header);
    println!();
    println!("Next: run `musterpoint db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `musterpoint db-init` command: create database and run migrations.
async fn cmd_db_init(resolved: &MusterpointConfig) -> anyhow::Result<()> {
    println!("Initializing musterpoint database...");

    if pool::ensure_database_exists(&resolved.db_config).await? {
        println!("Created database.");
    }
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("musterpoint db-init complete.");
    Ok(())
}

async fn cmd_serve(
    resolved: MusterpointConfig,
    bind: Option<String>,
    port: Option<u16>,
    in_memory: bool,
) -> anyhow::Result<()> {
    let bind = bind.unwrap_or(resolved.bind);
    let port = port.unwrap_or(resolved.port);

    if in_memory {
        tracing::warn!("using the in-memory plan store; plans are lost on exit");
        let store: Arc<dyn PlanStore> = Arc::new(MemoryPlanStore::new());
        let state = serve_cmd::AppState::new(PlanService::new(store), resolved.web)?;
        return serve_cmd::run_serve(state, &bind, port).await;
    }

    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let store: Arc<dyn PlanStore> = Arc::new(PgPlanStore::new(db_pool.clone()));
    let state = serve_cmd::AppState::new(PlanService::new(store), resolved.web)?;
    let result = serve_cmd::run_serve(state, &bind, port).await;
    db_pool.close().await;
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            let resolved = MusterpointConfig::resolve(cli.database_url.as_deref())?;
            cmd_db_init(&resolved).await?;
        }
        Commands::Serve {
            bind,
            port,
            in_memory,
        } => {
            let resolved = MusterpointConfig::resolve(cli.database_url.as_deref())?;
            cmd_serve(resolved, bind, port, in_memory).await?;
        }
        Commands::Show { email } => {
            let resolved = MusterpointConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let service = PlanService::new(Arc::new(PgPlanStore::new(db_pool.clone())));
            let result = show_cmd::run_show(&service, &email).await;
            db_pool.close().await;
            result?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "musterpoint", &mut std::io::stdout());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::try_parse_from(["musterpoint", "serve", "--port", "9000", "--in-memory"])
            .unwrap();
        match cli.command {
            Commands::Serve {
                bind,
                port,
                in_memory,
            } => {
                assert_eq!(bind, None);
                assert_eq!(port, Some(9000));
                assert!(in_memory);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn global_database_url_after_subcommand() {
        let cli = Cli::try_parse_from([
            "musterpoint",
            "show",
            "ann@x.org",
            "--database-url",
            "postgresql://h/db",
        ])
        .unwrap();
        assert_eq!(cli.database_url.as_deref(), Some("postgresql://h/db"));
    }
}
