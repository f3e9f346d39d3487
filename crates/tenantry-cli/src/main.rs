use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tenantry_core::TenantryConfig;
use tracing_subscriber::EnvFilter;

mod commands;

const DEFAULT_CONFIG: &str = "tenantry.yaml";

#[derive(Parser, Debug)]
#[command(name = "tenantry", version, about = "Tenant isolation rules for a shared record store")]
struct Cli {
    /// Configuration file. Defaults apply when it is absent.
    #[arg(long, short = 'c', global = true, env = "TENANTRY_CONFIG", default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile generated rules on every entity type, then backfill tenant references.
    Secure {
        /// Roll the transaction back instead of committing.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Run against an empty in-memory store holding only these entity types.
        #[arg(long, num_args = 1.., value_name = "ENTITY")]
        offline: Vec<String>,

        /// Print the report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the rules generated for one entity type.
    Compile {
        entity: String,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the security class of entity types.
    Classify {
        #[arg(required = true)]
        entities: Vec<String>,
    },

    /// Validate the configuration file and the rule catalog.
    Check {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn load_config(path: &Path) -> anyhow::Result<TenantryConfig> {
    if !path.exists() {
        return Ok(TenantryConfig::default());
    }
    let config = TenantryConfig::from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `check` reports an invalid file itself instead of refusing to start.
    let config = match &cli.cmd {
        Command::Check { .. } => load_config(&cli.config).unwrap_or_default(),
        _ => load_config(&cli.config)?,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Command::Secure {
            dry_run,
            offline,
            json,
        } => commands::secure::run(config, dry_run, offline, json).await?,
        Command::Compile { entity, json } => commands::compile::run(&config, &entity, json)?,
        Command::Classify { entities } => commands::classify::run(&entities),
        Command::Check { json } => commands::check::run(&cli.config, json)?,
    }

    Ok(())
}
