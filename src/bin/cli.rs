use std::process::ExitCode;

use clap::{Parser, Subcommand};

use role_gate::app::{build_permission_service, clear_permission_cache};
use role_gate::config::{init_tracing, load_env, AppConfig, StoreKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "role-gate operator tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Re-pull roles and permissions from the identity server into the cache
    RefreshPermissions {
        /// Only invalidate the cache; the next query refetches it
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    load_env();
    init_tracing();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    if config.cache.store == StoreKind::Memory {
        tracing::warn!("PERMISSION_CACHE_STORE=memory: running servers will not see this change");
    }

    match cli.command {
        Commands::RefreshPermissions { clear: true } => {
            clear_permission_cache(&config.cache).await?;
            println!("Permission cache cleared");
        }
        Commands::RefreshPermissions { clear: false } => {
            let service = build_permission_service(&config).await?;
            let roles = service.refresh_cache().await?;
            println!(
                "Permission cache refreshed: {} roles, {} permissions",
                roles.len(),
                roles.permission_count()
            );
            for (name, entry) in roles.roles() {
                println!("  {:<24} {:>4} permissions {:>4} users", name, entry.permissions.len(), entry.users.len());
            }
        }
    }

    Ok(())
}
