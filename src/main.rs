// Notewise server binary

use anyhow::Result;
use clap::{Parser, Subcommand};

use notewise::{init_logging, ServerConfig, Verbosity};

#[derive(Parser)]
#[command(name = "notewise")]
#[command(about = "Hybrid search and AI routing server for research notes")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(Verbosity::from_flags(cli.verbose, cli.quiet));

    let config = ServerConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            notewise::serve(config).await?;
        }
        Commands::Migrate => {
            let pool = notewise::create_pool(&config.database_url).await?;
            notewise::run_migrations(&pool, config.embedding.dimension).await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
