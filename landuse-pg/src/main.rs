//! Point d'entrée CLI pour landuse-pg

use clap::Parser;
use tracing::{debug, error, Level};
use tracing_subscriber::{fmt, EnvFilter};

use landuse_pg::error::exit_code_of;

mod cli;

use cli::{Commands, Context, DbArgs};

// Charger .env au démarrage
fn load_env() {
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

/// Classification de l'occupation du sol (WALOUS) sur PostGIS
#[derive(Parser)]
#[command(name = "landuse-pg")]
#[command(author, version)]
#[command(about = "Classer l'occupation du sol sur PostGIS: superpositions, règles, postclassification, légende HILUCS")]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config preset name (walous) or path to a JSON config
    #[arg(short, long, default_value = "walous", global = true)]
    config: String,

    #[command(flatten)]
    db: DbArgs,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    load_env();

    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);
    debug!(config = %cli.config, "Starting");

    let ctx = Context::new(cli.config, cli.db);
    if let Err(e) = cli::dispatch(cli.command, &ctx).await {
        error!(error = %format!("{:#}", e), "Command failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code_of(&e));
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
