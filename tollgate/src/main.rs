use std::{process::ExitCode, time::Duration};

use clap::Parser;
use tollgate::{CounterBackend, PolicyConfig, SqliteRepositoryProvider, Tollgate, TollgateBuilder};
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Command line interface for Tollgate
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Login log and credential store
    #[arg(long, env = "TOLLGATE_DATABASE_URL", default_value = "sqlite://tollgate.db")]
    database_url: String,

    /// Failure tracking strategy: log, memory or redis
    #[arg(long, env = "TOLLGATE_COUNTER_BACKEND", default_value = "log")]
    counter_backend: CounterBackend,

    #[arg(long, env = "TOLLGATE_REDIS_URL", default_value = "redis://127.0.0.1/")]
    redis_url: String,

    /// Prefix of every Redis key Tollgate owns
    #[arg(long, env = "TOLLGATE_REDIS_PREFIX", default_value = "tollgate")]
    redis_prefix: String,

    /// Consecutive failures after which a user is locked
    #[arg(long, env = "TOLLGATE_USER_LOCK_THRESHOLD", default_value_t = 3)]
    user_lock_threshold: u64,

    /// Consecutive failures after which an address is banned
    #[arg(long, env = "TOLLGATE_IP_BAN_THRESHOLD", default_value_t = 10)]
    ip_ban_threshold: u64,

    #[arg(long, env = "TOLLGATE_STORE_TIMEOUT_MS", default_value_t = 2000)]
    store_timeout_ms: u64,

    /// Treat an unreachable store during the ban check as banned
    #[arg(long, env = "TOLLGATE_FAIL_CLOSED")]
    fail_closed: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(clap::Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,
    /// Rebuild the counter cache from the login log; needs --counter-backend redis or memory
    Bootstrap,
    /// Print banned addresses and locked users as JSON
    Report,
    /// Print version information
    Version,
}

impl Cli {
    fn policy(&self) -> CliResult<PolicyConfig> {
        Ok(
            PolicyConfig::new(self.user_lock_threshold, self.ip_ban_threshold)?
                .with_store_timeout(Duration::from_millis(self.store_timeout_ms))
                .with_fail_closed(self.fail_closed)
                .validated()?,
        )
    }

    fn require_counter_cache(&self) -> CliResult<()> {
        if self.counter_backend == CounterBackend::Log {
            return Err("bootstrap needs a counter cache; pass --counter-backend redis or memory \
                 (or set TOLLGATE_COUNTER_BACKEND)"
                .into());
        }
        Ok(())
    }

    async fn tollgate(&self, bootstrap: bool) -> CliResult<Tollgate<SqliteRepositoryProvider>> {
        let builder = TollgateBuilder::new()
            .with_sqlite(&self.database_url)
            .await?
            .with_policy(self.policy()?);

        let builder = match self.counter_backend {
            CounterBackend::Log => builder,
            CounterBackend::Memory => builder.with_memory_counters(),
            CounterBackend::Redis => {
                builder
                    .with_redis_counters(&self.redis_url, &self.redis_prefix)
                    .await?
            }
        };

        Ok(builder.bootstrap_on_build(bootstrap).build().await?)
    }
}

fn init_tracing() {
    // TOLLGATE_LOG wins over RUST_LOG
    let filter = std::env::var("TOLLGATE_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    // Logs go to stderr so report output can be piped
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> CliResult<()> {
    match cli.command {
        Commands::Migrate => {
            let storage = tollgate::SqliteStorage::connect(&cli.database_url).await?;
            let tollgate = Tollgate::new(std::sync::Arc::new(storage.into_repository_provider()));
            tollgate.migrate().await?;
            tracing::info!(database_url = %cli.database_url, "Migrations applied");
        }
        Commands::Bootstrap => {
            cli.require_counter_cache()?;
            if cli.counter_backend == CounterBackend::Memory {
                tracing::warn!("The memory counter cache is discarded on exit; this only validates the login log");
            }
            let tollgate = cli.tollgate(false).await?;
            let summary = tollgate.bootstrap().await?;
            println!("{}", serde_json::to_string(&summary)?);
        }
        Commands::Report => {
            // A fresh in-process cache knows nothing until replayed
            let bootstrap = cli.counter_backend == CounterBackend::Memory;
            let tollgate = cli.tollgate(bootstrap).await?;
            let report = tollgate.report().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Version => {
            println!("Tollgate v{}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
