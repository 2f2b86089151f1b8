use clap::Parser;
use sqledge::{Config, Replicator, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "sqledge")]
#[command(about = "PostgreSQL read-replica edge cache backed by SQLite", long_about = None)]
#[command(version)]
struct Args {
    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting sqledge v{}", env!("CARGO_PKG_VERSION"));

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("\nConfiguration is read from SQLEDGE_* environment variables:");
            eprintln!("  SQLEDGE_UPSTREAM_ADDRESS      - upstream host (localhost)");
            eprintln!("  SQLEDGE_UPSTREAM_PORT         - upstream port (5432)");
            eprintln!("  SQLEDGE_UPSTREAM_USER         - upstream user (postgres)");
            eprintln!("  SQLEDGE_UPSTREAM_PASSWORD     - upstream password");
            eprintln!("  SQLEDGE_UPSTREAM_NAME         - upstream database (postgres)");
            eprintln!("  SQLEDGE_UPSTREAM_SCHEMA       - schema to mirror (public)");
            eprintln!("  SQLEDGE_LOCAL_DB_PATH         - local store path (./sqledge.db)");
            std::process::exit(1);
        }
    };

    info!(
        upstream_address = %config.upstream.address,
        upstream_port = %config.upstream.port,
        upstream_database = %config.upstream.database,
        upstream_schema = %config.upstream.schema,
        publication = %config.replication.publication,
        slot = %config.replication.slot_name,
        local_path = %config.local.path.display(),
        proxy_address = %config.proxy.address,
        proxy_port = %config.proxy.port,
        "Configuration summary"
    );

    let mut replicator = Replicator::new(config);

    match replicator.run().await {
        Ok(()) => {
            info!("Mirror stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!("Mirror failed: {}", e);
            Err(e)
        }
    }
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("sqledge=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sqledge=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
