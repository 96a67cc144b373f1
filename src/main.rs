use std::{error::Error, path::PathBuf};

use clap::Parser;
use clap_derive::{Parser, Subcommand};
use serde_json::Value;
use temphumi::{
    VERSION, api,
    config::TemphumiConfig,
    measure,
    tseries::{SeriesError, SharedStorage, Storage},
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(version, about = "Temperature, humidity and power recorder")]
struct Cli {
    /// RON config file, `temphumi.ron` when present
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// SQLite file to record into, or `:memory:`
    #[arg(long)]
    database: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve recorded measurements over HTTP
    Serve {
        #[arg(long)]
        listen: Option<String>,
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },
    /// Sample the configured sensors and record them
    Measure {
        #[arg(long)]
        interval_s: Option<u64>,
        /// (debug) record random data
        #[arg(long)]
        random: bool,
        #[arg(long)]
        power_url: Option<String>,
    },
    /// Print the readings of a window as JSON lines
    Export {
        #[arg(allow_negative_numbers = true)]
        start: f64,
        #[arg(allow_negative_numbers = true)]
        end: f64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut cfg = TemphumiConfig::load(cli.config.as_deref())?;
    if let Some(database) = cli.database {
        cfg.database = database;
    }
    info!("temphumi {VERSION}, database {}", cfg.database);

    match cli.command {
        Command::Serve { listen, static_dir } => {
            if let Some(listen) = listen {
                cfg.server.listen = listen;
            }
            if static_dir.is_some() {
                cfg.server.static_dir = static_dir;
            }
            let store = SharedStorage::open(cfg.location(), cfg.store_options()).await?;
            api::serve(&cfg.server, store, shutdown_signal()).await?;
        }
        Command::Measure {
            interval_s,
            random,
            power_url,
        } => {
            if let Some(interval_s) = interval_s {
                cfg.measure.interval_s = interval_s;
            }
            cfg.measure.random |= random;
            if power_url.is_some() {
                cfg.measure.power_url = power_url;
            }
            let sensors = measure::sensors(&cfg.measure)?;
            let store = SharedStorage::open(cfg.location(), cfg.store_options()).await?;
            measure::run(&cfg.measure, sensors, store, shutdown_signal()).await?;
        }
        Command::Export { start, end } => export(&cfg, start, end)?,
    }

    Ok(())
}

/// Streams the window to stdout, skipping readings whose payload is corrupt.
fn export(cfg: &TemphumiConfig, start: f64, end: f64) -> Result<(), SeriesError> {
    let store = Storage::open_with(cfg.location(), cfg.store_options())?;
    let mut skipped = 0;
    for item in store.range(start, end) {
        match item {
            Ok(reading) => println!("{}", Value::Object(api::reading_object(reading))),
            Err(e @ SeriesError::CorruptRecord { .. }) => {
                warn!("{e}");
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    if skipped > 0 {
        warn!("skipped {skipped} corrupt reading(s)");
    }

    if let Err(e) = store.close() {
        warn!("closing series store: {e}");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("listening for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
