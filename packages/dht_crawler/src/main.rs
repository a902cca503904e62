use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use dht_crawler::config::{Config, PartialConfig};
use dht_crawler::{Dht, FilesystemPersistence, Persistence};
use krpc_encoding::NodeID;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dht_node", about = "A Kademlia/BEP-5 BitTorrent DHT node")]
struct Cli {
    /// Path to a TOML file overriding the compiled defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `bind_addr` from the config file.
    #[arg(short, long)]
    bind: Option<String>,

    /// Directory routing-table snapshots are persisted under.
    #[arg(long, default_value = "./dht-state")]
    state_dir: PathBuf,
}

fn load_config(cli: &Cli) -> dht_crawler::Result<Config> {
    let mut config = Config::default();

    if let Some(path) = &cli.config {
        let text = std::fs::read_to_string(path).map_err(|cause| dht_crawler::Error::ConfigRead {
            path: path.display().to_string(),
            cause,
        })?;
        let partial: PartialConfig = toml::from_str(&text).map_err(|cause| dht_crawler::Error::ConfigParse {
            path: path.display().to_string(),
            cause,
        })?;
        config = config.merge(partial);
    }

    if let Some(bind) = &cli.bind {
        config.bind_addr = bind.clone();
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> dht_crawler::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let local_id = NodeID::generate();
    info!(%local_id, "generated local node identity");

    let persistence: Arc<Mutex<dyn Persistence>> =
        Arc::new(Mutex::new(FilesystemPersistence::new(cli.state_dir.clone())));

    let dht = Arc::new(Dht::bind(config, local_id, persistence).await?);

    if let Err(err) = dht.bootstrap().await {
        error!(%err, "bootstrap failed, aborting");
        return Err(err);
    }

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    dht.run(shutdown).await?;

    Ok(())
}
