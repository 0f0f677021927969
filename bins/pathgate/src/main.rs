//! pathgate gateway daemon
//!
//! Loads the gateway and adapter configuration, wires the UDP overlay
//! network, the path database, the key service, and the IP adapter into
//! a gateway, and runs until killed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pathgate_core::{AdapterConf, Gateway, GatewayConf, IpAdapter};
use pathgate_crypto::MockKeyService;
use pathgate_net::{OverlayNetwork, PathDb};

/// Site-to-site secure gateway over a path-aware network
#[derive(Parser)]
#[command(name = "pathgate", version, about)]
struct Cli {
    /// Path to the gateway config file
    #[arg(long, default_value = "./conf.yaml")]
    conf: PathBuf,

    /// Path to the path/segment database
    #[arg(long)]
    db: Option<PathBuf>,

    /// Path to the dispatcher socket of an external path-aware stack
    #[arg(long)]
    dispatcher: Option<String>,

    /// Address of an external path lookup daemon
    #[arg(long)]
    sciond: Option<String>,

    /// Console logging level: trace|debug|info|warn|error
    #[arg(long = "log-console", default_value = "info")]
    log_console: String,

    /// [TEST] force failover over hidden paths
    #[arg(long)]
    hidden_failover: bool,
}

fn log_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(&cli.log_console))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let conf_raw = std::fs::read_to_string(&cli.conf)
        .with_context(|| format!("error loading conf file {}", cli.conf.display()))?;
    let conf = GatewayConf::from_yaml(&conf_raw).context("cannot parse gateway conf")?;
    info!(address = %conf.address, remotes = conf.remotes.len(), "gateway configuration");

    let adapter_raw = std::fs::read_to_string(&conf.adapter_conf_path).with_context(|| {
        format!(
            "error loading adapter conf file {}",
            conf.adapter_conf_path.display()
        )
    })?;
    let adapter_conf = AdapterConf::from_yaml(&adapter_raw).context("cannot parse adapter conf")?;

    let Some(db_path) = &cli.db else {
        bail!("--db with a path database is required");
    };
    let db = Arc::new(PathDb::load(db_path).context("cannot load path database")?);

    let network = Arc::new(OverlayNetwork::new(
        conf.address.ia,
        cli.dispatcher.as_deref(),
        cli.sciond.as_deref(),
    ));
    let key_service = Arc::new(MockKeyService::default());
    let adapter = Arc::new(
        IpAdapter::create(adapter_conf)
            .await
            .context("cannot create IP adapter")?,
    );

    let gateway = Gateway::new(
        conf,
        cli.hidden_failover,
        network,
        db.clone(),
        db,
        key_service,
        adapter,
    );
    gateway.start().await.context("cannot start gateway")?;

    tokio::signal::ctrl_c().await?;
    info!("received terminate signal");
    Ok(())
}
