use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tether_proxy::{Proxy, ProxyConfig, event::NullSink};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt};

#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// The arguments to run the proxy
#[derive(Parser, Deserialize, Debug)]
struct Args {
    /// Path to a TOML config file with a [proxy] table
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Override the listener address from the config
    #[clap(short, long)]
    bind: Option<String>,

    /// Override the local game server port from the config
    #[clap(short, long)]
    server_port: Option<u16>,
}

fn setup_logging() {
    tracing::subscriber::set_global_default(
        Registry::default()
            .with(EnvFilter::from_default_env())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true),
            ),
    )
    .expect("setup tracing subscribers");
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    setup_logging();

    // flags win over TETHER_-prefixed environment variables
    let cli = Args::parse();
    let env = envy::prefixed("TETHER_").from_env::<Args>().unwrap_or(Args {
        config: None,
        bind: None,
        server_port: None,
    });

    let mut config = match cli.config.or(env.config) {
        Some(path) => ProxyConfig::load(&path)?,
        None => ProxyConfig::default(),
    };
    if let Some(bind) = cli.bind.or(env.bind) {
        config.bind = bind;
    }
    if let Some(server_port) = cli.server_port.or(env.server_port) {
        config.server_port = server_port;
    }

    tracing::info!(?config, "starting proxy");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let proxy = Proxy::new(config, Arc::new(NullSink))?;
        tether_proxy::run(proxy).await
    })
}
