use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dnsgate::config::{CliOverrides, Config};
use dnsgate::proxy;

#[derive(Parser)]
#[command(name = "dnsgate")]
#[command(about = "Caching, blacklist-filtering DNS forwarder", long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides server.listen)
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Local port to listen on (overrides server.listen)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream DNS server host:port (overrides server.upstream)
    #[arg(short, long)]
    upstream: Option<SocketAddr>,

    /// Log every query at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            bind: self.bind,
            port: self.port,
            upstream: self.upstream,
            verbose: self.verbose,
        }
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("loading configuration")?;
    config.apply_overrides(&args.overrides());
    config.validate().context("validating configuration")?;

    init_logging(&config.logging.level);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(proxy::run(config)).context("running DNS forwarder")
}
