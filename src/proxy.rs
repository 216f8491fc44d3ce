//! Forwarder orchestration.
//!
//! Loads the blacklist, wires the resolver to its collaborators, binds the
//! UDP and TCP transports and runs until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::ServerError;
use crate::filter::{Blacklist, HttpFetcher};
use crate::resolver::Resolver;
use crate::stats::StatsSnapshot;
use crate::transport::{tcp::TcpTransport, udp::UdpTransport};
use crate::upstream::{UdpUpstream, Upstream};

/// A running forwarder: both transports plus the shared resolver.
pub struct Server {
    resolver: Arc<Resolver>,
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Fetch the configured blacklist sources, then bind and start serving.
    ///
    /// Unreachable sources are skipped; only a listener that cannot be bound
    /// stops startup.
    pub async fn start(config: &Config) -> Result<Self, ServerError> {
        let fetcher = HttpFetcher::new(config.blacklist.fetch_timeout())?;
        let outcome =
            Blacklist::build(&config.wordlists, &fetcher, &config.blacklist.options()).await;

        if !outcome.failures.is_empty() {
            warn!(
                failed = outcome.failures.len(),
                total = config.wordlists.len(),
                "some blacklist sources could not be loaded"
            );
        }

        Self::with_blacklist(config, outcome.blacklist).await
    }

    /// Start serving with an already built blacklist.
    pub async fn with_blacklist(config: &Config, blacklist: Blacklist) -> Result<Self, ServerError> {
        let cache = Arc::new(ResponseCache::new(
            config.cache.max_entries,
            config.cache.eviction,
        ));
        let upstream = Arc::new(UdpUpstream::new(
            config.server.upstream,
            config.server.upstream_timeout(),
        ));
        info!(
            upstream = %upstream.address(),
            upstream_timeout_ms = upstream.timeout().as_millis() as u64,
            cache_capacity = cache.capacity(),
            eviction = %cache.policy(),
            blocked_domains = blacklist.len(),
            blacklist_mode = %blacklist.mode(),
            "resolver ready"
        );

        let resolver = Arc::new(Resolver::new(
            Arc::new(blacklist),
            cache,
            upstream,
            config.cache.ttl_policy(),
        ));

        Self::bind(config.server.listen, resolver).await
    }

    /// Bind UDP and TCP on `addr` and start both transports.
    ///
    /// With port 0, TCP listens on the port the UDP socket was given.
    pub async fn bind(addr: SocketAddr, resolver: Arc<Resolver>) -> Result<Self, ServerError> {
        let bind_err = |protocol, source| ServerError::Bind {
            addr,
            protocol,
            source,
        };

        let udp = UdpTransport::bind(addr).await.map_err(|e| bind_err("udp", e))?;
        let local_addr = udp.local_addr().map_err(|e| bind_err("udp", e))?;
        let tcp = TcpTransport::bind(local_addr)
            .await
            .map_err(|e| bind_err("tcp", e))?;

        let tasks = vec![
            udp.start(Arc::clone(&resolver)),
            tcp.start(Arc::clone(&resolver)),
        ];

        Ok(Self {
            resolver,
            local_addr,
            tasks,
        })
    }

    /// Address both transports are listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Stop both transports and return the counters not yet reported.
    pub fn shutdown(self) -> StatsSnapshot {
        for task in &self.tasks {
            task.abort();
        }
        self.resolver.stats_snapshot_and_reset()
    }
}

/// Run the forwarder until Ctrl-C.
pub async fn run(config: Config) -> Result<(), ServerError> {
    let server = Server::start(&config).await?;
    let resolver = Arc::clone(server.resolver());

    info!(listen = %server.local_addr(), "DNS forwarder started");

    let reporter = tokio::spawn(report_stats(
        Arc::clone(&resolver),
        config.server.stats_interval(),
    ));

    tokio::signal::ctrl_c().await.map_err(ServerError::Signal)?;
    info!("shutting down");

    reporter.abort();
    let cache_len = resolver.cache_len();
    let stats = server.shutdown();
    log_stats(&stats, cache_len);

    Ok(())
}

async fn report_stats(resolver: Arc<Resolver>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip first immediate tick
    loop {
        interval.tick().await;
        let stats = resolver.stats_snapshot_and_reset();
        log_stats(&stats, resolver.cache_len());
    }
}

fn log_stats(stats: &StatsSnapshot, cache_len: usize) {
    info!(
        cache = cache_len,
        requests = stats.requests,
        forwarded = stats.forwarded,
        cached = stats.cached,
        blocked = stats.blocked,
        failed = stats.failed,
        avg_response_ms = format_args!("{:.2}", stats.avg_response_ms),
        "stats"
    );
}
