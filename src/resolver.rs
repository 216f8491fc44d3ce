//! DNS query resolution logic.
//!
//! Handles the per-query decision pipeline:
//! 1. Validate (a question is required)
//! 2. Cache lookup
//! 3. Blacklist check
//! 4. Forward to upstream and cache the answer
//!
//! Transports handle the actual I/O, the resolver handles decisions. Every
//! query runs the pipeline once, independently of any other query; two
//! concurrent misses for the same fingerprint both go upstream.

use std::sync::Arc;
use std::time::Instant;

use hickory_proto::op::{Message, ResponseCode};
use tracing::{debug, warn};

use crate::cache::{ResponseCache, TtlPolicy};
use crate::dns::{Fingerprint, reply_with_code};
use crate::error::ResolveError;
use crate::filter::Blacklist;
use crate::stats::{Stats, StatsSnapshot};
use crate::upstream::Upstream;

/// Outcome of a successfully resolved query.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    /// Served from the cache, with the query's transaction id.
    Cached(Message),
    /// Domain is blacklisted; NXDOMAIN mirroring the query.
    Blocked(Message),
    /// Fresh answer from upstream.
    Forwarded(Message),
}

impl Answer {
    pub fn message(&self) -> &Message {
        match self {
            Answer::Cached(m) | Answer::Blocked(m) | Answer::Forwarded(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Answer::Cached(m) | Answer::Blocked(m) | Answer::Forwarded(m) => m,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Answer::Cached(_) => "cached",
            Answer::Blocked(_) => "blocked",
            Answer::Forwarded(_) => "forwarded",
        }
    }
}

/// Resolver handles DNS query processing decisions.
///
/// All collaborators are injected, so tests can substitute fakes.
pub struct Resolver {
    blacklist: Arc<Blacklist>,
    cache: Arc<ResponseCache>,
    upstream: Arc<dyn Upstream>,
    ttl_policy: TtlPolicy,
    stats: Stats,
}

impl Resolver {
    pub fn new(
        blacklist: Arc<Blacklist>,
        cache: Arc<ResponseCache>,
        upstream: Arc<dyn Upstream>,
        ttl_policy: TtlPolicy,
    ) -> Self {
        Self {
            blacklist,
            cache,
            upstream,
            ttl_policy,
            stats: Stats::new(),
        }
    }

    /// Resolve a decoded query.
    ///
    /// Errors carry no partial answer; the transport turns them into FORMERR
    /// or SERVFAIL replies.
    pub async fn resolve(&self, query: &Message) -> Result<Answer, ResolveError> {
        let start = Instant::now();
        let result = self.run_pipeline(query).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(Answer::Cached(_)) => self.stats.record_cached(elapsed_ms),
            Ok(Answer::Blocked(_)) => self.stats.record_blocked(elapsed_ms),
            Ok(Answer::Forwarded(_)) => self.stats.record_forwarded(elapsed_ms),
            Err(_) => self.stats.record_failed(elapsed_ms),
        }

        match &result {
            Ok(answer) => debug!(id = query.id(), outcome = answer.kind(), elapsed_ms, "resolved"),
            Err(e) => debug!(id = query.id(), error = %e, elapsed_ms, "resolution failed"),
        }

        result
    }

    async fn run_pipeline(&self, query: &Message) -> Result<Answer, ResolveError> {
        let fingerprint = Fingerprint::of_message(query).ok_or(ResolveError::MalformedQuery)?;

        if let Some(mut cached) = self.cache.get(&fingerprint) {
            cached.set_id(query.id());
            debug!(query = %fingerprint, id = query.id(), "cache hit");
            return Ok(Answer::Cached(cached));
        }

        if self.blacklist.contains(fingerprint.name()) {
            debug!(query = %fingerprint, id = query.id(), "blocked");
            return Ok(Answer::Blocked(reply_with_code(query, ResponseCode::NXDomain)));
        }

        let answer = match self.upstream.exchange(query).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(query = %fingerprint, upstream = %self.upstream.address(), error = %e, "upstream exchange failed");
                return Err(ResolveError::UpstreamFailure(e));
            }
        };

        let ttl = self.ttl_policy.derive(&answer);
        self.cache.put(fingerprint.clone(), &answer, ttl);
        debug!(query = %fingerprint, id = query.id(), ttl_secs = ttl.as_secs(), rcode = %answer.response_code(), "forwarded");

        Ok(Answer::Forwarded(answer))
    }

    pub fn stats_snapshot_and_reset(&self) -> StatsSnapshot {
        self.stats.snapshot_and_reset()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Returns the number of domains in the blacklist.
    pub fn blocked_count(&self) -> usize {
        self.blacklist.len()
    }
}
