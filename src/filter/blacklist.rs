//! Blacklist of ad/tracking domains.
//!
//! Built once at startup from remote word lists, then read-only: lookups take
//! `&self` and need no locking.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use bloomfilter::Bloom;
use futures::future::join_all;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use tracing::{info, warn};

use crate::dns::normalize_name;
use crate::error::SourceError;

use super::fetch::ListFetcher;

/// Membership structure backing the blacklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum MembershipMode {
    /// Hash set: no false positives, more memory.
    #[default]
    Exact,
    /// Bloom filter: no false negatives, false positives at the configured rate.
    Bloom,
}

impl fmt::Display for MembershipMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => f.write_str("exact"),
            Self::Bloom => f.write_str("bloom"),
        }
    }
}

impl FromStr for MembershipMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "bloom" => Ok(Self::Bloom),
            other => Err(format!("unknown blacklist mode '{other}'")),
        }
    }
}

impl TryFrom<String> for MembershipMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlacklistOptions {
    pub mode: MembershipMode,
    /// Bloom filter sizing.
    pub expected_items: usize,
    pub false_positive_rate: f64,
    /// Also block every subdomain of a listed domain.
    pub match_subdomains: bool,
}

impl Default for BlacklistOptions {
    fn default() -> Self {
        Self {
            mode: MembershipMode::Exact,
            expected_items: 3_000_000,
            false_positive_rate: 0.001,
            match_subdomains: false,
        }
    }
}

enum Membership {
    Exact(FxHashSet<String>),
    Bloom(Bloom<str>),
}

/// Result of [`Blacklist::build`]: the merged blacklist plus the sources that
/// were skipped.
pub struct BuildOutcome {
    pub blacklist: Blacklist,
    pub failures: Vec<SourceError>,
}

/// A set of blocked domains for efficient lookup.
pub struct Blacklist {
    membership: Membership,
    /// Insertions performed. Exact for the hash set; for a Bloom filter
    /// duplicates are counted twice.
    len: usize,
    match_subdomains: bool,
}

impl Blacklist {
    /// Create an empty blacklist.
    pub fn new(options: &BlacklistOptions) -> Self {
        let membership = match options.mode {
            MembershipMode::Exact => Membership::Exact(FxHashSet::default()),
            MembershipMode::Bloom => Membership::Bloom(Bloom::new_for_fp_rate(
                options.expected_items.max(1),
                options.false_positive_rate,
            )),
        };

        Self {
            membership,
            len: 0,
            match_subdomains: options.match_subdomains,
        }
    }

    /// Create a blacklist from domain names, normalizing each one.
    pub fn from_entries<I, S>(entries: I, options: &BlacklistOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut blacklist = Self::new(options);
        for entry in entries {
            blacklist.insert(&normalize_name(entry.as_ref()));
        }
        blacklist
    }

    /// Fetch every source concurrently and merge the parsed lists.
    ///
    /// A source that cannot be fetched or parsed is logged and skipped; the
    /// build itself never fails and may produce an empty blacklist.
    pub async fn build(
        sources: &[String],
        fetcher: &dyn ListFetcher,
        options: &BlacklistOptions,
    ) -> BuildOutcome {
        let fetches = sources.iter().map(|url| async move {
            let body = fetcher.fetch(url).await.map_err(|source| SourceError::Fetch {
                url: url.clone(),
                source,
            })?;
            parse_list(&body).map_err(|source| SourceError::Parse {
                url: url.clone(),
                source,
            })
        });
        let results = join_all(fetches).await;

        let mut blacklist = Self::new(options);
        let mut failures = Vec::new();

        for (url, result) in sources.iter().zip(results) {
            match result {
                Ok(entries) => {
                    info!(source = %url, entries = entries.len(), "loaded blacklist source");
                    for entry in &entries {
                        blacklist.insert(entry);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "skipping blacklist source");
                    failures.push(e);
                }
            }
        }

        BuildOutcome {
            blacklist,
            failures,
        }
    }

    fn insert(&mut self, domain: &str) {
        if domain.is_empty() {
            return;
        }
        match &mut self.membership {
            Membership::Exact(set) => {
                if set.insert(domain.to_string()) {
                    self.len += 1;
                }
            }
            Membership::Bloom(bloom) => {
                bloom.set(domain);
                self.len += 1;
            }
        }
    }

    /// Check if a domain is blocked. Case and a trailing dot are ignored.
    ///
    /// With `match_subdomains`, "tracker.ads.example.com" is blocked if
    /// "ads.example.com" is listed.
    pub fn contains(&self, name: &str) -> bool {
        let name = normalize_name(name);
        if name.is_empty() {
            return false;
        }
        if !self.match_subdomains {
            return self.contains_exact(&name);
        }

        let mut current = name.as_str();
        loop {
            if self.contains_exact(current) {
                return true;
            }
            match current.find('.') {
                Some(pos) => current = &current[pos + 1..],
                None => return false,
            }
        }
    }

    fn contains_exact(&self, name: &str) -> bool {
        match &self.membership {
            Membership::Exact(set) => set.contains(name),
            Membership::Bloom(bloom) => bloom.check(name),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn mode(&self) -> MembershipMode {
        match self.membership {
            Membership::Exact(_) => MembershipMode::Exact,
            Membership::Bloom(_) => MembershipMode::Bloom,
        }
    }
}

impl Default for Blacklist {
    fn default() -> Self {
        Self::new(&BlacklistOptions::default())
    }
}

/// Extract the domain from one line of a hosts file or ad-block list.
///
/// Blank lines and `#` comments yield `None`. A leading `0.0.0.0` /
/// `127.0.0.1` address or `||` marker is stripped, as is a trailing `^` and
/// then a trailing `.`. Anything after the first whitespace is ignored.
/// Hosts-file header entries (`localhost` and friends, bare IP addresses)
/// are skipped.
pub fn parse_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let line = ["0.0.0.0", "127.0.0.1"]
        .iter()
        .find_map(|addr| {
            line.strip_prefix(addr)
                .filter(|rest| rest.starts_with(char::is_whitespace))
        })
        .map(str::trim_start)
        .unwrap_or(line);
    let line = line.strip_prefix("||").unwrap_or(line);
    let line = line.split_whitespace().next()?;
    let line = line.strip_suffix('^').unwrap_or(line);
    let line = line.strip_suffix('.').unwrap_or(line);

    let line = line.to_ascii_lowercase();
    if line.is_empty() || is_hosts_header_entry(&line) {
        return None;
    }
    Some(line)
}

fn is_hosts_header_entry(name: &str) -> bool {
    matches!(
        name,
        "localhost" | "localhost.localdomain" | "local" | "broadcasthost" | "ip6-localhost"
            | "ip6-loopback"
    ) || name.parse::<IpAddr>().is_ok()
}

/// Parse a whole list body.
pub fn parse_list(body: &[u8]) -> Result<Vec<String>, std::str::Utf8Error> {
    let text = std::str::from_utf8(body)?;
    Ok(text.lines().filter_map(parse_line).collect())
}
