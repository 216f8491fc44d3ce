//! DNS query filtering.
//!
//! Blocks ad/tracking domains by testing queried names against a blacklist
//! assembled from remote word lists at startup.

mod blacklist;
mod fetch;

pub use blacklist::{
    Blacklist, BlacklistOptions, BuildOutcome, MembershipMode, parse_line, parse_list,
};
pub use fetch::{HttpFetcher, ListFetcher};
