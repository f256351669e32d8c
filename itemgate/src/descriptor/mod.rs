//! Inspect descriptors.
//!
//! A descriptor is the `(S, A, D, M)` tuple identifying an item to inspect:
//! owner steam id or market flag, asset id, proof token, and market id.
//! Exactly one of `S` and `M` is non-zero.

mod link;

pub use link::{format_link, parse_link, LinkError};

/// A parsed, normalized inspect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InspectDescriptor {
    /// Owner steam id, or 0 for a market item.
    pub s: u64,
    /// Asset id.
    pub a: u64,
    /// Proof token.
    pub d: u64,
    /// Market id, or 0 for an owned item.
    pub m: u64,
    /// Bypass the cache (honored only when the gateway allows refresh).
    pub refresh: bool,
    /// When false, the caller does not wait: the request is acknowledged
    /// and processed in the background.
    pub reply: bool,
    /// Deprioritize behind normal traffic.
    pub low_priority: bool,
}

impl InspectDescriptor {
    /// Builds a descriptor for an owned item.
    pub fn owned(s: u64, a: u64, d: u64) -> Self {
        Self {
            s,
            a,
            d,
            m: 0,
            refresh: false,
            reply: true,
            low_priority: false,
        }
    }

    /// Builds a descriptor for a market listing.
    pub fn market(m: u64, a: u64, d: u64) -> Self {
        Self {
            s: 0,
            a,
            d,
            m,
            refresh: false,
            reply: true,
            low_priority: false,
        }
    }

    /// Checks the exactly-one-of-S/M invariant.
    pub fn is_valid(&self) -> bool {
        (self.s != 0) ^ (self.m != 0)
    }

    /// The id the game transport authenticates the lookup against:
    /// the owner steam id for owned items, the market id for listings.
    pub fn owner(&self) -> u64 {
        if self.s != 0 {
            self.s
        } else {
            self.m
        }
    }

    /// True when this descriptor points at a market listing.
    pub fn is_market(&self) -> bool {
        self.m != 0
    }
}
