//! Game transport data types.
//!
//! The transport yields a loosely-typed attribute record; known fields are
//! modeled directly and everything else rides in an opaque bag so newer
//! protocol fields survive a round-trip through the gateway.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by the game transport.
///
/// The reason codes for permanent account failures are fixed: a transport
/// implementation must map its own protocol errors onto these kinds, and
/// callers rely on [`TransportError::is_permanent`] for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The account is banned or locked; never retried.
    #[error("account disabled")]
    AccountDisabled,
    /// The stored password is wrong; never retried.
    #[error("invalid password")]
    InvalidPassword,
    /// The account hit a permanent rate limit; never retried.
    #[error("rate limit exceeded permanently")]
    RateLimitExceededPermanent,
    /// Login was throttled; the account may retry after a hold-off.
    #[error("login throttled")]
    LoginThrottled,
    /// The connection dropped.
    #[error("disconnected")]
    Disconnected,
    /// The transport did not answer within its own deadline.
    #[error("transport timeout")]
    Timeout,
    /// Any other protocol-level failure.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// True for reason codes that are terminal for the account.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::AccountDisabled | Self::InvalidPassword | Self::RateLimitExceededPermanent
        )
    }
}

/// Lifecycle events emitted by a transport outside of call results.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The underlying session dropped.
    Disconnected,
    /// The transport hit an asynchronous error.
    Error(TransportError),
}

/// A sticker applied to an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sticker {
    pub slot: u32,
    pub sticker_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wear: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_z: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<f64>,
}

impl Sticker {
    /// Placement identity: everything except wear. Two stickers with equal
    /// placement but different wear are the same sticker, scraped.
    pub fn placement(&self) -> (u32, u32, [u64; 4]) {
        (
            self.slot,
            self.sticker_id,
            [
                self.offset_x.unwrap_or(0.0).to_bits(),
                self.offset_y.unwrap_or(0.0).to_bits(),
                self.offset_z.unwrap_or(0.0).to_bits(),
                self.rotation.unwrap_or(0.0).to_bits(),
            ],
        )
    }
}

/// A keychain (charm) attached to an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keychain {
    pub slot: u32,
    pub keychain_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<u32>,
}

/// The attribute record returned by one inspect round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Asset id the record describes.
    pub asset_id: u64,
    pub def_index: Option<u32>,
    pub paint_index: Option<u32>,
    pub paint_seed: Option<u32>,
    pub paint_wear: Option<f64>,
    pub origin: Option<u32>,
    pub quest_id: Option<u32>,
    pub rarity: Option<u32>,
    pub quality: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub stickers: Vec<Sticker>,
    #[serde(default)]
    pub keychains: Vec<Keychain>,
    /// Fields the gateway does not model; passed through untouched.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ItemRecord {
    /// Minimal record for the given asset.
    pub fn new(asset_id: u64) -> Self {
        Self {
            asset_id,
            def_index: None,
            paint_index: None,
            paint_seed: None,
            paint_wear: None,
            origin: None,
            quest_id: None,
            rarity: None,
            quality: None,
            custom_name: None,
            stickers: Vec::new(),
            keychains: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    /// True when the record carries the full paint triple; history is only
    /// recorded for such results.
    pub fn has_paint_fields(&self) -> bool {
        self.paint_seed.is_some() && self.paint_wear.is_some() && self.paint_index.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_kinds() {
        assert!(TransportError::AccountDisabled.is_permanent());
        assert!(TransportError::InvalidPassword.is_permanent());
        assert!(TransportError::RateLimitExceededPermanent.is_permanent());
        assert!(!TransportError::LoginThrottled.is_permanent());
        assert!(!TransportError::Disconnected.is_permanent());
        assert!(!TransportError::Timeout.is_permanent());
    }

    #[test]
    fn test_sticker_placement_ignores_wear() {
        let a = Sticker {
            slot: 0,
            sticker_id: 202,
            wear: Some(0.05),
            offset_x: Some(1.5),
            offset_y: None,
            offset_z: None,
            rotation: None,
        };
        let mut b = a.clone();
        b.wear = Some(0.30);
        assert_eq!(a.placement(), b.placement());

        b.offset_x = Some(2.0);
        assert_ne!(a.placement(), b.placement());
    }

    #[test]
    fn test_has_paint_fields() {
        let mut record = ItemRecord::new(1);
        assert!(!record.has_paint_fields());
        record.paint_seed = Some(661);
        record.paint_wear = Some(0.07);
        record.paint_index = Some(44);
        assert!(record.has_paint_fields());
    }

    #[test]
    fn test_record_serde_round_trip() {
        let mut record = ItemRecord::new(42);
        record.paint_seed = Some(661);
        record.stickers.push(Sticker {
            slot: 0,
            sticker_id: 202,
            wear: Some(0.1),
            offset_x: None,
            offset_y: None,
            offset_z: None,
            rotation: None,
        });
        let json = serde_json::to_string(&record).unwrap();
        let back: ItemRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
