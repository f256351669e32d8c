//! History event classification.
//!
//! Given a fresh inspect result and the most recent stored record of the
//! same physical item, the classifier labels what happened in between.
//! Rules are evaluated in order and the first match wins:
//!
//! 1. No prior record: the label is inferred from the item's origin code.
//! 2. Owner changed from a market proxy: `MARKET_BUY`.
//! 3. Owner changed from a user to a market proxy: `MARKET_LISTING`.
//! 4. Owner changed between users: `TRADE`.
//! 5. Same owner: sticker diff, then keychain diff; no change, no event.
//!
//! Owner ids are compared as strings; user accounts are recognized by the
//! SteamID64 prefix `7656`. A market proxy sharing that prefix would be
//! misclassified; the unit tests pin the current behavior.
//!
//! The classifier is a pure function: identical inputs always produce the
//! same label.

use crate::transport::{Keychain, Sticker};
use serde::Serialize;
use std::fmt;

/// SteamID64 accounts start with this prefix; anything else is treated as
/// a market proxy.
const STEAM_ID_PREFIX: &str = "7656";

/// History event labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryType {
    TradedUp,
    Dropped,
    PurchasedIngame,
    Unboxed,
    Crafted,
    Unknown,
    Trade,
    MarketBuy,
    MarketListing,
    StickerApply,
    StickerRemove,
    StickerChange,
    StickerScrape,
    KeychainAdded,
    KeychainRemoved,
    KeychainChanged,
}

impl HistoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TradedUp => "TRADED_UP",
            Self::Dropped => "DROPPED",
            Self::PurchasedIngame => "PURCHASED_INGAME",
            Self::Unboxed => "UNBOXED",
            Self::Crafted => "CRAFTED",
            Self::Unknown => "UNKNOWN",
            Self::Trade => "TRADE",
            Self::MarketBuy => "MARKET_BUY",
            Self::MarketListing => "MARKET_LISTING",
            Self::StickerApply => "STICKER_APPLY",
            Self::StickerRemove => "STICKER_REMOVE",
            Self::StickerChange => "STICKER_CHANGE",
            Self::StickerScrape => "STICKER_SCRAPE",
            Self::KeychainAdded => "KEYCHAIN_ADDED",
            Self::KeychainRemoved => "KEYCHAIN_REMOVED",
            Self::KeychainChanged => "KEYCHAIN_CHANGED",
        }
    }

    /// Parses the stored string form.
    pub fn from_str_opt(raw: &str) -> Option<Self> {
        let value = match raw {
            "TRADED_UP" => Self::TradedUp,
            "DROPPED" => Self::Dropped,
            "PURCHASED_INGAME" => Self::PurchasedIngame,
            "UNBOXED" => Self::Unboxed,
            "CRAFTED" => Self::Crafted,
            "UNKNOWN" => Self::Unknown,
            "TRADE" => Self::Trade,
            "MARKET_BUY" => Self::MarketBuy,
            "MARKET_LISTING" => Self::MarketListing,
            "STICKER_APPLY" => Self::StickerApply,
            "STICKER_REMOVE" => Self::StickerRemove,
            "STICKER_CHANGE" => Self::StickerChange,
            "STICKER_SCRAPE" => Self::StickerScrape,
            "KEYCHAIN_ADDED" => Self::KeychainAdded,
            "KEYCHAIN_REMOVED" => Self::KeychainRemoved,
            "KEYCHAIN_CHANGED" => Self::KeychainChanged,
            _ => return None,
        };
        Some(value)
    }
}

impl fmt::Display for HistoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The owner and attachment view of an item at one point in time.
#[derive(Debug, Clone, Copy)]
pub struct ItemSnapshot<'a> {
    pub owner: &'a str,
    pub stickers: &'a [Sticker],
    pub keychains: &'a [Keychain],
}

/// Classifies the transition from `prior` to `current`.
///
/// Returns `None` only for a same-owner comparison with no sticker or
/// keychain change; a fresh item (no prior) always classifies.
pub fn classify(
    current: ItemSnapshot<'_>,
    origin: Option<u32>,
    prior: Option<ItemSnapshot<'_>>,
) -> Option<HistoryType> {
    let Some(prior) = prior else {
        return Some(origin_label(origin));
    };

    if prior.owner != current.owner {
        if !prior.owner.starts_with(STEAM_ID_PREFIX) {
            return Some(HistoryType::MarketBuy);
        }
        if !current.owner.starts_with(STEAM_ID_PREFIX) {
            return Some(HistoryType::MarketListing);
        }
        return Some(HistoryType::Trade);
    }

    if let Some(change) = diff_stickers(prior.stickers, current.stickers) {
        return Some(change);
    }
    diff_keychains(prior.keychains, current.keychains)
}

/// Maps an item origin code to its acquisition label.
fn origin_label(origin: Option<u32>) -> HistoryType {
    match origin {
        Some(8) => HistoryType::TradedUp,
        Some(4) => HistoryType::Dropped,
        Some(1) => HistoryType::PurchasedIngame,
        Some(2) => HistoryType::Unboxed,
        Some(3) => HistoryType::Crafted,
        _ => HistoryType::Unknown,
    }
}

fn diff_stickers(prev: &[Sticker], curr: &[Sticker]) -> Option<HistoryType> {
    if curr.len() > prev.len() {
        return Some(HistoryType::StickerApply);
    }
    if curr.len() < prev.len() {
        return Some(HistoryType::StickerRemove);
    }
    if stickers_identical(prev, curr) {
        return None;
    }
    // Equal count with a mismatch. A sticker whose placement survived but
    // whose wear strictly increased was scraped, not swapped.
    for old in prev {
        if let Some(new) = curr.iter().find(|s| s.placement() == old.placement()) {
            if let (Some(old_wear), Some(new_wear)) = (old.wear, new.wear) {
                if new_wear > old_wear {
                    return Some(HistoryType::StickerScrape);
                }
            }
        }
    }
    Some(HistoryType::StickerChange)
}

fn stickers_identical(prev: &[Sticker], curr: &[Sticker]) -> bool {
    if prev.len() != curr.len() {
        return false;
    }
    prev.iter().all(|old| {
        curr.iter()
            .any(|new| new.placement() == old.placement() && new.wear == old.wear)
    })
}

fn diff_keychains(prev: &[Keychain], curr: &[Keychain]) -> Option<HistoryType> {
    match (prev.is_empty(), curr.is_empty()) {
        (true, false) => Some(HistoryType::KeychainAdded),
        (false, true) => Some(HistoryType::KeychainRemoved),
        (true, true) => None,
        (false, false) => {
            if prev != curr {
                Some(HistoryType::KeychainChanged)
            } else {
                None
            }
        }
    }
}
