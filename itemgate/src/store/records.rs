//! Persisted record types and the unique-id derivation.

use crate::history::HistoryType;
use crate::transport::{ItemRecord, Keychain, Sticker};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha1::{Digest, Sha1};

/// Derives the asset upsert key: the first 8 hex digits of
/// `SHA-1("{paintSeed}-{paintIndex}-{paintWear}-{defIndex}")`, with absent
/// fields normalized to `0`.
pub fn unique_id(
    paint_seed: Option<u32>,
    paint_index: Option<u32>,
    paint_wear: Option<f64>,
    def_index: Option<u32>,
) -> String {
    let canonical = format!(
        "{}-{}-{}-{}",
        paint_seed.unwrap_or(0),
        paint_index.unwrap_or(0),
        paint_wear.unwrap_or(0.0),
        def_index.unwrap_or(0),
    );
    let digest = Sha1::digest(canonical.as_bytes());
    digest
        .iter()
        .take(4)
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

/// One row of the asset table: the latest known view of a physical item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetRecord {
    pub unique_id: String,
    pub asset_id: u64,
    /// Owner at inspect time: a SteamID64 or a market listing id.
    pub owner: String,
    pub def_index: Option<u32>,
    pub paint_index: Option<u32>,
    pub paint_seed: Option<u32>,
    pub paint_wear: Option<f64>,
    pub origin: Option<u32>,
    pub quest_id: Option<u32>,
    pub rarity: Option<u32>,
    pub quality: Option<u32>,
    pub custom_name: Option<String>,
    pub stickers: Vec<Sticker>,
    pub keychains: Vec<Keychain>,
    pub updated_at: DateTime<Utc>,
}

impl AssetRecord {
    /// Builds the record to upsert from one inspect result.
    pub fn from_item(record: &ItemRecord, owner: String) -> Self {
        Self {
            unique_id: unique_id(
                record.paint_seed,
                record.paint_index,
                record.paint_wear,
                record.def_index,
            ),
            asset_id: record.asset_id,
            owner,
            def_index: record.def_index,
            paint_index: record.paint_index,
            paint_seed: record.paint_seed,
            paint_wear: record.paint_wear,
            origin: record.origin,
            quest_id: record.quest_id,
            rarity: record.rarity,
            quality: record.quality,
            custom_name: record.custom_name.clone(),
            stickers: record.stickers.clone(),
            keychains: record.keychains.clone(),
            updated_at: Utc::now(),
        }
    }
}

/// One append-only history row.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub unique_id: String,
    pub asset_id: u64,
    pub prev_asset_id: Option<u64>,
    pub event_type: HistoryType,
    pub owner: String,
    pub prev_owner: Option<String>,
    pub stickers: Vec<Sticker>,
    pub created_at: DateTime<Utc>,
}
