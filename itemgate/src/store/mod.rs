//! SQLite persistence for assets and history.
//!
//! All access goes through tokio-rusqlite's single background connection
//! thread; the store is only called from the coordinator side, so writes
//! never race. The asset table is keyed by the derived unique id and
//! upserted on every successful inspect; history is append-only with a
//! uniqueness constraint on `(unique_id, asset_id)` so one asset id is
//! logged at most once per physical item.

mod records;

pub use records::{unique_id, AssetRecord, HistoryRecord};

use crate::history::HistoryType;
use crate::transport::{Keychain, Sticker};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

/// Store failures. Cache-path reads swallow these as misses; write-path
/// failures surface as 500s.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("corrupt stored record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS assets (
    unique_id   TEXT PRIMARY KEY,
    asset_id    INTEGER NOT NULL,
    owner       TEXT NOT NULL,
    def_index   INTEGER,
    paint_index INTEGER,
    paint_seed  INTEGER,
    paint_wear  REAL,
    origin      INTEGER,
    quest_id    INTEGER,
    rarity      INTEGER,
    quality     INTEGER,
    custom_name TEXT,
    stickers    TEXT NOT NULL DEFAULT '[]',
    keychains   TEXT NOT NULL DEFAULT '[]',
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_assets_asset_id ON assets(asset_id);
CREATE INDEX IF NOT EXISTS idx_assets_item_tuple
    ON assets(paint_wear, paint_index, def_index, paint_seed);

CREATE TABLE IF NOT EXISTS history (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    unique_id     TEXT NOT NULL,
    asset_id      INTEGER NOT NULL,
    prev_asset_id INTEGER,
    event_type    TEXT NOT NULL,
    owner         TEXT NOT NULL,
    prev_owner    TEXT,
    stickers      TEXT NOT NULL DEFAULT '[]',
    created_at    TEXT NOT NULL,
    UNIQUE(unique_id, asset_id)
);
";

/// Asset and history persistence.
#[derive(Clone)]
pub struct AssetStore {
    conn: Connection,
}

impl AssetStore {
    /// Opens (or creates) the store at the given path and applies the
    /// schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).await?;
        Self::setup(conn).await
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::setup(conn).await
    }

    async fn setup(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Latest stored record for an asset id, if any. This is the cache
    /// lookup on the inspect path.
    pub async fn find_asset(&self, asset_id: u64) -> Result<Option<AssetRecord>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT unique_id, asset_id, owner, def_index, paint_index, paint_seed,
                            paint_wear, origin, quest_id, rarity, quality, custom_name,
                            stickers, keychains, updated_at
                     FROM assets
                     WHERE asset_id = ?1
                     ORDER BY updated_at DESC
                     LIMIT 1",
                )?;
                let rows = stmt
                    .query_map(params![as_db(asset_id)], raw_asset_row)?
                    .collect::<Result<Vec<RawAsset>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().next().map(RawAsset::decode).transpose()
    }

    /// Upserts the asset by unique id. Idempotent: repeating the same
    /// result rewrites the single row.
    pub async fn upsert_asset(&self, record: &AssetRecord) -> Result<(), StoreError> {
        let row = RawAssetOwned::encode(record)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO assets (unique_id, asset_id, owner, def_index, paint_index,
                                         paint_seed, paint_wear, origin, quest_id, rarity,
                                         quality, custom_name, stickers, keychains, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                     ON CONFLICT(unique_id) DO UPDATE SET
                        asset_id = excluded.asset_id,
                        owner = excluded.owner,
                        def_index = excluded.def_index,
                        paint_index = excluded.paint_index,
                        paint_seed = excluded.paint_seed,
                        paint_wear = excluded.paint_wear,
                        origin = excluded.origin,
                        quest_id = excluded.quest_id,
                        rarity = excluded.rarity,
                        quality = excluded.quality,
                        custom_name = excluded.custom_name,
                        stickers = excluded.stickers,
                        keychains = excluded.keychains,
                        updated_at = excluded.updated_at",
                    params![
                        row.unique_id,
                        row.asset_id,
                        row.owner,
                        row.def_index,
                        row.paint_index,
                        row.paint_seed,
                        row.paint_wear,
                        row.origin,
                        row.quest_id,
                        row.rarity,
                        row.quality,
                        row.custom_name,
                        row.stickers,
                        row.keychains,
                        row.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Most recent record matching the physical-item tuple, excluding the
    /// asset id currently being written so the classifier can never see
    /// the record it is about to produce.
    #[allow(clippy::too_many_arguments)]
    pub async fn find_prior_asset(
        &self,
        paint_wear: Option<f64>,
        paint_index: Option<u32>,
        def_index: Option<u32>,
        paint_seed: Option<u32>,
        origin: Option<u32>,
        quest_id: Option<u32>,
        rarity: Option<u32>,
        exclude_asset_id: u64,
    ) -> Result<Option<AssetRecord>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT unique_id, asset_id, owner, def_index, paint_index, paint_seed,
                            paint_wear, origin, quest_id, rarity, quality, custom_name,
                            stickers, keychains, updated_at
                     FROM assets
                     WHERE paint_wear IS ?1
                       AND paint_index IS ?2
                       AND def_index IS ?3
                       AND paint_seed IS ?4
                       AND origin IS ?5
                       AND quest_id IS ?6
                       AND rarity IS ?7
                       AND asset_id != ?8
                     ORDER BY updated_at DESC
                     LIMIT 1",
                )?;
                let rows = stmt
                    .query_map(
                        params![
                            paint_wear,
                            paint_index,
                            def_index,
                            paint_seed,
                            origin,
                            quest_id,
                            rarity,
                            as_db(exclude_asset_id),
                        ],
                        raw_asset_row,
                    )?
                    .collect::<Result<Vec<RawAsset>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().next().map(RawAsset::decode).transpose()
    }

    /// Appends one history row. Returns false when this `(unique_id,
    /// asset_id)` pair was already logged.
    pub async fn insert_history(&self, record: &HistoryRecord) -> Result<bool, StoreError> {
        let unique_id = record.unique_id.clone();
        let asset_id = as_db(record.asset_id);
        let prev_asset_id = record.prev_asset_id.map(as_db);
        let event_type = record.event_type.as_str();
        let owner = record.owner.clone();
        let prev_owner = record.prev_owner.clone();
        let stickers = serde_json::to_string(&record.stickers)?;
        let created_at = record.created_at.to_rfc3339();

        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT OR IGNORE INTO history
                        (unique_id, asset_id, prev_asset_id, event_type, owner,
                         prev_owner, stickers, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        unique_id,
                        asset_id,
                        prev_asset_id,
                        event_type,
                        owner,
                        prev_owner,
                        stickers,
                        created_at,
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(inserted)
    }

    /// History rows for one item, newest first. Used by tests and
    /// debugging surfaces.
    pub async fn history_for(&self, unique_id: &str) -> Result<Vec<HistoryRecord>, StoreError> {
        let unique_id = unique_id.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT unique_id, asset_id, prev_asset_id, event_type, owner,
                            prev_owner, stickers, created_at
                     FROM history
                     WHERE unique_id = ?1
                     ORDER BY id DESC",
                )?;
                let rows = stmt
                    .query_map(params![unique_id], |row| {
                        Ok(RawHistory {
                            unique_id: row.get(0)?,
                            asset_id: row.get(1)?,
                            prev_asset_id: row.get(2)?,
                            event_type: row.get(3)?,
                            owner: row.get(4)?,
                            prev_owner: row.get(5)?,
                            stickers: row.get(6)?,
                            created_at: row.get(7)?,
                        })
                    })?
                    .collect::<Result<Vec<RawHistory>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(RawHistory::decode).collect()
    }

    /// Row count of the assets table.
    pub async fn asset_count(&self) -> Result<u64, StoreError> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count as u64)
    }
}

/// Signed representation used for INTEGER columns; u64 ids round-trip
/// through the cast unchanged.
fn as_db(id: u64) -> i64 {
    id as i64
}

fn from_db(id: i64) -> u64 {
    id as u64
}

struct RawAsset {
    unique_id: String,
    asset_id: i64,
    owner: String,
    def_index: Option<u32>,
    paint_index: Option<u32>,
    paint_seed: Option<u32>,
    paint_wear: Option<f64>,
    origin: Option<u32>,
    quest_id: Option<u32>,
    rarity: Option<u32>,
    quality: Option<u32>,
    custom_name: Option<String>,
    stickers: String,
    keychains: String,
    updated_at: String,
}

fn raw_asset_row(row: &Row<'_>) -> Result<RawAsset, rusqlite::Error> {
    Ok(RawAsset {
        unique_id: row.get(0)?,
        asset_id: row.get(1)?,
        owner: row.get(2)?,
        def_index: row.get(3)?,
        paint_index: row.get(4)?,
        paint_seed: row.get(5)?,
        paint_wear: row.get(6)?,
        origin: row.get(7)?,
        quest_id: row.get(8)?,
        rarity: row.get(9)?,
        quality: row.get(10)?,
        custom_name: row.get(11)?,
        stickers: row.get(12)?,
        keychains: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

impl RawAsset {
    fn decode(self) -> Result<AssetRecord, StoreError> {
        let stickers: Vec<Sticker> = serde_json::from_str(&self.stickers)?;
        let keychains: Vec<Keychain> = serde_json::from_str(&self.keychains)?;
        let updated_at = DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Ok(AssetRecord {
            unique_id: self.unique_id,
            asset_id: from_db(self.asset_id),
            owner: self.owner,
            def_index: self.def_index,
            paint_index: self.paint_index,
            paint_seed: self.paint_seed,
            paint_wear: self.paint_wear,
            origin: self.origin,
            quest_id: self.quest_id,
            rarity: self.rarity,
            quality: self.quality,
            custom_name: self.custom_name,
            stickers,
            keychains,
            updated_at,
        })
    }
}

/// Owned column values shipped into the connection closure.
struct RawAssetOwned {
    unique_id: String,
    asset_id: i64,
    owner: String,
    def_index: Option<u32>,
    paint_index: Option<u32>,
    paint_seed: Option<u32>,
    paint_wear: Option<f64>,
    origin: Option<u32>,
    quest_id: Option<u32>,
    rarity: Option<u32>,
    quality: Option<u32>,
    custom_name: Option<String>,
    stickers: String,
    keychains: String,
    updated_at: String,
}

impl RawAssetOwned {
    fn encode(record: &AssetRecord) -> Result<Self, StoreError> {
        Ok(Self {
            unique_id: record.unique_id.clone(),
            asset_id: as_db(record.asset_id),
            owner: record.owner.clone(),
            def_index: record.def_index,
            paint_index: record.paint_index,
            paint_seed: record.paint_seed,
            paint_wear: record.paint_wear,
            origin: record.origin,
            quest_id: record.quest_id,
            rarity: record.rarity,
            quality: record.quality,
            custom_name: record.custom_name.clone(),
            stickers: serde_json::to_string(&record.stickers)?,
            keychains: serde_json::to_string(&record.keychains)?,
            updated_at: record.updated_at.to_rfc3339(),
        })
    }
}

struct RawHistory {
    unique_id: String,
    asset_id: i64,
    prev_asset_id: Option<i64>,
    event_type: String,
    owner: String,
    prev_owner: Option<String>,
    stickers: String,
    created_at: String,
}

impl RawHistory {
    fn decode(self) -> Result<HistoryRecord, StoreError> {
        let stickers: Vec<Sticker> = serde_json::from_str(&self.stickers)?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        Ok(HistoryRecord {
            unique_id: self.unique_id,
            asset_id: from_db(self.asset_id),
            prev_asset_id: self.prev_asset_id.map(from_db),
            event_type: HistoryType::from_str_opt(&self.event_type)
                .unwrap_or(HistoryType::Unknown),
            owner: self.owner,
            prev_owner: self.prev_owner,
            stickers,
            created_at,
        })
    }
}
