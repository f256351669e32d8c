//! The inspect coordinator: public entry point of the gateway.
//!
//! One request flows: parse → cache lookup → admission → fleet → persist →
//! classify history → format. The coordinator owns the persistence store;
//! the fleet never touches it.
//!
//! Error surface follows the gateway taxonomy: cache read failures are
//! swallowed as misses, transient fleet errors were already retried by the
//! manager, and persistence failures on the write path fail the request
//! without touching the fleet.

use crate::descriptor::InspectDescriptor;
use crate::error::InspectError;
use crate::fleet::WorkerManager;
use crate::history::{classify, HistoryType, ItemSnapshot};
use crate::queue::Priority;
use crate::store::{AssetRecord, AssetStore, HistoryRecord};
use crate::transport::{ItemRecord, Keychain, Sticker};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The formatted item payload returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ItemInfo {
    pub itemid: u64,
    pub uniqueid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defindex: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paintindex: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paintseed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floatvalue: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub questid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rarity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customname: Option<String>,
    pub stickers: Vec<Sticker>,
    pub keychains: Vec<Keychain>,
}

impl ItemInfo {
    /// Projects a stored record onto the response shape.
    pub fn from_asset(record: &AssetRecord) -> Self {
        Self {
            itemid: record.asset_id,
            uniqueid: record.unique_id.clone(),
            defindex: record.def_index,
            paintindex: record.paint_index,
            paintseed: record.paint_seed,
            floatvalue: record.paint_wear,
            origin: record.origin,
            questid: record.quest_id,
            rarity: record.rarity,
            quality: record.quality,
            customname: record.custom_name.clone(),
            stickers: record.stickers.clone(),
            keychains: record.keychains.clone(),
        }
    }
}

/// A completed inspect request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum InspectResponse {
    /// The item's attributes, with a flag for cache-served responses.
    Item {
        iteminfo: ItemInfo,
        cached: bool,
    },
    /// Acknowledgement for a `reply=false` request; processing continues
    /// in the background.
    Accepted { accepted: bool, asset_id: u64 },
}

/// Public entry point: consults the cache, drives the fleet, persists and
/// formats results.
pub struct InspectCoordinator {
    store: AssetStore,
    fleet: Arc<WorkerManager>,
    allow_refresh: bool,
}

impl InspectCoordinator {
    pub fn new(store: AssetStore, fleet: Arc<WorkerManager>, allow_refresh: bool) -> Arc<Self> {
        Arc::new(Self {
            store,
            fleet,
            allow_refresh,
        })
    }

    /// The fleet owner, for the stats surface and admin commands.
    pub fn fleet(&self) -> &Arc<WorkerManager> {
        &self.fleet
    }

    /// Serves one inspect request end to end.
    pub async fn inspect_item(
        self: &Arc<Self>,
        desc: InspectDescriptor,
    ) -> Result<InspectResponse, InspectError> {
        if !desc.is_valid() {
            return Err(InspectError::BadDescriptor(
                "exactly one of S and M must be non-zero".into(),
            ));
        }

        let refresh = desc.refresh && self.allow_refresh;
        if !refresh {
            match self.store.find_asset(desc.a).await {
                Ok(Some(record)) => {
                    self.fleet.increment_cached();
                    debug!(asset_id = desc.a, "Cache hit");
                    return Ok(InspectResponse::Item {
                        iteminfo: ItemInfo::from_asset(&record),
                        cached: true,
                    });
                }
                Ok(None) => {}
                // A cache read failure is a miss, not a request failure.
                Err(err) => warn!(asset_id = desc.a, %err, "Cache lookup failed"),
            }
        }

        if self.fleet.queue_is_full() {
            return Err(InspectError::QueueFull);
        }

        let priority = if desc.low_priority {
            Priority::Low
        } else {
            Priority::Normal
        };

        if !desc.reply {
            let coordinator = Arc::clone(self);
            tokio::spawn(async move {
                match coordinator
                    .fleet
                    .inspect(desc.s, desc.a, desc.d, desc.m, priority)
                    .await
                {
                    Ok(record) => {
                        if let Err(err) = coordinator.process_result(&desc, &record).await {
                            warn!(asset_id = desc.a, %err, "Background result processing failed");
                        }
                    }
                    Err(err) => warn!(asset_id = desc.a, %err, "Background inspect failed"),
                }
            });
            return Ok(InspectResponse::Accepted {
                accepted: true,
                asset_id: desc.a,
            });
        }

        let record = self
            .fleet
            .inspect(desc.s, desc.a, desc.d, desc.m, priority)
            .await?;
        let info = self.process_result(&desc, &record).await?;
        Ok(InspectResponse::Item {
            iteminfo: info,
            cached: false,
        })
    }

    /// Persists one fresh result and classifies its history event.
    ///
    /// The prior record is read before the upsert and scoped to other
    /// asset ids, so the classifier cannot observe the row this call is
    /// about to write.
    async fn process_result(
        &self,
        desc: &InspectDescriptor,
        record: &ItemRecord,
    ) -> Result<ItemInfo, InspectError> {
        let owner = desc.owner().to_string();
        let asset = AssetRecord::from_item(record, owner.clone());

        let prior = self
            .store
            .find_prior_asset(
                record.paint_wear,
                record.paint_index,
                record.def_index,
                record.paint_seed,
                record.origin,
                record.quest_id,
                record.rarity,
                record.asset_id,
            )
            .await
            .map_err(|err| InspectError::Persistence(err.to_string()))?;

        self.store
            .upsert_asset(&asset)
            .await
            .map_err(|err| InspectError::Persistence(err.to_string()))?;

        if record.has_paint_fields() {
            let current = ItemSnapshot {
                owner: &owner,
                stickers: &record.stickers,
                keychains: &record.keychains,
            };
            let prior_snapshot = prior.as_ref().map(|p| ItemSnapshot {
                owner: &p.owner,
                stickers: &p.stickers,
                keychains: &p.keychains,
            });
            if let Some(event_type) = classify(current, record.origin, prior_snapshot) {
                self.append_history(&asset, record, prior.as_ref(), event_type)
                    .await?;
            }
        }

        Ok(ItemInfo::from_asset(&asset))
    }

    async fn append_history(
        &self,
        asset: &AssetRecord,
        record: &ItemRecord,
        prior: Option<&AssetRecord>,
        event_type: HistoryType,
    ) -> Result<(), InspectError> {
        let history = HistoryRecord {
            unique_id: asset.unique_id.clone(),
            asset_id: record.asset_id,
            prev_asset_id: prior.map(|p| p.asset_id),
            event_type,
            owner: asset.owner.clone(),
            prev_owner: prior.map(|p| p.owner.clone()),
            stickers: record.stickers.clone(),
            created_at: Utc::now(),
        };
        let appended = self
            .store
            .insert_history(&history)
            .await
            .map_err(|err| InspectError::Persistence(err.to_string()))?;
        if appended {
            info!(
                asset_id = record.asset_id,
                unique_id = %asset.unique_id,
                event = %event_type,
                "History recorded"
            );
        }
        Ok(())
    }
}
