//! Wiring and the simulated buyer burst.

use crate::config::{Backend, Config};
use chrono::{DateTime, Duration, Utc};
use flashsale_core::error::StoreResult;
use flashsale_core::status::AdmissionStatus;
use flashsale_core::store::InventoryStore;
use flashsale_core::types::{BuyerId, Item, ItemId};
use flashsale_postgres::PostgresInventoryStore;
use flashsale_redis::{RedisItemCache, RedisQueueStore};
use flashsale_runtime::{Backends, FlashSale, TokenIssuer};
use flashsale_testing::{InMemoryInventoryStore, InMemoryItemCache, InMemoryQueueStore};
use futures::future::join_all;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// First buyer id; buyers are numbered upwards from here.
const FIRST_BUYER: i64 = 13_800_000_000;

/// A service plus a handle on its durable store for reporting.
pub struct Wiring {
    /// The admission service
    pub sale: Arc<FlashSale>,
    /// Durable store behind it
    pub inventory: Arc<dyn InventoryStore>,
}

/// One buyer's view of the sale.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// Item the buyer went for
    pub item_id: ItemId,
    /// The buyer
    pub buyer_id: BuyerId,
    /// Status of every submission, in order
    pub statuses: Vec<AdmissionStatus>,
}

/// Items for this run.
///
/// Ids are derived from `now` so a live run never collides with the queues of
/// an earlier one.
#[must_use]
pub fn seed_items(config: &Config, now: DateTime<Utc>) -> Vec<Item> {
    let base = now.timestamp() * 100;
    (0..config.demo.items)
        .map(|n| Item {
            id: ItemId::new(base + i64::from(n)),
            name: format!("flash sale item #{}", n + 1),
            remaining_stock: config.demo.stock,
            start_time: now - Duration::minutes(1),
            end_time: now + Duration::minutes(config.demo.sale_minutes),
            created_at: now - Duration::seconds(i64::from(n)),
        })
        .collect()
}

/// Build the service over the configured backend and seed `items` into it.
///
/// # Errors
///
/// Returns a store error if a live backend cannot be reached or seeded.
pub async fn wire(config: &Config, items: &[Item]) -> StoreResult<Wiring> {
    let backends = match config.demo.backend {
        Backend::InMemory => {
            info!("Using in-memory stores");
            let inventory = items
                .iter()
                .cloned()
                .fold(InMemoryInventoryStore::new(), InMemoryInventoryStore::with_item);
            Backends::new(
                Arc::new(inventory),
                Arc::new(InMemoryQueueStore::new()),
                Arc::new(InMemoryItemCache::new()),
            )
        }
        Backend::Live => {
            info!(
                postgres_url = %config.postgres.url,
                redis_url = %config.redis.url,
                "Using live stores"
            );
            let inventory = PostgresInventoryStore::connect(
                &config.postgres.url,
                config.postgres.max_connections,
                std::time::Duration::from_secs(config.postgres.connect_timeout),
            )
            .await?;
            inventory.migrate().await?;
            for item in items {
                inventory.upsert_item(item).await?;
            }
            let manager = flashsale_redis::connect(&config.redis.url).await?;
            Backends::new(
                Arc::new(inventory),
                Arc::new(RedisQueueStore::new(manager.clone())),
                Arc::new(RedisItemCache::new(manager)),
            )
        }
    };

    let inventory = Arc::clone(&backends.inventory);
    let sale = FlashSale::new(
        backends,
        TokenIssuer::new(config.sale.token_secret.clone()),
        config.pipeline_settings(),
    );
    Ok(Wiring {
        sale: Arc::new(sale),
        inventory,
    })
}

/// Every buyer asks for a token and submits, all at once.
///
/// Some buyers submit a second time right after their first answer.
pub async fn burst(sale: &Arc<FlashSale>, items: &[Item], config: &Config) -> Vec<Attempt> {
    if items.is_empty() {
        return Vec::new();
    }
    let plans: Vec<_> = {
        let mut rng = rand::thread_rng();
        let repeat_probability = f64::from(config.demo.repeat_percent.min(100)) / 100.0;
        (0..i64::from(config.demo.buyers))
            .map(|n| {
                let item_id = items[rng.gen_range(0..items.len())].id;
                (item_id, BuyerId::new(FIRST_BUYER + n), rng.gen_bool(repeat_probability))
            })
            .collect()
    };

    let handles = plans.into_iter().map(|(item_id, buyer_id, repeat)| {
        let sale = Arc::clone(sale);
        tokio::spawn(async move {
            let exposure = match sale.expose(item_id).await {
                Ok(exposure) => exposure,
                Err(err) => {
                    warn!(item_id = %item_id, error = %err, "Exposure failed");
                    return Attempt { item_id, buyer_id, statuses: Vec::new() };
                }
            };
            let token = exposure.token();
            let mut statuses = vec![sale.execute(item_id, buyer_id, token).await.status];
            if repeat {
                statuses.push(sale.execute(item_id, buyer_id, token).await.status);
            }
            Attempt { item_id, buyer_id, statuses }
        })
    });

    join_all(handles)
        .await
        .into_iter()
        .filter_map(|joined| match joined {
            Ok(attempt) => Some(attempt),
            Err(err) => {
                warn!(error = %err, "Buyer task failed");
                None
            }
        })
        .collect()
}

/// Count statuses by name.
#[must_use]
pub fn tally<'a>(
    statuses: impl IntoIterator<Item = &'a AdmissionStatus>,
) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for status in statuses {
        *counts.entry(status.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Print what each item sold, according to the durable store and the polls.
pub async fn report(wiring: &Wiring, items: &[Item], attempts: &[Attempt]) {
    println!("\n=== Flash sale summary ===");
    println!(
        "Submissions: {:?}",
        tally(attempts.iter().flat_map(|attempt| attempt.statuses.iter()))
    );

    for item in items {
        let mut polled = Vec::new();
        for attempt in attempts.iter().filter(|attempt| attempt.item_id == item.id) {
            match wiring.sale.poll(item.id, attempt.buyer_id).await {
                Ok(Some(status)) => polled.push(status),
                Ok(None) => {}
                Err(err) => warn!(item_id = %item.id, error = %err, "Poll failed"),
            }
        }

        let remaining = match wiring.inventory.find_item(item.id).await {
            Ok(Some(stored)) => stored.remaining_stock.to_string(),
            Ok(None) => "missing".to_string(),
            Err(err) => format!("unknown ({err})"),
        };
        println!(
            "{} [{}]: stock {} -> {}, outcomes {:?}",
            item.name,
            item.id,
            item.remaining_stock,
            remaining,
            tally(&polled)
        );
    }
}
