//! Short-lived store for checkouts awaiting payment verification.
//!
//! A staged order is written once when the gateway order is created and
//! consumed at most once by `take`. Entries that are never claimed expire
//! after the configured TTL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::StagingConfig,
    entities::customer_address,
    errors::ServiceError,
    services::pricing::{CouponTerms, PriceBreakdown},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedLineItem {
    pub product_id: Uuid,
    pub sku: String,
    pub title: String,
    pub size: Option<String>,
    pub color: Option<String>,
    pub unit_price: i64,
    pub quantity: i32,
    pub subtotal: i64,
    /// Stock level observed by the advisory check
    pub stock_at_staging: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ShippingSnapshot {
    pub full_name: String,
    pub phone: Option<String>,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

impl From<customer_address::Model> for ShippingSnapshot {
    fn from(address: customer_address::Model) -> Self {
        Self {
            full_name: address.full_name,
            phone: address.phone,
            line1: address.line1,
            line2: address.line2,
            city: address.city,
            state: address.state,
            postal_code: address.postal_code,
            country: address.country,
        }
    }
}

/// Everything locked in at order creation that settlement needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedOrder {
    pub gateway_order_id: String,
    pub customer_id: Uuid,
    pub items: Vec<StagedLineItem>,
    pub pricing: PriceBreakdown,
    pub currency: String,
    pub shipping_address: ShippingSnapshot,
    pub coupon: Option<CouponTerms>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Stores a snapshot under its gateway order id, replacing any previous one.
    async fn put(&self, staged: StagedOrder) -> Result<(), ServiceError>;

    /// Reads a live snapshot without consuming it.
    async fn peek(&self, gateway_order_id: &str) -> Result<Option<StagedOrder>, ServiceError>;

    /// Atomically reads and deletes a live snapshot. Of any number of
    /// concurrent callers at most one receives `Some`.
    async fn take(&self, gateway_order_id: &str) -> Result<Option<StagedOrder>, ServiceError>;

    /// Drops expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, ServiceError> {
        Ok(0)
    }
}

#[derive(Debug, Clone)]
struct StagedEntry {
    staged: StagedOrder,
    expires_at: Instant,
}

impl StagedEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Single-instance backend. Entries live in process memory and vanish on restart.
#[derive(Debug)]
pub struct InMemoryStagingStore {
    entries: DashMap<String, StagedEntry>,
    ttl: Duration,
}

impl InMemoryStagingStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Periodically evicts expired entries until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let evicted = store.evict_expired(Instant::now());
                if evicted > 0 {
                    info!(evicted, "evicted abandoned staged orders");
                    metrics::counter!("checkout.staged_orders_expired", evicted as u64);
                }
            }
            debug!("staging sweeper stopped");
        })
    }

    fn evict_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl StagingStore for InMemoryStagingStore {
    async fn put(&self, staged: StagedOrder) -> Result<(), ServiceError> {
        let entry = StagedEntry {
            expires_at: Instant::now() + self.ttl,
            staged,
        };
        self.entries
            .insert(entry.staged.gateway_order_id.clone(), entry);
        Ok(())
    }

    async fn peek(&self, gateway_order_id: &str) -> Result<Option<StagedOrder>, ServiceError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(gateway_order_id)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.staged.clone()))
    }

    async fn take(&self, gateway_order_id: &str) -> Result<Option<StagedOrder>, ServiceError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(gateway_order_id)
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.staged))
    }

    async fn purge_expired(&self) -> Result<usize, ServiceError> {
        Ok(self.evict_expired(Instant::now()))
    }
}

/// Shared backend for multi-instance deployments; expiry is delegated to Redis.
#[derive(Clone)]
pub struct RedisStagingStore {
    conn: redis::aio::ConnectionManager,
    namespace: String,
    ttl: Duration,
}

impl RedisStagingStore {
    pub async fn connect(redis_url: &str, config: &StagingConfig) -> Result<Self, ServiceError> {
        let client = redis::Client::open(redis_url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        info!(namespace = %config.namespace, "redis staging store connected");
        Ok(Self {
            conn,
            namespace: config.namespace.clone(),
            ttl: config.ttl(),
        })
    }

    fn key(&self, gateway_order_id: &str) -> String {
        staging_key(&self.namespace, gateway_order_id)
    }

    fn decode(raw: Option<String>) -> Result<Option<StagedOrder>, ServiceError> {
        raw.map(|json| serde_json::from_str(&json).map_err(ServiceError::from))
            .transpose()
    }
}

fn staging_key(namespace: &str, gateway_order_id: &str) -> String {
    format!("{namespace}:{gateway_order_id}")
}

#[async_trait]
impl StagingStore for RedisStagingStore {
    async fn put(&self, staged: StagedOrder) -> Result<(), ServiceError> {
        let payload = serde_json::to_string(&staged)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.key(&staged.gateway_order_id))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn peek(&self, gateway_order_id: &str) -> Result<Option<StagedOrder>, ServiceError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(gateway_order_id))
            .query_async(&mut conn)
            .await?;
        Self::decode(raw)
    }

    async fn take(&self, gateway_order_id: &str) -> Result<Option<StagedOrder>, ServiceError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GETDEL")
            .arg(self.key(gateway_order_id))
            .query_async(&mut conn)
            .await?;
        Self::decode(raw)
    }
}

/// Builds the configured staging backend, starting the sweeper for the in-memory one.
pub async fn build_staging_store(
    config: &StagingConfig,
    redis_url: &str,
) -> Result<Arc<dyn StagingStore>, ServiceError> {
    if config.uses_redis() {
        let store = RedisStagingStore::connect(redis_url, config).await?;
        return Ok(Arc::new(store));
    }

    if config.ttl_secs < 60 {
        warn!(ttl_secs = config.ttl_secs, "very short staging TTL configured");
    }
    let store = Arc::new(InMemoryStagingStore::new(config.ttl()));
    store.spawn_sweeper(config.sweep_interval());
    Ok(store)
}
