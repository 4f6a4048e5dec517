//! Work queue with leases over Redis lists.
//!
//! Layout for a queue named `job`:
//! - `job`: main list, producers `LPUSH`, workers pop from the right
//! - `job:processing`: items currently leased by some worker
//! - `job:leased_by_session:<sha224>`: lease marker, expires with the lease
//!
//! Leasing pops the item and sets its marker in two commands. A processing
//! entry without a marker is therefore only reclaimed once it has been seen
//! unmarked on two consecutive reclaim passes of the same worker.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use anon_models::WorkItem;

use crate::error::{QueueError, QueueResult};
use crate::queue::{item_key, LeaseQueue, QueueConfig};

/// Moves an item back to the main list if its lease marker is gone.
///
/// KEYS: processing list, lease key, main list. ARGV: item, `1` to reclaim.
/// Returns -1 for an unmarked item when ARGV[2] is not `1`.
const RECLAIM_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[2]) == 1 then
    return 0
end
if ARGV[2] ~= '1' then
    return -1
end
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed > 0 then
    redis.call('LPUSH', KEYS[3], ARGV[1])
end
return removed
"#;

/// Processing entries seen without a lease marker, keyed by `item_key`.
#[derive(Debug, Default)]
struct UnleasedSightings {
    previous: HashSet<String>,
    current: HashSet<String>,
}

impl UnleasedSightings {
    fn begin_pass(&mut self) {
        self.previous = std::mem::take(&mut self.current);
    }

    fn seen_last_pass(&self, key: &str) -> bool {
        self.previous.contains(key)
    }

    fn note(&mut self, key: String) {
        self.current.insert(key);
    }
}

/// Redis-backed lease queue client.
pub struct RedisWorkQueue {
    client: redis::Client,
    config: QueueConfig,
    session: String,
    sightings: Mutex<UnleasedSightings>,
}

impl RedisWorkQueue {
    /// Create a new queue client. Does not connect yet.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url().as_str())?;
        Ok(Self {
            client,
            config,
            session: Uuid::new_v4().to_string(),
            sightings: Mutex::new(UnleasedSightings::default()),
        })
    }

    /// Session id written into this worker's lease markers.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Verify the server is reachable.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!(
            queue = %self.config.name,
            "Connected to redis at {}:{}", self.config.host, self.config.port
        );
        Ok(())
    }

    /// Add an item to the main list.
    pub async fn push(&self, item: &WorkItem) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.lpush(&self.config.name, item.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl LeaseQueue for RedisWorkQueue {
    async fn empty(&self) -> QueueResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let main: u64 = conn.llen(&self.config.name).await?;
        let processing: u64 = conn.llen(self.config.processing_key()).await?;
        Ok(main == 0 && processing == 0)
    }

    async fn lease(
        &self,
        lease: Duration,
        block: bool,
        poll_timeout: Duration,
    ) -> QueueResult<Option<WorkItem>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // A zero BRPOPLPUSH timeout would block forever.
        let popped: Option<Vec<u8>> = if block {
            redis::cmd("BRPOPLPUSH")
                .arg(&self.config.name)
                .arg(self.config.processing_key())
                .arg(poll_timeout.as_secs().max(1))
                .query_async(&mut conn)
                .await?
        } else {
            redis::cmd("RPOPLPUSH")
                .arg(&self.config.name)
                .arg(self.config.processing_key())
                .query_async(&mut conn)
                .await?
        };

        let Some(bytes) = popped else {
            return Ok(None);
        };
        let item = WorkItem::from_bytes(bytes);

        let _: () = redis::cmd("SETEX")
            .arg(self.config.lease_key(&item))
            .arg(lease.as_secs().max(1))
            .arg(&self.session)
            .query_async(&mut conn)
            .await?;

        debug!(queue = %self.config.name, item = %item, "Leased item for {:?}", lease);
        Ok(Some(item))
    }

    async fn complete(&self, item: &WorkItem) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let _: i64 = conn
            .lrem(self.config.processing_key(), 0, item.as_bytes())
            .await?;
        let _: i64 = conn.del(self.config.lease_key(item)).await?;

        debug!(queue = %self.config.name, item = %item, "Completed item");
        Ok(())
    }

    async fn check_expired_leases(&self) -> QueueResult<usize> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let processing: Vec<Vec<u8>> = conn
            .lrange(self.config.processing_key(), 0, -1)
            .await?;

        let script = redis::Script::new(RECLAIM_SCRIPT);
        let mut sightings = self.sightings.lock().await;
        sightings.begin_pass();
        let mut reclaimed = 0;

        for bytes in processing {
            let item = WorkItem::from_bytes(bytes);
            let key = item_key(&item);
            let confirmed = sightings.seen_last_pass(&key);
            let removed: i64 = script
                .key(self.config.processing_key())
                .key(self.config.lease_key(&item))
                .key(&self.config.name)
                .arg(item.as_bytes())
                .arg(if confirmed { "1" } else { "0" })
                .invoke_async(&mut conn)
                .await?;

            match removed {
                -1 => {
                    debug!(queue = %self.config.name, item = %item, "Unleased item, reclaiming on next pass");
                    sightings.note(key);
                }
                n if n > 0 => {
                    info!(queue = %self.config.name, item = %item, "Reclaimed expired lease");
                    reclaimed += 1;
                }
                _ => {}
            }
        }

        Ok(reclaimed)
    }

    async fn insert_error_queue(&self, queue_name: &str, item: &WorkItem) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.lpush(queue_name, item.as_bytes()).await?;
        info!(queue = %queue_name, item = %item, "Item routed to error queue");
        Ok(())
    }

    fn error_queue_name(&self) -> String {
        self.config.error_queue_name()
    }
}
