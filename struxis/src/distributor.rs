//! Best-effort broadcast fan-out for `AnalyzerFacade::subscribe` (spec §5,
//! §6). Sharded by channel key to keep subscribe/broadcast lock
//! contention low across many (symbol, timeframe) instruments; a slow
//! subscriber sees `RecvError::Lagged` and is expected to resynchronize
//! via `snapshot()`, never blocking the publisher.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use crate::constant::Timeframe;
use crate::events::AnalysisDelta;

#[derive(Debug)]
pub struct Distributor {
    shards: Vec<RwLock<HashMap<String, Arc<broadcast::Sender<AnalysisDelta>>>>>,
    shard_count: usize,
    channel_capacity: usize,
}

impl Distributor {
    pub fn new(channel_capacity: usize) -> Self {
        let shard_count = default_shard_count();
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(RwLock::new(HashMap::new()));
        }
        Self {
            shards,
            shard_count,
            channel_capacity: channel_capacity.max(1),
        }
    }

    pub fn subscribe(&self, symbol: &str, timeframe: Timeframe) -> broadcast::Receiver<AnalysisDelta> {
        let key = channel_key(symbol, timeframe);
        let mut guard = self.shards[self.shard_index(&key)]
            .write()
            .expect("distributor shard lock poisoned");
        let sender = guard
            .entry(key)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.channel_capacity);
                Arc::new(tx)
            })
            .clone();
        sender.subscribe()
    }

    /// Publishes a delta; best-effort, never blocks on slow consumers.
    /// Returns the number of subscribers at the moment of the call.
    pub fn publish(&self, symbol: &str, timeframe: Timeframe, delta: AnalysisDelta) -> usize {
        let key = channel_key(symbol, timeframe);
        let guard = self.shards[self.shard_index(&key)]
            .read()
            .expect("distributor shard lock poisoned");
        if let Some(sender) = guard.get(&key) {
            let _ = sender.send(delta);
            sender.receiver_count()
        } else {
            0
        }
    }

    pub fn subscriber_count(&self, symbol: &str, timeframe: Timeframe) -> usize {
        let key = channel_key(symbol, timeframe);
        let guard = self.shards[self.shard_index(&key)]
            .read()
            .expect("distributor shard lock poisoned");
        guard.get(&key).map(|s| s.receiver_count()).unwrap_or(0)
    }

    fn shard_index(&self, key: &str) -> usize {
        hash_key(key) % self.shard_count
    }
}

fn channel_key(symbol: &str, timeframe: Timeframe) -> String {
    format!("{}:{}", symbol.to_ascii_uppercase(), timeframe.as_str())
}

fn hash_key(text: &str) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish() as usize
}

fn default_shard_count() -> usize {
    let cpu = std::thread::available_parallelism().map(|x| x.get()).unwrap_or(8);
    (cpu.saturating_mul(2)).clamp(8, 128)
}
