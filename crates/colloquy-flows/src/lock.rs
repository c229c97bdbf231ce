//! Editing locks on flows.
//!
//! A lock is a [`FlowMutex`] stored in the bot's key/value store under
//! `FLOWMUTEX: <flow>`. The owner refreshes it on every save; anyone else
//! can take it over once it is older than the TTL.

use chrono::{DateTime, Utc};
use colloquy_core::{BotId, FlowMutex, KeyValueStore};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{FlowStoreError, FlowStoreResult};

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Clock stopped at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Key of the lock held on `flow`
pub fn mutex_key(flow: &str) -> String {
    format!("FLOWMUTEX: {}", flow)
}

/// Acquires and inspects flow locks
#[derive(Clone)]
pub struct FlowLock {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl FlowLock {
    /// Create a lock manager
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, ttl: chrono::Duration) -> Self {
        Self { kv, clock, ttl }
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Acquire or refresh the lock on `flow` for `editor`.
    ///
    /// Succeeds when `editor` already owns the lock, when nobody does, or
    /// when the current lock has expired.
    pub async fn try_lock(
        &self,
        bot_id: &BotId,
        editor: &str,
        flow: &str,
    ) -> FlowStoreResult<FlowMutex> {
        let key = mutex_key(flow);
        let now = self.clock.now();

        if let Some(current) = self.stored(bot_id, &key).await? {
            let owned = current.last_modified_by == editor;
            let expired = current.is_expired(now, self.ttl);
            if !owned && !expired {
                return Err(FlowStoreError::Locked {
                    flow: flow.to_string(),
                    owner: current.last_modified_by,
                });
            }
        }

        let mutex = FlowMutex {
            last_modified_by: editor.to_string(),
            last_modified_at: now,
            remaining_seconds: 0,
        };
        self.kv
            .set(bot_id, &key, serde_json::to_value(&mutex)?)
            .await?;
        debug!(bot_id = %bot_id, flow = %flow, editor = %editor, "Flow lock acquired");

        Ok(FlowMutex {
            remaining_seconds: mutex.compute_remaining(now, self.ttl),
            ..mutex
        })
    }

    /// The lock currently stored for `flow`, with its remaining seconds
    pub async fn current(&self, bot_id: &BotId, flow: &str) -> FlowStoreResult<Option<FlowMutex>> {
        let now = self.clock.now();
        Ok(self
            .stored(bot_id, &mutex_key(flow))
            .await?
            .map(|mutex| FlowMutex {
                remaining_seconds: mutex.compute_remaining(now, self.ttl),
                ..mutex
            }))
    }

    async fn stored(&self, bot_id: &BotId, key: &str) -> FlowStoreResult<Option<FlowMutex>> {
        match self.kv.get(bot_id, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}
