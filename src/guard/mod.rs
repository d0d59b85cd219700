//! Destination uniqueness
//!
//! At most one stream may broadcast to a destination key at a time. The
//! check is read-then-reserve under one lock: a caller holding a
//! [`DestinationLease`] owns the key until the lease is dropped, which
//! happens once the stream is persisted `live` (from then on the store
//! itself answers the question) or the start is abandoned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::repositories::StreamStore;

type Reservations = Arc<Mutex<HashMap<String, Uuid>>>;

pub struct DestinationGuard {
    store: Arc<dyn StreamStore>,
    check_lock: tokio::sync::Mutex<()>,
    reservations: Reservations,
}

impl DestinationGuard {
    pub fn new(store: Arc<dyn StreamStore>) -> Self {
        Self {
            store,
            check_lock: tokio::sync::Mutex::new(()),
            reservations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reserve `destination_key` for `stream_id`, or fail with a conflict
    /// naming the stream that currently holds it
    pub async fn reserve(
        &self,
        stream_id: Uuid,
        destination_key: &str,
    ) -> AppResult<DestinationLease> {
        let _check = self.check_lock.lock().await;

        let reserved_by = self
            .reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(destination_key)
            .copied();
        if let Some(holder) = reserved_by.filter(|holder| *holder != stream_id) {
            warn!(
                "stream_id={} status=destination_conflict key={} holder={} (starting)",
                stream_id, destination_key, holder
            );
            return Err(AppError::conflict(destination_key, holder));
        }

        let live = self.store.find_live_by_destination(destination_key).await?;
        if let Some(holder) = live.iter().find(|s| s.id != stream_id) {
            warn!(
                "stream_id={} status=destination_conflict key={} holder={}",
                stream_id, destination_key, holder.id
            );
            return Err(AppError::conflict(destination_key, holder.id));
        }

        self.reservations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(destination_key.to_string(), stream_id);
        debug!("stream_id={} reserved destination key={}", stream_id, destination_key);

        Ok(DestinationLease {
            destination_key: destination_key.to_string(),
            stream_id,
            reservations: self.reservations.clone(),
        })
    }
}

/// Holds a destination key reservation until dropped
pub struct DestinationLease {
    destination_key: String,
    stream_id: Uuid,
    reservations: Reservations,
}

impl DestinationLease {
    pub fn destination_key(&self) -> &str {
        &self.destination_key
    }
}

impl Drop for DestinationLease {
    fn drop(&mut self) {
        let mut reservations = self.reservations.lock().unwrap_or_else(PoisonError::into_inner);
        if reservations.get(&self.destination_key) == Some(&self.stream_id) {
            reservations.remove(&self.destination_key);
        }
    }
}
