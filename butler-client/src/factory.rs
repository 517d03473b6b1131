//! Client factory
//!
//! Keeps one client per instance id so repeated calls reuse the same
//! connection pool.

use std::sync::Arc;
use std::time::Duration;

use butler_core::domain::instance::Instance;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::{DEFAULT_PROBE_TIMEOUT, MasterApi, MasterClient};

/// Source of clients for registered instances
pub trait ClientProvider: Send + Sync {
    /// Client for `instance`, created on first use and cached by id
    fn client(&self, instance: &Instance) -> Result<Arc<dyn MasterApi>>;

    /// Uncached client for a master that is not registered yet
    fn connect(
        &self,
        base_url: &str,
        username: &str,
        api_token: &str,
    ) -> Result<Arc<dyn MasterApi>>;

    /// Drop the cached client of one instance
    ///
    /// Must be called when an instance's URL or credentials change.
    fn remove(&self, instance_id: Uuid);

    /// Drop every cached client
    fn clear(&self);
}

/// Concurrent cache of [`MasterClient`]s keyed by instance id
#[derive(Debug)]
pub struct ClientFactory {
    clients: DashMap<Uuid, Arc<MasterClient>>,
    probe_timeout: Duration,
}

impl ClientFactory {
    pub fn new() -> Self {
        Self::with_probe_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    /// Factory whose clients bound triggers and probes by `probe_timeout`
    pub fn with_probe_timeout(probe_timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            probe_timeout,
        }
    }

    /// Number of cached clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, instance_id: Uuid) -> bool {
        self.clients.contains_key(&instance_id)
    }
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientProvider for ClientFactory {
    fn client(&self, instance: &Instance) -> Result<Arc<dyn MasterApi>> {
        if let Some(existing) = self.clients.get(&instance.id) {
            return Ok(existing.value().clone() as Arc<dyn MasterApi>);
        }

        let client = Arc::new(
            MasterClient::from_instance(instance)?.with_probe_timeout(self.probe_timeout),
        );
        debug!(
            "Created client for instance {} at {}",
            instance.name,
            client.base_url()
        );

        let client = self.clients.entry(instance.id).or_insert(client).value().clone();
        Ok(client as Arc<dyn MasterApi>)
    }

    fn connect(
        &self,
        base_url: &str,
        username: &str,
        api_token: &str,
    ) -> Result<Arc<dyn MasterApi>> {
        let client = MasterClient::new(base_url, username, api_token)?
            .with_probe_timeout(self.probe_timeout);
        Ok(Arc::new(client))
    }

    fn remove(&self, instance_id: Uuid) {
        if self.clients.remove(&instance_id).is_some() {
            debug!("Dropped cached client for instance {}", instance_id);
        }
    }

    fn clear(&self) {
        self.clients.clear();
    }
}
