//! Process-wide table of search instances.

use super::error::RegistryError;
use super::instance::{SearchInstance, SearchSummary};
use super::throttle::ThrottleConfig;
use crate::kernel::KernelFactory;
use crate::search::accumulator::DEFAULT_MESSAGE_LOG_CAPACITY;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Identifier of a search. Unique for the life of the process, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchId(pub(crate) u64);

impl SearchId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for SearchId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Creates, finds and retires [`SearchInstance`]s.
///
/// Instances are handed out as `Arc`s; removing one from the table does not
/// invalidate handles that are still held elsewhere.
pub struct SearchRegistry {
    factory: Arc<dyn KernelFactory>,
    throttle: ThrottleConfig,
    message_log_capacity: usize,
    next_id: AtomicU64,
    searches: RwLock<HashMap<SearchId, Arc<SearchInstance>>>,
}

impl SearchRegistry {
    pub fn new(factory: Arc<dyn KernelFactory>) -> Self {
        Self::with_throttle(factory, ThrottleConfig::default())
    }

    pub fn with_throttle(factory: Arc<dyn KernelFactory>, throttle: ThrottleConfig) -> Self {
        Self {
            factory,
            throttle,
            message_log_capacity: DEFAULT_MESSAGE_LOG_CAPACITY,
            next_id: AtomicU64::new(1),
            searches: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_message_log_capacity(mut self, capacity: usize) -> Self {
        self.message_log_capacity = capacity.max(1);
        self
    }

    pub fn factory(&self) -> &Arc<dyn KernelFactory> {
        &self.factory
    }

    /// Allocate a fresh, idle instance.
    pub fn create_search(&self) -> Arc<SearchInstance> {
        let id = SearchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let instance = Arc::new(SearchInstance::new(
            id,
            self.factory.clone(),
            self.throttle.clone(),
            self.message_log_capacity,
        ));
        self.searches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, instance.clone());
        info!(search_id = %id, "Search created");
        instance
    }

    pub fn get_search(&self, id: SearchId) -> Option<Arc<SearchInstance>> {
        self.searches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Summaries of every instance, ordered by id.
    pub fn list(&self) -> Vec<SearchSummary> {
        let mut instances: Vec<_> = self
            .searches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        instances.sort_by_key(|instance| instance.id());
        instances.iter().map(|instance| instance.summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.searches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop an instance from the table. Running instances must be stopped first.
    ///
    /// Returns `Ok(None)` when the id is unknown.
    pub fn remove(&self, id: SearchId) -> Result<Option<Arc<SearchInstance>>, RegistryError> {
        let mut searches = self.searches.write().unwrap_or_else(PoisonError::into_inner);
        match searches.get(&id) {
            Some(instance) if !instance.retire() => Err(RegistryError::StillRunning(id.value())),
            Some(_) => {
                debug!(search_id = %id, "Search removed");
                Ok(searches.remove(&id))
            }
            None => Ok(None),
        }
    }

    /// Request a stop on every running instance. Used at shutdown.
    pub fn stop_all(&self) -> usize {
        let running: Vec<_> = self
            .searches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|instance| instance.state().is_running())
            .cloned()
            .collect();
        for instance in &running {
            instance.stop();
        }
        if !running.is_empty() {
            info!(count = running.len(), "Stop requested for all running searches");
        }
        running.len()
    }

    pub fn running_count(&self) -> usize {
        self.searches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|instance| instance.state().is_running())
            .count()
    }
}
