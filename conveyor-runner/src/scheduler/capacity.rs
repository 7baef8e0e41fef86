//! Capacity per resource class
//!
//! Each resource class gets one semaphore sized from the configuration. A
//! permit is held by a job run from admission until its terminal status has
//! been recorded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::EngineConfig;

pub struct CapacityPool {
    limits: HashMap<String, usize>,
    default_limit: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl CapacityPool {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            limits: config.capacity.clone(),
            default_limit: config.default_capacity,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    /// Number of job runs of `resource_class` allowed at once
    pub fn limit(&self, resource_class: &str) -> usize {
        self.limits
            .get(resource_class)
            .copied()
            .unwrap_or(self.default_limit)
            .max(1)
    }

    /// Semaphore guarding `resource_class`, created on first use
    pub fn semaphore(&self, resource_class: &str) -> Arc<Semaphore> {
        let mut semaphores = match self.semaphores.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let semaphore = semaphores
            .entry(resource_class.to_string())
            .or_insert_with(|| {
                let limit = self.limit(resource_class);
                debug!("Resource class '{}' has capacity {}", resource_class, limit);
                Arc::new(Semaphore::new(limit))
            });

        Arc::clone(semaphore)
    }

    /// Permits of `resource_class` currently held
    pub fn in_use(&self, resource_class: &str) -> usize {
        self.limit(resource_class)
            .saturating_sub(self.semaphore(resource_class).available_permits())
    }
}
