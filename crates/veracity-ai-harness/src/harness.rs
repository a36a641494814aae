use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::HarnessError;
use crate::model::{ModelRef, ProviderId};
use crate::provider::ProviderAdapter;
use crate::run::RunBuilder;

/// Immutable set of registered provider adapters, shared by every session
/// and run spawned from one `Harness`.
pub(crate) struct ProviderRegistry {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub(crate) fn get(&self, id: &ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(id).cloned()
    }
}

/// Entry point for creating sessions and running models.
#[derive(Clone)]
pub struct Harness {
    registry: Arc<ProviderRegistry>,
}

impl Harness {
    /// Starts a builder for registering providers.
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Opens a labeled session.
    ///
    /// Sessions are lightweight, in-memory groupings of related runs; the
    /// label shows up in logs. The backend opens one per assessment request
    /// so no mutable state is shared across requests.
    pub fn session(&self, label: impl Into<String>) -> Session {
        Session {
            registry: self.registry.clone(),
            id: uuid::Uuid::new_v4(),
            label: label.into(),
        }
    }
}

/// Builder used to register provider adapters before creating a `Harness`.
#[derive(Default)]
pub struct HarnessBuilder {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
}

impl HarnessBuilder {
    /// Registers a provider adapter. One adapter per provider id.
    pub fn register_provider(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn build(self) -> Result<Harness, HarnessError> {
        let mut adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>> = HashMap::new();
        for adapter in self.adapters {
            let id = adapter.id();
            if adapters.insert(id.clone(), adapter).is_some() {
                return Err(HarnessError::Config(format!(
                    "duplicate provider registration: {id}"
                )));
            }
        }
        Ok(Harness {
            registry: Arc::new(ProviderRegistry { adapters }),
        })
    }
}

/// Logical grouping of runs against one harness.
#[derive(Clone)]
pub struct Session {
    registry: Arc<ProviderRegistry>,
    id: uuid::Uuid,
    label: String,
}

impl Session {
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Starts building a run for the given model.
    pub fn run(&self, model: ModelRef) -> RunBuilder {
        RunBuilder::new(self.registry.clone(), self.id, self.label.clone(), model)
    }
}
