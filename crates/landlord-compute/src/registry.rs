use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ComputeError;
use crate::provider::ComputeProvider;

/// Dispatches compute calls to the provider named in the tenant payload.
///
/// Providers are enabled by configuration presence. The registry is built at
/// startup and immutable thereafter.
pub struct ComputeRegistry {
    providers: HashMap<String, Arc<dyn ComputeProvider>>,
    default_id: Option<String>,
}

impl ComputeRegistry {
    pub fn new() -> Self {
        ComputeRegistry {
            providers: HashMap::new(),
            default_id: None,
        }
    }

    /// Register a provider. The first registered provider becomes the
    /// default.
    pub fn register(&mut self, provider: Arc<dyn ComputeProvider>) -> &mut Self {
        let id = provider.id().to_string();
        if self.default_id.is_none() {
            self.default_id = Some(id.clone());
        }
        self.providers.insert(id, provider);
        self
    }

    pub fn default_id(&self) -> Option<&str> {
        self.default_id.as_deref()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Resolve a provider id; None selects the default.
    pub fn resolve(&self, id: Option<&str>) -> Result<Arc<dyn ComputeProvider>, ComputeError> {
        let id = match id {
            Some(id) => id,
            None => self
                .default_id
                .as_deref()
                .ok_or_else(|| ComputeError::ProviderUnknown("<default>".into()))?,
        };
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| ComputeError::ProviderUnknown(id.to_string()))
    }
}

impl Default for ComputeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
