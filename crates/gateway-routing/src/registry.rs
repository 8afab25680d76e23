//! Model registry.
//!
//! Read-only after construction; share it behind an `Arc` without locking.

use gateway_core::{GatewayError, GatewayResult, ModelDescriptor, ModelId, ProviderId};
use std::collections::{BTreeSet, HashMap};

/// In-memory table of model descriptors
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelDescriptor>,
    index: HashMap<ModelId, usize>,
}

impl ModelRegistry {
    /// Build a registry, rejecting duplicate ids and invalid descriptors
    ///
    /// # Errors
    /// Returns a configuration error for duplicates or invalid descriptors
    pub fn new(models: Vec<ModelDescriptor>) -> GatewayResult<Self> {
        let mut index = HashMap::with_capacity(models.len());
        for (position, model) in models.iter().enumerate() {
            model.validate()?;
            if index.insert(model.id.clone(), position).is_some() {
                return Err(GatewayError::configuration(format!(
                    "duplicate model id '{}'",
                    model.id
                )));
            }
        }
        Ok(Self { models, index })
    }

    /// Look up a model
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.index.get(id).map(|&i| &self.models[i])
    }

    /// All models in registration order
    #[must_use]
    pub fn all(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Enabled models
    pub fn enabled(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter().filter(|m| m.enabled)
    }

    /// Models of one provider
    pub fn by_provider<'a>(
        &'a self,
        provider: &'a str,
    ) -> impl Iterator<Item = &'a ModelDescriptor> + 'a {
        self.models
            .iter()
            .filter(move |m| m.provider.as_str() == provider)
    }

    /// Models offering a capability tag
    pub fn by_capability<'a>(
        &'a self,
        tag: &'a str,
    ) -> impl Iterator<Item = &'a ModelDescriptor> + 'a {
        self.models
            .iter()
            .filter(move |m| m.capabilities.contains(tag))
    }

    /// Distinct provider ids, sorted
    #[must_use]
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.models
            .iter()
            .map(|m| m.provider.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of models
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
