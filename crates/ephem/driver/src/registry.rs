//! Provider to driver mapping

use crate::traits::ProvisioningDriver;
use ephem_types::Provider;
use std::collections::HashMap;
use std::sync::Arc;

/// Drivers keyed by the provider they provision against.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<Provider, Arc<dyn ProvisioningDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration.
    pub fn with(mut self, provider: Provider, driver: Arc<dyn ProvisioningDriver>) -> Self {
        self.register(provider, driver);
        self
    }

    /// Register a driver, replacing any previous one for the provider.
    pub fn register(&mut self, provider: Provider, driver: Arc<dyn ProvisioningDriver>) {
        self.drivers.insert(provider, driver);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProvisioningDriver>> {
        self.drivers.get(&provider).cloned()
    }

    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<_> = self.drivers.keys().copied().collect();
        providers.sort();
        providers
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
