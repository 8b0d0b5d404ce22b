//! The process-wide directory of capability factories (§4.4), and the
//! atomic `create_set` operation that turns a list of names plus a config
//! snapshot into a fully assembled [`CapabilitySet`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::capability::{Capability, MethodDescriptor};
use crate::config::Config;
use crate::context::CallContext;
use crate::error::{HostApiError, Result};
use crate::set::CapabilitySet;

/// Constructs per-instance capabilities from a config record, and publishes
/// the method metadata tooling and validation need. Process-lived: a single
/// factory instance is registered once and then used to build many
/// per-guest capability instances.
#[async_trait]
pub trait CapabilityFactory: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn methods(&self) -> &[MethodDescriptor];

    async fn create(&self, ctx: &CallContext, config: &Config) -> Result<Box<dyn Capability>>;
}

/// The registry of capability factories, keyed by capability name. Keys are
/// unique; insertion order is not observable. Reads (`get`/`list`) and the
/// registration write are safe under concurrent use via a reader/writer
/// lock, matching the concurrency model in §5.
pub struct Registry {
    factories: RwLock<HashMap<String, Arc<dyn CapabilityFactory>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Atomically insert a factory. Fails if `factory.name()` is already
    /// registered — capability names are unique for the lifetime of the
    /// registry (§3).
    pub async fn register(&self, factory: Arc<dyn CapabilityFactory>) -> Result<()> {
        let mut factories = self.factories.write().await;
        let name = factory.name().to_string();
        if factories.contains_key(&name) {
            return Err(HostApiError::internal(format!(
                "capability factory already registered: {name}"
            )));
        }
        factories.insert(name, factory);
        tracing::info!(capability = %factory.name(), version = %factory.version(), "registered capability factory");
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn CapabilityFactory>> {
        self.factories.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<dyn CapabilityFactory>> {
        self.factories.read().await.values().cloned().collect()
    }

    /// Build a capability set from the named factories, in list order.
    ///
    /// Atomicity (§4.4): if any `create` fails, every capability already
    /// created during this call is closed before the error is returned, so a
    /// partially-built set never leaks resources and never becomes visible.
    pub async fn create_set(
        &self,
        ctx: &CallContext,
        names: &[impl AsRef<str>],
        config: Config,
    ) -> Result<CapabilitySet> {
        let mut built: Vec<(String, Box<dyn Capability>)> = Vec::with_capacity(names.len());

        for name in names {
            let name = name.as_ref();
            let factory = match self.get(name).await {
                Some(factory) => factory,
                None => {
                    close_partial(built).await;
                    return Err(HostApiError::api_not_found(name));
                }
            };
            match factory.create(ctx, &config).await {
                Ok(capability) => built.push((name.to_string(), capability)),
                Err(err) => {
                    close_partial(built).await;
                    return Err(err);
                }
            }
        }

        Ok(CapabilitySet::new(built, config))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

async fn close_partial(built: Vec<(String, Box<dyn Capability>)>) {
    for (name, mut capability) in built {
        if let Err(err) = capability.close().await {
            tracing::warn!(capability = %name, error = %err, "failed to close partially-built capability during rollback");
        }
    }
}
