//! # Provider Registry
//!
//! Resolves a provider code to a live [`PaymentProvider`].
//!
//! Factories are registered explicitly at startup. Instances are built
//! lazily from the provider's settings table and cached per distinct
//! `(code, settings)` pair, so asking twice with the same configuration
//! returns the same `Arc`.

use crate::error::{ShopError, ShopResult};
use crate::provider::{BoxedPaymentProvider, PaymentMethod};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Settings table for one provider (`[providers.<code>]`)
pub type ProviderSettings = toml::Table;

/// Builds a provider instance from its settings
pub type ProviderFactory =
    Arc<dyn Fn(&ProviderSettings) -> ShopResult<BoxedPaymentProvider> + Send + Sync>;

/// Where `reload` re-reads provider settings from
pub trait ProviderConfigSource: Send + Sync {
    fn provider_settings(&self) -> ShopResult<BTreeMap<String, ProviderSettings>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    code: String,
    fingerprint: String,
}

/// Code → factory/instance registry, safe to share across requests
#[derive(Default)]
pub struct ProviderRegistry {
    factories: RwLock<BTreeMap<String, ProviderFactory>>,
    settings: RwLock<BTreeMap<String, ProviderSettings>>,
    instances: RwLock<HashMap<InstanceKey, BoxedPaymentProvider>>,
    source: Option<Arc<dyn ProviderConfigSource>>,
}

fn poisoned<T>(_: T) -> ShopError {
    ShopError::Internal("provider registry lock poisoned".to_string())
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose settings come from (and reload from) `source`
    pub fn with_source(source: Arc<dyn ProviderConfigSource>) -> ShopResult<Self> {
        let settings = source.provider_settings()?;
        Ok(Self {
            settings: RwLock::new(settings),
            source: Some(source),
            ..Self::default()
        })
    }

    /// Builder: fixed settings, no reload source
    pub fn with_settings(self, settings: BTreeMap<String, ProviderSettings>) -> Self {
        Self {
            settings: RwLock::new(settings),
            ..self
        }
    }

    /// Register (or replace) the factory for `code`
    pub fn register(&self, code: impl Into<String>, factory: ProviderFactory) -> ShopResult<()> {
        let code = code.into();
        self.drop_instances(&code)?;
        self.factories.write().map_err(poisoned)?.insert(code.clone(), factory);
        debug!(provider = %code, "Registered payment provider");
        Ok(())
    }

    /// Register a closure as the factory for `code`
    pub fn register_fn<F>(&self, code: impl Into<String>, factory: F) -> ShopResult<()>
    where
        F: Fn(&ProviderSettings) -> ShopResult<BoxedPaymentProvider> + Send + Sync + 'static,
    {
        self.register(code, Arc::new(factory))
    }

    /// Remove a provider and its cached instances. Returns whether it existed.
    pub fn unregister(&self, code: &str) -> ShopResult<bool> {
        self.drop_instances(code)?;
        let removed = self.factories.write().map_err(poisoned)?.remove(code).is_some();
        if removed {
            debug!(provider = %code, "Unregistered payment provider");
        }
        Ok(removed)
    }

    pub fn is_registered(&self, code: &str) -> bool {
        self.factories
            .read()
            .map(|f| f.contains_key(code))
            .unwrap_or(false)
    }

    /// Registered provider codes, sorted
    pub fn codes(&self) -> Vec<String> {
        self.factories
            .read()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Settings currently configured for `code` (empty table if none)
    pub fn settings_for(&self, code: &str) -> ShopResult<ProviderSettings> {
        Ok(self
            .settings
            .read()
            .map_err(poisoned)?
            .get(code)
            .cloned()
            .unwrap_or_default())
    }

    /// Provider for `code` with its configured settings
    pub fn get(&self, code: &str) -> ShopResult<BoxedPaymentProvider> {
        let settings = self.settings_for(code)?;
        self.get_with_config(code, &settings)
    }

    /// Provider for `code` built from explicit settings
    pub fn get_with_config(
        &self,
        code: &str,
        settings: &ProviderSettings,
    ) -> ShopResult<BoxedPaymentProvider> {
        let key = InstanceKey {
            code: code.to_string(),
            fingerprint: toml::to_string(settings)
                .map_err(|e| ShopError::Configuration(e.to_string()))?,
        };

        if let Some(provider) = self.instances.read().map_err(poisoned)?.get(&key) {
            return Ok(provider.clone());
        }

        let factory = self
            .factories
            .read()
            .map_err(poisoned)?
            .get(code)
            .cloned()
            .ok_or_else(|| ShopError::ProviderUnavailable {
                code: code.to_string(),
            })?;

        let provider = factory(settings).map_err(|e| {
            warn!(provider = %code, error = %e, "Payment provider could not be constructed");
            ShopError::ProviderUnavailable {
                code: code.to_string(),
            }
        })?;

        // a racing builder may have won; keep whichever instance landed first
        let mut instances = self.instances.write().map_err(poisoned)?;
        Ok(instances.entry(key).or_insert(provider).clone())
    }

    /// Every registered provider that can be built with its settings
    pub fn available(&self) -> Vec<BoxedPaymentProvider> {
        self.codes()
            .iter()
            .filter_map(|code| self.get(code).ok())
            .collect()
    }

    pub fn payment_methods(&self) -> Vec<PaymentMethod> {
        self.available()
            .iter()
            .map(|provider| PaymentMethod::of(provider.as_ref()))
            .collect()
    }

    /// Drop every cached instance; factories and settings stay.
    pub fn clear_cache(&self) -> ShopResult<()> {
        self.instances.write().map_err(poisoned)?.clear();
        Ok(())
    }

    /// Clear the cache and re-read settings from the configured source.
    pub fn reload(&self) -> ShopResult<()> {
        if let Some(source) = &self.source {
            let fresh = source.provider_settings()?;
            *self.settings.write().map_err(poisoned)? = fresh;
        }
        self.clear_cache()?;
        info!(providers = ?self.codes(), "Payment providers reloaded");
        Ok(())
    }

    fn drop_instances(&self, code: &str) -> ShopResult<()> {
        self.instances
            .write()
            .map_err(poisoned)?
            .retain(|key, _| key.code != code);
        Ok(())
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("codes", &self.codes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn counting_registry(builds: Arc<AtomicUsize>) -> ProviderRegistry {
        let registry = ProviderRegistry::new();
        registry
            .register_fn("scripted", move |settings| {
                builds.fetch_add(1, Ordering::SeqCst);
                let name = settings
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Scripted");
                Ok(Arc::new(ScriptedProvider::new("scripted").named(name)) as BoxedPaymentProvider)
            })
            .unwrap();
        registry
    }

    fn table(name: &str) -> ProviderSettings {
        let mut t = ProviderSettings::new();
        t.insert("name".into(), toml::Value::String(name.into()));
        t
    }

    #[test]
    fn test_instances_cached_per_config() {
        let builds = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(builds.clone());

        let a = registry.get_with_config("scripted", &table("A")).unwrap();
        let a_again = registry.get_with_config("scripted", &table("A")).unwrap();
        let b = registry.get_with_config("scripted", &table("B")).unwrap();

        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.display_name(), "B");
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_and_unregistered_codes() {
        let registry = counting_registry(Arc::new(AtomicUsize::new(0)));

        assert!(matches!(
            registry.get("paypal"),
            Err(ShopError::ProviderUnavailable { .. })
        ));

        assert!(registry.get("scripted").is_ok());
        assert!(registry.unregister("scripted").unwrap());
        assert!(!registry.unregister("scripted").unwrap());
        assert!(matches!(
            registry.get("scripted"),
            Err(ShopError::ProviderUnavailable { .. })
        ));
    }

    #[test]
    fn test_failing_factory_is_unavailable() {
        let registry = ProviderRegistry::new();
        registry
            .register_fn("broken", |_| {
                Err(ShopError::Configuration("missing api key".into()))
            })
            .unwrap();

        assert!(matches!(
            registry.get("broken"),
            Err(ShopError::ProviderUnavailable { .. })
        ));
        assert!(registry.available().is_empty());
    }

    struct SwappableSource(Mutex<String>);

    impl ProviderConfigSource for SwappableSource {
        fn provider_settings(&self) -> ShopResult<BTreeMap<String, ProviderSettings>> {
            let name = self.0.lock().map_err(poisoned)?.clone();
            Ok(BTreeMap::from([("scripted".to_string(), table(&name))]))
        }
    }

    #[test]
    fn test_reload_rereads_settings() {
        let source = Arc::new(SwappableSource(Mutex::new("Before".into())));
        let builds = Arc::new(AtomicUsize::new(0));

        let registry = ProviderRegistry::with_source(source.clone()).unwrap();
        let counter = builds.clone();
        registry
            .register_fn("scripted", move |settings| {
                counter.fetch_add(1, Ordering::SeqCst);
                let name = settings.get("name").and_then(|v| v.as_str()).unwrap_or("");
                Ok(Arc::new(ScriptedProvider::new("scripted").named(name)) as BoxedPaymentProvider)
            })
            .unwrap();

        assert_eq!(registry.get("scripted").unwrap().display_name(), "Before");

        *source.0.lock().unwrap() = "After".into();
        assert_eq!(registry.get("scripted").unwrap().display_name(), "Before");

        registry.reload().unwrap();
        assert_eq!(registry.get("scripted").unwrap().display_name(), "After");
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        let methods = registry.payment_methods();
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].code, "scripted");
    }
}
