// Resources
// Run-scoped resources acquired per mode, looked up by name and type

use crate::config::ResolvedConfig;
use crate::error::{BoxError, EngineError, EngineResult};
use crate::graph::ModeDefinition;
use crate::types::Value;

use async_trait::async_trait;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Shared handle to an acquired resource value
pub type ResourceValue = Arc<dyn Any + Send + Sync>;

/// Cleanup run once when the run ends
pub type Teardown = Box<dyn FnOnce() + Send>;

/// A resource value plus its optional teardown
pub struct AcquiredResource {
    pub value: ResourceValue,
    pub teardown: Option<Teardown>,
}

impl AcquiredResource {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            teardown: None,
        }
    }

    pub fn with_teardown(mut self, teardown: impl FnOnce() + Send + 'static) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }
}

/// Creates a resource from its config payload
#[async_trait]
pub trait ResourceFactory: Send + Sync {
    async fn acquire(&self, config: &Value) -> Result<AcquiredResource, BoxError>;
}

struct FnFactory<F>(F);

#[async_trait]
impl<F, Fut> ResourceFactory for FnFactory<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AcquiredResource, BoxError>> + Send,
{
    async fn acquire(&self, config: &Value) -> Result<AcquiredResource, BoxError> {
        (self.0)(config.clone()).await
    }
}

struct ConstFactory(ResourceValue);

#[async_trait]
impl ResourceFactory for ConstFactory {
    async fn acquire(&self, _config: &Value) -> Result<AcquiredResource, BoxError> {
        Ok(AcquiredResource {
            value: self.0.clone(),
            teardown: None,
        })
    }
}

/// Named resource entry of a mode
#[derive(Clone)]
pub struct ResourceDefinition {
    pub description: Option<String>,
    factory: Arc<dyn ResourceFactory>,
}

impl ResourceDefinition {
    pub fn new(factory: impl ResourceFactory + 'static) -> Self {
        Self {
            description: None,
            factory: Arc::new(factory),
        }
    }

    /// Resource built by an async function of its config payload
    pub fn from_fn<F, Fut>(acquire: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AcquiredResource, BoxError>> + Send + 'static,
    {
        Self::new(FnFactory(acquire))
    }

    /// Resource that is always the given value
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Self::new(ConstFactory(Arc::new(value)))
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub async fn acquire(&self, config: &Value) -> Result<AcquiredResource, BoxError> {
        self.factory.acquire(config).await
    }
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Resources acquired for one run; torn down in reverse acquisition order
#[derive(Default)]
pub struct Resources {
    values: BTreeMap<String, ResourceValue>,
    teardowns: Mutex<Vec<(String, Teardown)>>,
}

impl Resources {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Acquire every resource of `mode`, in declaration order.
    /// On failure, resources already acquired are torn down before returning.
    pub async fn acquire(mode: &ModeDefinition, config: &ResolvedConfig) -> EngineResult<Self> {
        let mut resources = Self::empty();

        for (name, definition) in &mode.resources {
            debug!(resource = %name, mode = %mode.name, "acquiring resource");
            match definition.acquire(&config.resource_payload(name)).await {
                Ok(acquired) => resources.insert(name.clone(), acquired),
                Err(err) => {
                    resources.teardown();
                    return Err(EngineError::ResourceInit {
                        name: name.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(resources)
    }

    pub fn insert(&mut self, name: impl Into<String>, acquired: AcquiredResource) {
        let name = name.into();
        if let Some(teardown) = acquired.teardown {
            self.teardowns
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((name.clone(), teardown));
        }
        self.values.insert(name, acquired.value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    /// Typed lookup; None when absent or of a different type
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.values.get(name).cloned()?.downcast::<T>().ok()
    }

    /// Restrict lookups to the resources a step declared
    pub fn view(self: &Arc<Self>, allowed: &BTreeSet<String>) -> ResourceView {
        ResourceView {
            resources: Some(self.clone()),
            allowed: allowed.clone(),
        }
    }

    /// Run pending teardowns, last acquired first. Safe to call more than once.
    pub fn teardown(&self) {
        let pending: Vec<(String, Teardown)> = std::mem::take(
            &mut *self
                .teardowns
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );

        for (name, teardown) in pending.into_iter().rev() {
            debug!(resource = %name, "tearing down resource");
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(teardown)).is_err() {
                warn!(resource = %name, "resource teardown panicked");
            }
        }
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field("names", &self.names())
            .finish()
    }
}

/// A step's window onto the run's resources
#[derive(Debug, Clone, Default)]
pub struct ResourceView {
    resources: Option<Arc<Resources>>,
    allowed: BTreeSet<String>,
}

impl ResourceView {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        if !self.allowed.contains(name) {
            return None;
        }
        self.resources.as_ref()?.get(name)
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.allowed.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct DbInfo {
        url: String,
    }

    fn db_resource() -> ResourceDefinition {
        ResourceDefinition::from_fn(|config: Value| async move {
            let url = config
                .get("url")
                .and_then(|v| v.as_str())
                .unwrap_or("sqlite://memory")
                .to_string();
            Ok(AcquiredResource::new(DbInfo { url }))
        })
    }

    #[tokio::test]
    async fn test_acquire_with_config() {
        let mode = ModeDefinition::new("local").resource("db_info", db_resource());
        let yaml = "resources:\n  db_info:\n    config:\n      url: pg://x\n";
        let config = ResolvedConfig::from_yaml_str(yaml).unwrap();

        let resources = Resources::acquire(&mode, &config).await.unwrap();
        let db = resources.get::<DbInfo>("db_info").unwrap();
        assert_eq!(db.url, "pg://x");
        assert!(resources.get::<String>("db_info").is_none());
        assert!(resources.get::<DbInfo>("missing").is_none());
    }

    #[tokio::test]
    async fn test_teardown_reverse_order_once() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let make = |name: &'static str| {
            let order = order.clone();
            ResourceDefinition::from_fn(move |_config: Value| {
                let order = order.clone();
                async move {
                    Ok(AcquiredResource::new(name).with_teardown(move || {
                        order.lock().unwrap().push(name);
                    }))
                }
            })
        };
        let mode = ModeDefinition::new("m")
            .resource("first", make("first"))
            .resource("second", make("second"));

        let resources = Resources::acquire(&mode, &ResolvedConfig::default())
            .await
            .unwrap();
        resources.teardown();
        resources.teardown();
        drop(resources);

        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_failed_acquire_tears_down_earlier() {
        let torn_down = Arc::new(AtomicUsize::new(0));
        let counter = torn_down.clone();
        let ok = ResourceDefinition::from_fn(move |_config: Value| {
            let counter = counter.clone();
            async move {
                Ok(AcquiredResource::new(1i64).with_teardown(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
            }
        });
        let broken = ResourceDefinition::from_fn(|_config: Value| async move {
            Err::<AcquiredResource, BoxError>("connection refused".into())
        });
        let mode = ModeDefinition::new("m")
            .resource("ok", ok)
            .resource("broken", broken);

        let err = Resources::acquire(&mode, &ResolvedConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ResourceInit { ref name, .. } if name == "broken"));
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_view_only_exposes_declared_resources() {
        let mut resources = Resources::empty();
        resources.insert("db", AcquiredResource::new(5i64));
        resources.insert("cache", AcquiredResource::new(6i64));
        let resources = Arc::new(resources);

        let allowed: BTreeSet<String> = ["db".to_string()].into_iter().collect();
        let view = resources.view(&allowed);
        assert_eq!(view.get::<i64>("db").as_deref(), Some(&5));
        assert!(view.get::<i64>("cache").is_none());
        assert!(ResourceView::empty().get::<i64>("db").is_none());
    }
}
