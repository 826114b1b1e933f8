mod configurer;
pub mod pro;

use std::collections::HashSet;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use snafu::prelude::*;

use crate::key::{self, Key};
use crate::module::Module;
use crate::provider::callable::{BoxError, Func};
use crate::provider::component::Component;
use crate::provider::factory::Factory;
use crate::provider::resource::Resource;
use crate::provider::Provider;

pub use configurer::Configurer;
pub use pro::{Pro, ProError};

/// The identity of a [`Container`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl Display for ContainerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "#{}", self.0)
    }
}

/// A named, composable set of providers.
///
/// Containers extend other containers much like classes inherit from base
/// classes. The first time a container's [`Pro`] is requested its bases are
/// frozen, while providers can still be registered or replaced.
///
/// `Container` is a cheap handle: clones refer to the same container.
///
/// ```rust
/// # use xdi::prelude::*;
/// struct Config;
///
/// let base = Container::new("base");
/// base.value(Key::of::<Config>(), Config).unwrap();
///
/// let app = Container::new("app");
/// app.extend([&base]).unwrap();
/// assert!(app.contains(&Key::of::<Config>()));
/// assert!(app.get(&Key::of::<Config>()).is_none());
/// assert!(app.extends(&base).unwrap());
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

struct ContainerInner {
    id: ContainerId,
    name: Arc<str>,
    bases: RwLock<Vec<Container>>,
    providers: RwLock<IndexMap<Key, Arc<Provider>>>,
    pro: OnceCell<Pro>,
}

impl Container {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                id: ContainerId(key::next_id()),
                name: name.into(),
                bases: RwLock::new(Vec::new()),
                providers: RwLock::new(IndexMap::new()),
                pro: OnceCell::new(),
            }),
        }
    }

    pub fn with_bases<'a, I>(name: impl Into<Arc<str>>, bases: I) -> Self
    where
        I: IntoIterator<Item = &'a Container>,
    {
        let container = Self::new(name);
        container
            .inner
            .bases
            .write()
            .extend(bases.into_iter().cloned());
        container
    }

    pub fn id(&self) -> ContainerId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn bases(&self) -> Vec<Container> {
        self.inner.bases.read().clone()
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.pro.get().is_some()
    }

    /// Appends `bases` to the containers this one extends.
    pub fn extend<'a, I>(&self, bases: I) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = &'a Container>,
    {
        let mut current = self.inner.bases.write();
        ensure!(
            !self.is_frozen(),
            FrozenSnafu {
                container: self.name(),
            }
        );
        current.extend(bases.into_iter().cloned());
        Ok(())
    }

    /// Binds `key` to `provider`, replacing any provider previously bound to
    /// it in this container.
    pub fn register(
        &self,
        key: impl Into<Key>,
        provider: impl Into<Arc<Provider>>,
    ) -> Result<(), RegistryError> {
        let key = key.into();
        let provider = provider.into();

        ensure!(key.is_injectable(), NotInjectableSnafu { key });
        ensure!(
            !provider.has_async_conflict(),
            AsyncMismatchSnafu { key }
        );
        if let Err(owner) = provider.set_container(self.id()) {
            return ProviderOwnedSnafu { key, owner }.fail();
        }

        self.inner.providers.write().insert(key, provider);
        Ok(())
    }

    pub fn value<T>(&self, key: impl Into<Key>, value: T) -> Result<(), RegistryError>
    where
        T: Send + Sync + 'static,
    {
        self.register(key, Provider::value(value))
    }

    pub fn alias(&self, key: impl Into<Key>, target: impl Into<Key>) -> Result<(), RegistryError> {
        self.register(key, Provider::alias(target))
    }

    pub fn factory(&self, key: impl Into<Key>, factory: Factory) -> Result<(), RegistryError> {
        self.register(key, Provider::factory(factory))
    }

    pub fn singleton(&self, key: impl Into<Key>, factory: Factory) -> Result<(), RegistryError> {
        self.register(key, Provider::singleton(factory))
    }

    pub fn resource(&self, key: impl Into<Key>, resource: Resource) -> Result<(), RegistryError> {
        self.register(key, Provider::resource(resource))
    }

    /// Registers the factory of component `T` under its key.
    pub fn component<T>(&self) -> Result<(), RegistryError>
    where
        T: Component,
    {
        self.factory(T::key(), T::factory())
    }

    /// Registers `func` so that its injected parameters are resolved with the
    /// providers visible where it is called.
    pub fn partial(&self, func: &Func) -> Result<(), RegistryError> {
        self.register(func.key(), Provider::partial(func.factory().clone()))
    }

    /// Returns the provider bound to `key` in this very container.
    pub fn get(&self, key: &Key) -> Option<Arc<Provider>> {
        self.inner.providers.read().get(key).cloned()
    }

    /// Tests whether `key` is bound in this container or any of its bases.
    pub fn contains(&self, key: &Key) -> bool {
        let mut visited = HashSet::new();
        self.contains_impl(key, &mut visited)
    }

    fn contains_impl(&self, key: &Key, visited: &mut HashSet<ContainerId>) -> bool {
        if !visited.insert(self.id()) {
            return false;
        }
        self.inner.providers.read().contains_key(key)
            || self
                .bases()
                .iter()
                .any(|base| base.contains_impl(key, visited))
    }

    pub fn keys(&self) -> Vec<Key> {
        self.inner.providers.read().keys().cloned().collect()
    }

    /// Returns the provider resolution order, computing it on first use.
    pub fn pro(&self) -> Result<&Pro, ProError> {
        if let Some(pro) = self.inner.pro.get() {
            return Ok(pro);
        }
        let pro = pro::linearize(self)?;
        Ok(self.inner.pro.get_or_init(|| pro))
    }

    /// Returns this container followed by its bases in resolution order.
    pub fn linearized(&self) -> Result<Vec<Container>, ProError> {
        let pro = self.pro()?;
        Ok(std::iter::once(self.clone())
            .chain(pro.ancestors().iter().cloned())
            .collect())
    }

    /// Tests whether `other` is this container or one of its transitive bases.
    pub fn extends(&self, other: &Container) -> Result<bool, ProError> {
        Ok(self.pro()?.contains(other.id()))
    }

    /// Runs `module` against this container.
    pub fn install<M>(&self, module: M) -> Result<(), RegistryError>
    where
        M: Module,
    {
        let mut configurer = Configurer::new(self.clone());
        module.setup(&mut configurer);
        configurer
            .finish()
            .map_err(|errors| RegistryError::Aggregated { errors })
    }
}

impl PartialEq for Container {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Container {}

impl Hash for Container {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl Debug for Container {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Container({}{})", self.name(), self.id())
    }
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum RegistryError {
    #[snafu(display("the key {key} can't be used to register a provider"))]
    #[non_exhaustive]
    NotInjectable { key: Key },
    #[snafu(display("the key {key} is registered twice by the same module"))]
    #[non_exhaustive]
    KeyDuplicated { key: Key },
    #[snafu(display("the bases of container {container} are frozen"))]
    #[non_exhaustive]
    Frozen { container: String },
    #[snafu(display("the provider of {key} already belongs to container {owner}"))]
    #[non_exhaustive]
    ProviderOwned { key: Key, owner: ContainerId },
    #[snafu(display("the provider of {key} is asynchronous but marked as synchronous"))]
    #[non_exhaustive]
    AsyncMismatch { key: Key },
    #[snafu(display("module {module} fails to setup the configuration"))]
    #[non_exhaustive]
    ModuleInner {
        module: &'static str,
        source: BoxError,
    },
    #[snafu(display("aggregated registry errors:\n{}", AggregatedDisplayer::new(errors)))]
    Aggregated { errors: Vec<RegistryError> },
}

struct AggregatedDisplayer<'a> {
    errors: &'a [RegistryError],
}

impl<'a> AggregatedDisplayer<'a> {
    fn new(errors: &'a [RegistryError]) -> Self {
        Self { errors }
    }
}

impl Display for AggregatedDisplayer<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (i, error) in self.errors.iter().enumerate() {
            writeln!(f, "{:4}: {}", i + 1, error)?;
        }
        Ok(())
    }
}
