pub(crate) mod binder;
pub(crate) mod shape;

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use once_cell::sync::OnceCell;
use snafu::prelude::*;
use tracing::debug;

use crate::container::ContainerId;
use crate::injector::{CyclicDependencySnafu, Injector, InjectorError, NoOwnerSnafu};
use crate::key::{Key, Lookup};
use crate::provider::callable::Instance;
use crate::provider::factory::Factory;
use crate::provider::resource::Resource;
use crate::scope::{Scope, ScopeKey, WeakScope};

use binder::BoundParams;

/// How long a resolved instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// A finished value.
    Value,
    /// A new instance for each resolution.
    Transient,
    /// One instance per owning injector.
    Singleton { thread_safe: bool },
    /// One entered instance per owning injector, exited when it closes.
    Resource { thread_safe: bool },
}

impl Lifecycle {
    pub fn is_shared(self) -> bool {
        matches!(self, Self::Singleton { .. } | Self::Resource { .. })
    }

    pub(crate) fn is_thread_safe(self) -> bool {
        matches!(
            self,
            Self::Singleton { thread_safe: true } | Self::Resource { thread_safe: true }
        )
    }
}

#[derive(Clone)]
pub(crate) enum Concrete {
    Value(Instance),
    Factory(Factory),
    Resource(Resource),
    Partial(Factory),
    Lookup { target: Dependency, lookup: Lookup },
}

pub(crate) type SyncResolve = dyn Fn(&Injector) -> Result<Instance, InjectorError> + Send + Sync;

pub(crate) type AsyncResolve =
    dyn Fn(&Injector) -> BoxFuture<'static, Result<Instance, InjectorError>> + Send + Sync;

/// The compiled way of producing the instance of a [`Dependency`].
#[derive(Clone)]
pub(crate) enum Resolver {
    Value(Instance),
    Sync(Arc<SyncResolve>),
    Async(Arc<AsyncResolve>),
}

impl Resolver {
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }

    fn into_async(self) -> Self {
        match self {
            Self::Value(value) => Self::Async(Arc::new(move |_| {
                future::ready(Ok(Arc::clone(&value))).boxed()
            })),
            Self::Sync(f) => Self::Async(Arc::new(move |injector| future::ready(f(injector)).boxed())),
            Self::Async(f) => Self::Async(f),
        }
    }
}

/// The result of resolving a key in a scope.
///
/// Dependencies are memoized by their scope, and compare by the key they
/// provide, the scope owning them and the container of their provider. The
/// way of producing an instance is compiled on first use and reused by every
/// injector of the owning scope.
#[derive(Clone)]
pub struct Dependency {
    inner: Arc<DependencyInner>,
}

struct DependencyInner {
    provides: Key,
    scope_key: ScopeKey,
    scope: WeakScope,
    container: Option<ContainerId>,
    lifecycle: Lifecycle,
    concrete: Concrete,
    force_async: bool,
    resolver: OnceCell<Resolver>,
}

impl Dependency {
    pub(crate) fn new(
        provides: Key,
        scope: &Scope,
        container: Option<ContainerId>,
        lifecycle: Lifecycle,
        concrete: Concrete,
        force_async: bool,
    ) -> Self {
        Self {
            inner: Arc::new(DependencyInner {
                provides,
                scope_key: scope.key().clone(),
                scope: scope.downgrade(),
                container,
                lifecycle,
                concrete,
                force_async,
                resolver: OnceCell::new(),
            }),
        }
    }

    pub fn provides(&self) -> &Key {
        &self.inner.provides
    }

    pub fn scope_key(&self) -> &ScopeKey {
        &self.inner.scope_key
    }

    pub fn container(&self) -> Option<ContainerId> {
        self.inner.container
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle
    }

    /// Tests whether both handles refer to the very same dependency.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns true if the dependency can only be resolved asynchronously.
    ///
    /// This compiles the dependency, and thus everything it depends on.
    pub fn is_async(&self) -> Result<bool, InjectorError> {
        match &self.inner.concrete {
            Concrete::Value(_) | Concrete::Partial(_) => Ok(self.inner.force_async),
            _ => Ok(self.resolver()?.is_async()),
        }
    }

    pub(crate) fn resolver(&self) -> Result<&Resolver, InjectorError> {
        if let Some(resolver) = self.inner.resolver.get() {
            return Ok(resolver);
        }

        let _guard = CompilingGuard::enter(self).context(CyclicDependencySnafu {
            key: self.provides().clone(),
        })?;
        let resolver = self.compile()?;
        Ok(self.inner.resolver.get_or_init(|| resolver))
    }

    fn compile(&self) -> Result<Resolver, InjectorError> {
        let scope = self.inner.scope.upgrade().context(NoOwnerSnafu {
            key: self.provides().clone(),
            scope: self.scope_key().to_string(),
        })?;
        debug!(scope = %self.scope_key(), key = %self.provides(), "compiling dependency");

        let key = self.provides();
        let resolver = match &self.inner.concrete {
            Concrete::Value(value) => Resolver::Value(Arc::clone(value)),
            Concrete::Factory(factory) => {
                let bound = BoundParams::bind(factory, &scope, key)?;
                shape::compile(key, factory, bound)
            }
            Concrete::Resource(resource) => {
                let bound = BoundParams::bind(resource.factory(), &scope, key)?;
                let producer = shape::compile(key, resource.factory(), bound);
                shape::enter(key, producer, resource.protocol().clone())
            }
            Concrete::Partial(factory) => {
                let bound = BoundParams::bind(factory, &scope, key)?;
                shape::partial(key, factory, bound)
            }
            Concrete::Lookup { target, lookup } => {
                shape::lookup(key, target.clone(), lookup.clone(), target.is_async()?)
            }
        };

        if self.inner.force_async {
            Ok(resolver.into_async())
        } else {
            Ok(resolver)
        }
    }
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.inner.provides == other.inner.provides
            && self.inner.scope_key == other.inner.scope_key
            && self.inner.container == other.inner.container
    }
}

impl Eq for Dependency {}

impl Hash for Dependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.provides.hash(state);
        self.inner.scope_key.hash(state);
        self.inner.container.hash(state);
    }
}

impl Debug for Dependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Dependency")
            .field("provides", &self.inner.provides)
            .field("scope", &self.inner.scope_key)
            .field("container", &self.inner.container)
            .field("lifecycle", &self.inner.lifecycle)
            .finish()
    }
}

thread_local! {
    static COMPILING: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

struct CompilingGuard {
    addr: usize,
}

impl CompilingGuard {
    fn enter(dependency: &Dependency) -> Option<Self> {
        let addr = Arc::as_ptr(&dependency.inner) as usize;
        COMPILING
            .with_borrow_mut(|set| set.insert(addr))
            .then_some(Self { addr })
    }
}

impl Drop for CompilingGuard {
    fn drop(&mut self) {
        COMPILING.with_borrow_mut(|set| set.remove(&self.addr));
    }
}
