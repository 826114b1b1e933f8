pub mod callable;
pub mod component;
pub mod factory;
pub mod resource;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::container::ContainerId;
use crate::dependency::{Concrete, Dependency, Lifecycle};
use crate::key::{Dep, DepDefault, DepScope, Key};
use crate::scope::Scope;

use callable::Instance;
use factory::Factory;
use resource::Resource;

/// A predicate deciding whether a provider applies to a key in a scope.
pub type Filter = Arc<dyn Fn(&Provider, &Key, &Scope) -> bool + Send + Sync>;

/// What a [`Provider`] resolves to.
#[derive(Clone)]
pub enum ProviderKind {
    /// A finished value, shared by everyone.
    Value(Instance),
    /// A redirection to another key.
    Alias(Key),
    /// A new object for each request.
    Factory(Factory),
    /// An object created once per injector.
    Singleton { factory: Factory, thread_safe: bool },
    /// An object created and entered once per injector, exited when it closes.
    Resource {
        resource: Resource,
        thread_safe: bool,
    },
    /// A function with its dependencies injected on every call.
    Partial(Factory),
    /// The first resolvable member of a [`Key::Union`].
    Union,
    /// The first resolvable candidate of a [`Key::Annotated`].
    Annotated,
    /// The target of a [`Key::Dep`], honoring its scope directive and default.
    Dep,
    /// The projection of a [`Key::Lookup`].
    Lookup,
}

impl Debug for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Value(_) => write!(f, "Value"),
            Self::Alias(key) => write!(f, "Alias({key})"),
            Self::Factory(factory) => f.debug_tuple("Factory").field(factory).finish(),
            Self::Singleton {
                factory,
                thread_safe,
            } => f
                .debug_struct("Singleton")
                .field("factory", factory)
                .field("thread_safe", thread_safe)
                .finish(),
            Self::Resource {
                resource,
                thread_safe,
            } => f
                .debug_struct("Resource")
                .field("resource", resource)
                .field("thread_safe", thread_safe)
                .finish(),
            Self::Partial(factory) => f.debug_tuple("Partial").field(factory).finish(),
            Self::Union => write!(f, "Union"),
            Self::Annotated => write!(f, "Annotated"),
            Self::Dep => write!(f, "Dep"),
            Self::Lookup => write!(f, "Lookup"),
        }
    }
}

/// Describes how a key is resolved into a [`Dependency`].
///
/// A provider belongs to at most one container, which is recorded when it is
/// registered. Its automatic attributes are computed the first time it
/// resolves something and never change afterwards.
pub struct Provider {
    kind: ProviderKind,
    container: OnceCell<ContainerId>,
    is_default: bool,
    is_async: Option<bool>,
    frozen_async: OnceCell<bool>,
    filters: Vec<Filter>,
}

impl Provider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            container: OnceCell::new(),
            is_default: false,
            is_async: None,
            frozen_async: OnceCell::new(),
            filters: Vec::new(),
        }
    }

    pub fn value<T>(value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::new(ProviderKind::Value(Arc::new(value)))
    }

    pub fn instance(value: Instance) -> Self {
        Self::new(ProviderKind::Value(value))
    }

    pub fn alias(target: impl Into<Key>) -> Self {
        Self::new(ProviderKind::Alias(target.into()))
    }

    pub fn factory(factory: Factory) -> Self {
        Self::new(ProviderKind::Factory(factory))
    }

    pub fn singleton(factory: Factory) -> Self {
        Self::new(ProviderKind::Singleton {
            factory,
            thread_safe: false,
        })
    }

    pub fn resource(resource: Resource) -> Self {
        Self::new(ProviderKind::Resource {
            resource,
            thread_safe: false,
        })
    }

    pub fn partial(factory: Factory) -> Self {
        Self::new(ProviderKind::Partial(factory))
    }

    /// Returns the built-in provider of a marker key.
    pub(crate) fn implicit(key: &Key) -> Option<Self> {
        let kind = match key {
            Key::Union(_) => ProviderKind::Union,
            Key::Annotated(_) => ProviderKind::Annotated,
            Key::Dep(_) => ProviderKind::Dep,
            Key::Lookup(_) => ProviderKind::Lookup,
            Key::Func(func) => ProviderKind::Partial(func.factory().clone()),
            Key::Type(_) | Key::Token(_) => return None,
        };
        Some(Self::new(kind))
    }

    /// Marks the provider as a fallback, used only if no other provider in
    /// the scope applies.
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Overrides the detected async-ness.
    ///
    /// Forcing a synchronous provider to be asynchronous makes its dependency
    /// resolvable only through the asynchronous accessors. The opposite is
    /// rejected on registration.
    pub fn with_async(mut self, is_async: bool) -> Self {
        self.is_async = Some(is_async);
        self
    }

    /// Guarantees exactly-once construction of singletons and resources
    /// under concurrent first access.
    pub fn thread_safe(mut self, enabled: bool) -> Self {
        match &mut self.kind {
            ProviderKind::Singleton { thread_safe, .. }
            | ProviderKind::Resource { thread_safe, .. } => *thread_safe = enabled,
            _ => {}
        }
        self
    }

    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Provider, &Key, &Scope) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(f));
        self
    }

    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    pub fn container(&self) -> Option<ContainerId> {
        self.container.get().copied()
    }

    /// Records the owning container. Fails with the current owner if the
    /// provider already belongs to another container.
    pub(crate) fn set_container(&self, id: ContainerId) -> Result<(), ContainerId> {
        match self.container.try_insert(id) {
            Ok(_) => Ok(()),
            Err((owner, _)) if *owner == id => Ok(()),
            Err((owner, _)) => Err(*owner),
        }
    }

    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Returns the frozen async-ness of the provider.
    ///
    /// A partial is never asynchronous itself: only calling the function it
    /// produces may be.
    pub fn is_async(&self) -> bool {
        *self
            .frozen_async
            .get_or_init(|| self.is_async.unwrap_or_else(|| self.detect_async()))
    }

    pub(crate) fn has_async_conflict(&self) -> bool {
        self.is_async == Some(false) && self.detect_async()
    }

    fn detect_async(&self) -> bool {
        match &self.kind {
            ProviderKind::Factory(factory) | ProviderKind::Singleton { factory, .. } => {
                factory.is_async()
            }
            ProviderKind::Resource { resource, .. } => resource.is_async(),
            _ => false,
        }
    }

    pub fn can_resolve(&self, key: &Key, scope: &Scope) -> bool {
        if let Some(id) = self.container.get() {
            if !scope.contains_container(*id) {
                return false;
            }
        }

        let applicable = match &self.kind {
            ProviderKind::Union => matches!(key, Key::Union(_)),
            ProviderKind::Annotated => matches!(key, Key::Annotated(_)),
            ProviderKind::Dep => matches!(key, Key::Dep(_)),
            ProviderKind::Lookup => matches!(key, Key::Lookup(_)),
            _ => true,
        };

        applicable && self.filters.iter().all(|f| f(self, key, scope))
    }

    /// Resolves `key` in `scope`.
    ///
    /// Returns [`None`] if the provider doesn't apply, or if a provider
    /// forwarding to other keys finds nothing to forward to.
    pub fn resolve(&self, key: &Key, scope: &Scope) -> Option<Dependency> {
        let is_async = self.is_async();
        if !self.can_resolve(key, scope) {
            return None;
        }

        let build = |lifecycle, concrete| {
            Dependency::new(
                key.clone(),
                scope,
                self.container(),
                lifecycle,
                concrete,
                is_async,
            )
        };

        match &self.kind {
            ProviderKind::Value(value) => {
                Some(build(Lifecycle::Value, Concrete::Value(Arc::clone(value))))
            }
            ProviderKind::Alias(target) => scope.get_for(target, key),
            ProviderKind::Factory(factory) => Some(build(
                Lifecycle::Transient,
                Concrete::Factory(factory.clone()),
            )),
            ProviderKind::Singleton {
                factory,
                thread_safe,
            } => Some(build(
                Lifecycle::Singleton {
                    thread_safe: *thread_safe,
                },
                Concrete::Factory(factory.clone()),
            )),
            ProviderKind::Resource {
                resource,
                thread_safe,
            } => Some(build(
                Lifecycle::Resource {
                    thread_safe: *thread_safe,
                },
                Concrete::Resource(resource.clone()),
            )),
            ProviderKind::Partial(factory) => Some(build(
                Lifecycle::Transient,
                Concrete::Partial(factory.clone()),
            )),
            ProviderKind::Union => {
                let Key::Union(union) = key else {
                    return None;
                };
                union
                    .members()
                    .iter()
                    .rev()
                    .find_map(|member| scope.get_for(member, key))
            }
            ProviderKind::Annotated => {
                let Key::Annotated(annotated) = key else {
                    return None;
                };
                annotated
                    .candidates()
                    .find_map(|candidate| scope.get_for(candidate, key))
            }
            ProviderKind::Dep => {
                let Key::Dep(dep) = key else {
                    return None;
                };
                resolve_dep(dep, key, scope)
            }
            ProviderKind::Lookup => {
                let Key::Lookup(lookup) = key else {
                    return None;
                };
                let target = scope.get_for(lookup.target(), key)?;
                Some(build(
                    Lifecycle::Transient,
                    Concrete::Lookup {
                        target,
                        lookup: lookup.clone(),
                    },
                ))
            }
        }
    }
}

fn resolve_dep(dep: &Dep, key: &Key, scope: &Scope) -> Option<Dependency> {
    let target = dep.abstract_key();
    let found = match dep.scope() {
        DepScope::Any => scope.get_for(target, key),
        DepScope::OnlySelf => scope.resolve_local(target, key),
        DepScope::SkipSelf => scope.parent().and_then(|parent| parent.get(target)),
    };

    found.or_else(|| match dep.default()? {
        DepDefault::Key(fallback) => scope.get_for(fallback, key),
        DepDefault::Value(value) => Some(Dependency::new(
            key.clone(),
            scope,
            None,
            Lifecycle::Value,
            Concrete::Value(Arc::clone(value)),
            false,
        )),
    })
}

impl Debug for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Provider")
            .field("kind", &self.kind)
            .field("container", &self.container.get())
            .field("is_default", &self.is_default)
            .field("is_async", &self.is_async)
            .field("filters", &self.filters.len())
            .finish()
    }
}
