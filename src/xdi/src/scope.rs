use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use snafu::prelude::*;
use tracing::{trace, warn};

use crate::container::{Container, ContainerId, ProError};
use crate::dependency::Dependency;
use crate::injector::{Injector, InjectorError};
use crate::key::{DepScope, Key};
use crate::provider::Provider;

/// The structural identity of a [`Scope`]: the containers of the scope and
/// of all its ancestors, root first.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey(Arc<[ContainerId]>);

impl ScopeKey {
    pub fn path(&self) -> &[ContainerId] {
        &self.0
    }
}

impl Display for ScopeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

impl Debug for ScopeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

/// A container bound to an optional parent scope.
///
/// A scope only consults the containers of its container's [`Pro`] which
/// its ancestors don't already see, so a container shared with an ancestor is
/// resolved once, by that ancestor. Resolved [`Dependency`]s are memoized per
/// key.
///
/// Scopes compare structurally: two scopes built over the same containers
/// and parents are interchangeable.
///
/// [`Pro`]: crate::container::Pro
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

pub(crate) struct ScopeInner {
    key: ScopeKey,
    container: Container,
    parent: Option<Scope>,
    maps: Vec<Container>,
    visible: HashSet<ContainerId>,
    cache: RwLock<HashMap<Key, Option<Dependency>>>,
    dependants: Mutex<HashMap<Key, HashSet<Key>>>,
    children: Mutex<Vec<Weak<ScopeInner>>>,
}

impl Scope {
    pub fn new(container: &Container, parent: Option<&Scope>) -> Result<Self, ScopeError> {
        let linearized = container.linearized().context(ProSnafu {
            container: container.name(),
        })?;
        let maps: Vec<_> = linearized
            .into_iter()
            .filter(|c| parent.is_none_or(|parent| !parent.is_visible(c.id())))
            .collect();
        ensure!(
            !maps.is_empty(),
            EmptySnafu {
                container: container.name(),
            }
        );

        let path: Vec<_> = parent
            .map(|parent| parent.key().path().to_vec())
            .unwrap_or_default()
            .into_iter()
            .chain(Some(container.id()))
            .collect();
        let visible = parent
            .map(|parent| parent.inner.visible.clone())
            .unwrap_or_default()
            .into_iter()
            .chain(maps.iter().map(Container::id))
            .collect();

        let scope = Self {
            inner: Arc::new(ScopeInner {
                key: ScopeKey(path.into()),
                container: container.clone(),
                parent: parent.cloned(),
                maps,
                visible,
                cache: RwLock::new(HashMap::new()),
                dependants: Mutex::new(HashMap::new()),
                children: Mutex::new(Vec::new()),
            }),
        };
        if let Some(parent) = parent {
            let mut children = parent.inner.children.lock();
            children.retain(|child| child.strong_count() > 0);
            children.push(Arc::downgrade(&scope.inner));
        }
        Ok(scope)
    }

    pub fn key(&self) -> &ScopeKey {
        &self.inner.key
    }

    pub fn container(&self) -> &Container {
        &self.inner.container
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.inner.parent.as_ref()
    }

    /// Returns the containers consulted by this scope, in resolution order.
    pub fn maps(&self) -> &[Container] {
        &self.inner.maps
    }

    /// Tests whether this scope itself consults the container `id`.
    pub fn contains_container(&self, id: ContainerId) -> bool {
        self.inner.maps.iter().any(|c| c.id() == id)
    }

    /// Tests whether this scope or one of its ancestors consults `id`.
    pub fn is_visible(&self, id: ContainerId) -> bool {
        self.inner.visible.contains(&id)
    }

    /// Returns the dependency of `key`, or [`None`] if nothing in the scope
    /// chain provides it.
    pub fn get(&self, key: &Key) -> Option<Dependency> {
        if let Some(cached) = self.inner.cache.read().get(key) {
            trace!(scope = %self.key(), %key, "dependency cache hit");
            return cached.clone();
        }

        let Some(_guard) = ResolvingGuard::enter(self.key(), key) else {
            warn!(scope = %self.key(), %key, "resolving the key re-entered itself");
            return None;
        };

        trace!(scope = %self.key(), %key, "dependency cache miss");
        let resolved = self.resolve(key);
        self.inner
            .cache
            .write()
            .entry(key.clone())
            .or_insert(resolved)
            .clone()
    }

    /// Like [`Scope::get`], additionally recording that `dependant` was
    /// resolved with the help of `key`.
    pub fn get_for(&self, key: &Key, dependant: &Key) -> Option<Dependency> {
        self.record_dependant(key, dependant);
        self.get(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    fn resolve(&self, key: &Key) -> Option<Dependency> {
        let provider = self
            .resolve_provider(key)
            .or_else(|| Provider::implicit(key).map(Arc::new));

        if let Some(dependency) = provider.and_then(|provider| provider.resolve(key, self)) {
            return Some(dependency);
        }
        // A scope directive is relative to the requesting scope.
        if matches!(key, Key::Dep(dep) if dep.scope() != DepScope::Any) {
            return None;
        }
        self.parent()?.get(key)
    }

    /// Returns the provider this scope itself uses for `key`.
    ///
    /// The first non-default provider found in resolution order wins. Default
    /// providers are only used when there is no other one, the first one
    /// found being preferred.
    pub fn resolve_provider(&self, key: &Key) -> Option<Arc<Provider>> {
        let mut fallback = None;
        for container in &self.inner.maps {
            if let Some(provider) = container.get(key) {
                if !provider.is_default() {
                    return Some(provider);
                }
                fallback.get_or_insert(provider);
            }
        }
        fallback
    }

    /// Resolves `key` with the providers of this scope only.
    pub fn resolve_local(&self, key: &Key, dependant: &Key) -> Option<Dependency> {
        self.record_dependant(key, dependant);
        if let Some(Some(cached)) = self.inner.cache.read().get(key) {
            if cached.scope_key() == self.key() {
                return Some(cached.clone());
            }
        }
        self.resolve_provider(key)?.resolve(key, self)
    }

    /// Evicts the dependency of `key` together with every dependency that was
    /// resolved with its help, here and in every live descendant scope.
    pub fn flush(&self, key: &Key) {
        self.flush_keys(vec![key.clone()]);
    }

    fn flush_keys(&self, mut pending: Vec<Key>) {
        let mut flushed = HashSet::new();

        while let Some(key) = pending.pop() {
            if !flushed.insert(key.clone()) {
                continue;
            }
            trace!(scope = %self.key(), %key, "flushing dependency");
            self.inner.cache.write().remove(&key);
            if let Some(dependants) = self.inner.dependants.lock().remove(&key) {
                pending.extend(dependants);
            }
        }

        let children: Vec<_> = self
            .inner
            .children
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for inner in children {
            Scope { inner }.flush_keys(flushed.iter().cloned().collect());
        }
    }

    fn record_dependant(&self, key: &Key, dependant: &Key) {
        if key != dependant {
            self.inner
                .dependants
                .lock()
                .entry(key.clone())
                .or_default()
                .insert(dependant.clone());
        }
    }

    /// Creates an injector for this scope.
    ///
    /// `parent` must be an injector of the parent scope. If it's omitted, a
    /// new injector chain is created for the ancestors.
    pub fn injector(&self, parent: Option<&Injector>) -> Result<Injector, InjectorError> {
        match (self.parent(), parent) {
            (None, None) => Ok(Injector::new(self.clone(), None)),
            (Some(expected), Some(parent)) if parent.scope() == expected => {
                Ok(Injector::new(self.clone(), Some(parent.clone())))
            }
            (Some(expected), None) => {
                let parent = expected.injector(None)?;
                Ok(Injector::new(self.clone(), Some(parent)))
            }
            (expected, Some(parent)) => Err(InjectorError::ScopeMismatch {
                expected: expected.map(|scope| scope.key().to_string()),
                found: parent.scope().key().to_string(),
            }),
        }
    }

    /// Iterates over this scope and its ancestors, innermost first.
    pub fn ancestors(&self) -> impl Iterator<Item = &Scope> {
        std::iter::successors(Some(self), |scope| scope.parent())
    }

    pub(crate) fn downgrade(&self) -> WeakScope {
        WeakScope(Arc::downgrade(&self.inner))
    }
}

impl PartialEq for Scope {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Scope {}

impl Hash for Scope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Debug for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Scope({})", self.key())
    }
}

#[derive(Clone)]
pub(crate) struct WeakScope(Weak<ScopeInner>);

impl WeakScope {
    pub fn upgrade(&self) -> Option<Scope> {
        self.0.upgrade().map(|inner| Scope { inner })
    }
}

thread_local! {
    static RESOLVING: RefCell<HashSet<(ScopeKey, Key)>> = RefCell::new(HashSet::new());
}

struct ResolvingGuard {
    entry: Option<(ScopeKey, Key)>,
}

impl ResolvingGuard {
    fn enter(scope: &ScopeKey, key: &Key) -> Option<Self> {
        let entry = (scope.clone(), key.clone());
        RESOLVING
            .with_borrow_mut(|set| set.insert(entry.clone()))
            .then_some(Self { entry: Some(entry) })
    }
}

impl Drop for ResolvingGuard {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            RESOLVING.with_borrow_mut(|set| set.remove(&entry));
        }
    }
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ScopeError {
    #[snafu(display("the scope of container {container} provides nothing beyond its parent"))]
    #[non_exhaustive]
    Empty { container: String },
    #[snafu(display("could not compose the scope of container {container}"))]
    #[non_exhaustive]
    Pro {
        container: String,
        source: ProError,
    },
}

#[cfg(test)]
mod tests {
    use crate::provider::factory::Factory;

    use super::*;

    struct Foo;

    struct Bar;

    #[test]
    fn scope_new_fails_when_scope_is_empty() {
        let shared = Container::new("shared");
        let parent = Scope::new(&shared, None).unwrap();
        let child_container = Container::with_bases("child", [&shared]);

        assert!(matches!(
            Scope::new(&shared, Some(&parent)),
            Err(ScopeError::Empty { .. })
        ));
        let child = Scope::new(&child_container, Some(&parent)).unwrap();
        assert_eq!(child.maps(), &[child_container]);
    }

    #[test]
    fn scope_new_fails_when_pro_is_inconsistent() {
        let x = Container::new("x");
        let y = Container::new("y");
        let xy = Container::with_bases("xy", [&x, &y]);
        let yx = Container::with_bases("yx", [&y, &x]);
        let broken = Container::with_bases("broken", [&xy, &yx]);

        assert!(matches!(
            Scope::new(&broken, None),
            Err(ScopeError::Pro { .. })
        ));
    }

    #[test]
    fn scope_eq_succeeds_structurally() {
        let root = Container::new("root");
        let leaf = Container::new("leaf");
        let a = Scope::new(&root, None).unwrap();
        let b = Scope::new(&root, None).unwrap();
        assert_eq!(a, b);

        let a_leaf = Scope::new(&leaf, Some(&a)).unwrap();
        let b_leaf = Scope::new(&leaf, Some(&b)).unwrap();
        assert_eq!(a_leaf, b_leaf);
        assert_ne!(a_leaf, a);
    }

    #[test]
    fn scope_get_succeeds_when_container_is_shared_with_parent() {
        let shared = Container::new("shared");
        shared
            .factory(Key::of::<Foo>(), Factory::of(|| Foo))
            .unwrap();
        let child_container = Container::with_bases("child", [&shared]);

        let parent = Scope::new(&shared, None).unwrap();
        let child = Scope::new(&child_container, Some(&parent)).unwrap();

        let from_parent = parent.get(&Key::of::<Foo>()).unwrap();
        let from_child = child.get(&Key::of::<Foo>()).unwrap();
        assert!(from_parent.ptr_eq(&from_child));
        assert_eq!(from_child.scope_key(), parent.key());
    }

    #[test]
    fn scope_resolve_provider_prefers_non_default() {
        let defaults = Container::new("defaults");
        defaults
            .register(Key::of::<Foo>(), Provider::value(Foo).as_default())
            .unwrap();
        let overrides = Container::new("overrides");
        overrides.value(Key::of::<Foo>(), Foo).unwrap();

        for bases in [[&defaults, &overrides], [&overrides, &defaults]] {
            let app = Container::with_bases("app", bases);
            let scope = Scope::new(&app, None).unwrap();
            let provider = scope.resolve_provider(&Key::of::<Foo>()).unwrap();
            assert!(!provider.is_default());
            assert_eq!(provider.container(), Some(overrides.id()));
        }
    }

    #[test]
    fn scope_resolve_provider_prefers_first_default() {
        let first = Container::new("first");
        let second = Container::new("second");
        for container in [&first, &second] {
            container
                .register(Key::of::<Foo>(), Provider::value(Foo).as_default())
                .unwrap();
        }

        let app = Container::with_bases("app", [&first, &second]);
        let scope = Scope::new(&app, None).unwrap();
        let dependency = scope.get(&Key::of::<Foo>()).unwrap();
        assert_eq!(dependency.container(), Some(first.id()));
    }

    #[test]
    fn scope_get_fails_when_alias_is_cyclic() {
        let container = Container::new("loop");
        container
            .alias(Key::of::<Foo>(), Key::of::<Bar>())
            .unwrap();
        container
            .alias(Key::of::<Bar>(), Key::of::<Foo>())
            .unwrap();

        let scope = Scope::new(&container, None).unwrap();
        assert!(scope.get(&Key::of::<Foo>()).is_none());
        assert!(scope.get(&Key::of::<Bar>()).is_none());
    }

    #[test]
    fn scope_flush_succeeds_and_cascades() {
        let container = Container::new("app");
        container.value(Key::of::<Foo>(), Foo).unwrap();
        container
            .alias(Key::named::<Foo>("alias"), Key::of::<Foo>())
            .unwrap();
        let scope = Scope::new(&container, None).unwrap();

        let before = scope.get(&Key::named::<Foo>("alias")).unwrap();
        assert!(scope.inner.cache.read().contains_key(&Key::of::<Foo>()));

        container
            .factory(Key::of::<Foo>(), Factory::of(|| Foo))
            .unwrap();
        scope.flush(&Key::of::<Foo>());
        {
            let cache = scope.inner.cache.read();
            assert!(!cache.contains_key(&Key::of::<Foo>()));
            assert!(!cache.contains_key(&Key::named::<Foo>("alias")));
        }

        let after = scope.get(&Key::named::<Foo>("alias")).unwrap();
        assert!(!before.ptr_eq(&after));
    }

    #[test]
    fn scope_flush_cascades_to_child_scopes() {
        let app = Container::new("app");
        app.value(Key::of::<Foo>(), Foo).unwrap();
        let request = Container::new("request");
        request
            .alias(Key::named::<Foo>("request"), Key::of::<Foo>())
            .unwrap();

        let parent = Scope::new(&app, None).unwrap();
        let child = Scope::new(&request, Some(&parent)).unwrap();
        let before = child.get(&Key::of::<Foo>()).unwrap();
        assert!(before.ptr_eq(&parent.get(&Key::of::<Foo>()).unwrap()));
        child.get(&Key::named::<Foo>("request")).unwrap();

        app.factory(Key::of::<Foo>(), Factory::of(|| Foo)).unwrap();
        parent.flush(&Key::of::<Foo>());
        {
            let cache = child.inner.cache.read();
            assert!(!cache.contains_key(&Key::of::<Foo>()));
            assert!(!cache.contains_key(&Key::named::<Foo>("request")));
        }

        let after = child.get(&Key::of::<Foo>()).unwrap();
        assert!(!after.ptr_eq(&before));
        assert!(after.ptr_eq(&parent.get(&Key::of::<Foo>()).unwrap()));
    }

    #[test]
    fn scope_get_returns_none_when_key_is_unknown() {
        let scope = Scope::new(&Container::new("empty"), None).unwrap();
        assert!(scope.get(&Key::of::<Foo>()).is_none());
        assert!(!scope.contains(&Key::of::<Foo>()));
    }
}
