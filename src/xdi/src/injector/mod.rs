pub(crate) mod exit_stack;
pub(crate) mod partial;
mod shared;

use std::any;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::iter;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use snafu::prelude::*;
use tokio::sync::OnceCell as AsyncCell;
use tracing::{debug, warn};

use crate::dependency::{Dependency, Resolver};
use crate::key::Key;
use crate::provider::callable::{ArgumentError, Arguments, BoxError, Func, Instance};
use crate::scope::Scope;

pub use exit_stack::ExitError;
pub use partial::PartialFn;

use exit_stack::{ExitEntry, ExitStack};
use shared::SharedObjects;

/// The object-safe lookup seam implemented by [`Injector`].
#[cfg_attr(test, mockall::automock)]
pub trait Resolve: Send + Sync {
    fn make(&self, key: &Key) -> Result<Instance, InjectorError>;

    fn contains(&self, key: &Key) -> bool;
}

/// Typed helpers over [`Resolve`].
pub trait TypedResolve: Resolve {
    fn get<T>(&self) -> Result<Arc<T>, InjectorError>
    where
        T: Send + Sync + 'static,
    {
        self.get_key(&Key::of::<T>())
    }

    fn get_named<T>(&self, name: &str) -> Result<Arc<T>, InjectorError>
    where
        T: Send + Sync + 'static,
    {
        self.get_key(&Key::named::<T>(name))
    }

    fn get_key<T>(&self, key: &Key) -> Result<Arc<T>, InjectorError>
    where
        T: Send + Sync + 'static,
    {
        downcast(key, self.make(key)?)
    }
}

impl<R> TypedResolve for R where R: Resolve + ?Sized {}

fn downcast<T>(key: &Key, instance: Instance) -> Result<Arc<T>, InjectorError>
where
    T: Send + Sync + 'static,
{
    instance
        .downcast::<T>()
        .map_err(|_| InjectorError::TypeMismatch {
            key: key.clone(),
            expected: any::type_name::<T>(),
        })
}

/// Resolves dependencies of one [`Scope`] and owns what they produce.
///
/// Injectors form a chain mirroring the scope chain. A dependency is always
/// resolved by the injector of the scope owning it, so singletons and
/// resources of a parent scope are shared by all of its child injectors.
///
/// ```rust
/// # use xdi::prelude::*;
/// struct Config {
///     port: u16,
/// }
///
/// let container = Container::new("app");
/// container.value(Key::of::<Config>(), Config { port: 8080 }).unwrap();
///
/// let scope = Scope::new(&container, None).unwrap();
/// let injector = scope.injector(None).unwrap();
/// assert_eq!(injector.get::<Config>().unwrap().port, 8080);
/// injector.close().unwrap();
/// ```
#[derive(Clone)]
pub struct Injector {
    inner: Arc<InjectorInner>,
}

struct InjectorInner {
    scope: Scope,
    parent: Option<Injector>,
    shared: SharedObjects,
    async_cells: Mutex<HashMap<Dependency, Arc<AsyncCell<Instance>>>>,
    exits: Mutex<ExitStack>,
    closed: AtomicBool,
}

impl Injector {
    pub(crate) fn new(scope: Scope, parent: Option<Injector>) -> Self {
        Self {
            inner: Arc::new(InjectorInner {
                scope,
                parent,
                shared: SharedObjects::new(),
                async_cells: Mutex::new(HashMap::new()),
                exits: Mutex::new(ExitStack::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub fn parent(&self) -> Option<&Injector> {
        self.inner.parent.as_ref()
    }

    /// Iterates over this injector and its ancestors, innermost first.
    pub fn ancestors(&self) -> impl Iterator<Item = &Injector> {
        iter::successors(Some(self), |injector| injector.parent())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the dependency of `key` in this injector's scope.
    pub fn dependency(&self, key: &Key) -> Result<Dependency, InjectorError> {
        self.scope()
            .get(key)
            .context(NotFoundSnafu { key: key.clone() })
    }

    /// Resolves `key` synchronously.
    pub fn make(&self, key: &Key) -> Result<Instance, InjectorError> {
        let dependency = self.dependency(key)?;
        self.resolve(&dependency)
    }

    /// Resolves `key`, awaiting asynchronous dependencies.
    pub async fn make_async(&self, key: &Key) -> Result<Instance, InjectorError> {
        let dependency = self.dependency(key)?;
        self.resolve_async(&dependency).await
    }

    pub async fn get_async<T>(&self) -> Result<Arc<T>, InjectorError>
    where
        T: Send + Sync + 'static,
    {
        self.get_key_async(&Key::of::<T>()).await
    }

    pub async fn get_key_async<T>(&self, key: &Key) -> Result<Arc<T>, InjectorError>
    where
        T: Send + Sync + 'static,
    {
        downcast(key, self.make_async(key).await?)
    }

    /// Resolves `dependency` synchronously in the injector owning it.
    pub fn resolve(&self, dependency: &Dependency) -> Result<Instance, InjectorError> {
        self.owner(dependency)?.resolve_owned(dependency)
    }

    /// Resolves `dependency` in the injector owning it.
    pub fn resolve_async(&self, dependency: &Dependency) -> BoxFuture<'static, Result<Instance, InjectorError>> {
        let owner = match self.owner(dependency) {
            Ok(owner) => owner.clone(),
            Err(err) => return future::ready(Err(err)).boxed(),
        };
        let dependency = dependency.clone();
        async move { owner.resolve_owned_async(&dependency).await }.boxed()
    }

    fn owner(&self, dependency: &Dependency) -> Result<&Injector, InjectorError> {
        let owner = self
            .ancestors()
            .find(|injector| injector.scope().key() == dependency.scope_key())
            .context(NoOwnerSnafu {
                key: dependency.provides().clone(),
                scope: dependency.scope_key().to_string(),
            })?;
        ensure!(
            !owner.is_closed(),
            ClosedSnafu {
                scope: owner.scope().key().to_string(),
            }
        );
        Ok(owner)
    }

    fn resolve_owned(&self, dependency: &Dependency) -> Result<Instance, InjectorError> {
        let lifecycle = dependency.lifecycle();
        match dependency.resolver()? {
            Resolver::Value(value) => Ok(Arc::clone(value)),
            Resolver::Async(_) => AsyncDependencySnafu {
                key: dependency.provides().clone(),
            }
            .fail(),
            Resolver::Sync(f) if lifecycle.is_shared() => {
                self.inner
                    .shared
                    .get_or_construct(dependency, lifecycle.is_thread_safe(), || f(self))
            }
            Resolver::Sync(f) => f(self),
        }
    }

    async fn resolve_owned_async(&self, dependency: &Dependency) -> Result<Instance, InjectorError> {
        let f = match dependency.resolver()? {
            Resolver::Async(f) => Arc::clone(f),
            _ => return self.resolve_owned(dependency),
        };
        if !dependency.lifecycle().is_shared() {
            return f(self).await;
        }

        let cell = Arc::clone(
            self.inner
                .async_cells
                .lock()
                .entry(dependency.clone())
                .or_default(),
        );
        cell.get_or_try_init(|| f(self)).await.cloned()
    }

    /// Calls `func`, injecting its declared dependencies.
    pub fn call<T>(&self, func: &Func, args: Arguments) -> Result<Arc<T>, InjectorError>
    where
        T: Send + Sync + 'static,
    {
        let key = func.key();
        downcast(&key, self.partial(func)?.call(args)?)
    }

    pub async fn call_async<T>(&self, func: &Func, args: Arguments) -> Result<Arc<T>, InjectorError>
    where
        T: Send + Sync + 'static,
    {
        let key = func.key();
        let partial = self.partial(func)?;
        downcast(&key, partial.call_async(args).await?)
    }

    /// Returns `func` with its dependencies bound.
    pub fn partial(&self, func: &Func) -> Result<Arc<PartialFn>, InjectorError> {
        self.get_key(&func.key())
    }

    /// Schedules `f` to run when this injector closes.
    pub fn push_exit<F>(&self, f: F)
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.push_exit_entry(ExitEntry::sync(f));
    }

    /// Schedules `f` to run when this injector closes asynchronously.
    pub fn push_async_exit<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.push_exit_entry(ExitEntry::asynchronous(f));
    }

    pub(crate) fn push_exit_entry(&self, entry: ExitEntry) {
        self.inner.exits.lock().push(entry);
    }

    /// Unwinds the exit stack, then drops every shared object.
    ///
    /// Closing twice is a no-op. Asynchronous exit callbacks can't run here
    /// and are reported as [`ExitError::AsyncInSyncClose`].
    pub fn close(&self) -> Result<(), InjectorError> {
        self.unwind().context(ExitSnafu)
    }

    pub async fn aclose(&self) -> Result<(), InjectorError> {
        self.aunwind().await.context(ExitSnafu)
    }

    pub(crate) fn unwind(&self) -> Result<(), ExitError> {
        match self.shutdown() {
            Some(exits) => exits.close(),
            None => Ok(()),
        }
    }

    pub(crate) async fn aunwind(&self) -> Result<(), ExitError> {
        match self.shutdown() {
            Some(exits) => exits.aclose().await,
            None => Ok(()),
        }
    }

    fn shutdown(&self) -> Option<ExitStack> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return None;
        }
        debug!(scope = %self.scope().key(), "closing injector");
        let exits = mem::take(&mut *self.inner.exits.lock());
        self.inner.shared.clear();
        self.inner.async_cells.lock().clear();
        Some(exits)
    }
}

impl Resolve for Injector {
    fn make(&self, key: &Key) -> Result<Instance, InjectorError> {
        Injector::make(self, key)
    }

    fn contains(&self, key: &Key) -> bool {
        self.scope().contains(key)
    }
}

impl Debug for Injector {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Injector")
            .field("scope", self.scope().key())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for InjectorInner {
    fn drop(&mut self) {
        let exits = self.exits.get_mut();
        if !exits.is_empty() {
            warn!(
                scope = %self.scope.key(),
                pending = exits.len(),
                "dropping an injector with pending exit callbacks"
            );
        }
    }
}

#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum InjectorError {
    #[snafu(display("could not find the object identified by the given key {key}"))]
    #[non_exhaustive]
    NotFound { key: Key },
    #[snafu(display("could not construct the object {key} which depends on itself somehow"))]
    #[non_exhaustive]
    CyclicDependency { key: Key },
    #[snafu(display("could not resolve the asynchronous dependency {key} synchronously"))]
    #[non_exhaustive]
    AsyncDependency { key: Key },
    #[snafu(display("the construction of the object {key} was abandoned by its constructor"))]
    #[non_exhaustive]
    Abandoned { key: Key },
    #[snafu(display("could not find an injector of scope {scope} owning {key}"))]
    #[non_exhaustive]
    NoOwner { key: Key, scope: String },
    #[snafu(display("expected a parent injector of scope {expected:?}, found one of scope {found}"))]
    #[non_exhaustive]
    ScopeMismatch {
        expected: Option<String>,
        found: String,
    },
    #[snafu(display("could not construct the object {key}"))]
    #[non_exhaustive]
    ObjectConstruction {
        key: Key,
        source: Arc<dyn Error + Send + Sync>,
    },
    #[snafu(display("the object {key} is not a {expected}"))]
    #[non_exhaustive]
    TypeMismatch { key: Key, expected: &'static str },
    #[snafu(display("could not bind the arguments of a call"))]
    #[non_exhaustive]
    Argument { source: ArgumentError },
    #[snafu(display("the injector of scope {scope} is closed"))]
    #[non_exhaustive]
    Closed { scope: String },
    #[snafu(display("there is no current injector"))]
    #[non_exhaustive]
    NoCurrentInjector,
    #[snafu(display("could not unwind the exit stack"))]
    #[non_exhaustive]
    Exit {
        #[snafu(source(from(ExitError, Arc::new)))]
        source: Arc<ExitError>,
    },
}

impl InjectorError {
    pub(crate) fn construction(key: &Key, source: BoxError) -> Self {
        Self::ObjectConstruction {
            key: key.clone(),
            source: Arc::from(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use crate::container::Container;
    use crate::provider::callable::Param;
    use crate::provider::factory::Factory;
    use crate::provider::resource::{Resource, SyncResource};
    use crate::provider::Provider;

    use super::*;

    struct Counter(usize);

    struct Session;

    struct Connection {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl SyncResource for Connection {
        fn enter(&self) -> Result<(), BoxError> {
            self.log.lock().push("enter");
            Ok(())
        }

        fn exit(&self) -> Result<(), BoxError> {
            self.log.lock().push("exit");
            Ok(())
        }
    }

    fn counting_factory() -> (Arc<AtomicUsize>, Factory) {
        let count = Arc::new(AtomicUsize::new(0));
        let cloned = Arc::clone(&count);
        let factory = Factory::of(move || Counter(cloned.fetch_add(1, Ordering::SeqCst)));
        (count, factory)
    }

    #[test]
    fn injector_make_succeeds_with_singleton_shared_by_children() {
        let app = Container::new("app");
        let (count, factory) = counting_factory();
        app.singleton(Key::of::<Counter>(), factory).unwrap();
        let request = Container::new("request");
        request
            .factory(Key::of::<Session>(), Factory::of(|| Session))
            .unwrap();

        let root = Scope::new(&app, None).unwrap();
        let child = Scope::new(&request, Some(&root)).unwrap();
        let root_injector = root.injector(None).unwrap();
        let first = child.injector(Some(&root_injector)).unwrap();
        let second = child.injector(Some(&root_injector)).unwrap();

        let a = first.get::<Counter>().unwrap();
        let b = second.get::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(first.get::<Session>().is_ok());
    }

    #[test]
    fn injector_make_succeeds_with_transient() {
        let app = Container::new("app");
        let (count, factory) = counting_factory();
        app.factory(Key::of::<Counter>(), factory).unwrap();
        let injector = Scope::new(&app, None).unwrap().injector(None).unwrap();

        assert_eq!(injector.get::<Counter>().unwrap().0, 0);
        assert_eq!(injector.get::<Counter>().unwrap().0, 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn injector_make_fails_when_key_is_missing_or_mistyped() {
        let app = Container::new("app");
        app.value(Key::of::<Counter>(), Counter(1)).unwrap();
        let injector = Scope::new(&app, None).unwrap().injector(None).unwrap();

        assert!(matches!(
            injector.get::<Session>(),
            Err(InjectorError::NotFound { .. })
        ));
        assert!(matches!(
            injector.get_key::<Session>(&Key::of::<Counter>()),
            Err(InjectorError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn injector_resolve_fails_when_owner_is_not_an_ancestor() {
        let app = Container::new("app");
        app.value(Key::of::<Counter>(), Counter(1)).unwrap();
        let other = Container::new("other");
        other
            .factory(Key::of::<Session>(), Factory::of(|| Session))
            .unwrap();

        let app_injector = Scope::new(&app, None).unwrap().injector(None).unwrap();
        let other_scope = Scope::new(&other, None).unwrap();
        let dependency = other_scope.get(&Key::of::<Session>()).unwrap();

        assert!(matches!(
            app_injector.resolve(&dependency),
            Err(InjectorError::NoOwner { .. })
        ));
    }

    #[test]
    fn injector_close_succeeds_and_runs_exits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let app = Container::new("app");
        let cloned = Arc::clone(&log);
        app.resource(
            Key::of::<Connection>(),
            Resource::new::<Connection>(Factory::of(move || Connection {
                log: Arc::clone(&cloned),
            })),
        )
        .unwrap();
        let injector = Scope::new(&app, None).unwrap().injector(None).unwrap();

        let a = injector.get::<Connection>().unwrap();
        let b = injector.get::<Connection>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let pushed = Arc::clone(&log);
        injector.push_exit(move || {
            pushed.lock().push("pushed");
            Ok(())
        });

        injector.close().unwrap();
        injector.close().unwrap();
        assert_eq!(*log.lock(), vec!["enter", "pushed", "exit"]);
        assert!(matches!(
            injector.get::<Connection>(),
            Err(InjectorError::Closed { .. })
        ));
    }

    #[test]
    fn injector_close_fails_when_exit_fails() {
        let app = Container::new("app");
        app.value(Key::of::<Counter>(), Counter(0)).unwrap();
        let injector = Scope::new(&app, None).unwrap().injector(None).unwrap();
        injector.push_exit(|| Err("disk full".into()));

        let err = injector.close().unwrap_err();
        let InjectorError::Exit { source } = err else {
            unreachable!("closing should fail while unwinding")
        };
        assert!(matches!(*source, ExitError::Callback { .. }));
    }

    #[test]
    fn injector_call_succeeds() {
        let app = Container::new("app");
        app.value(Key::of::<Counter>(), Counter(40)).unwrap();
        let add = Func::new(
            "add",
            Factory::new(|args: Arguments| {
                let counter = args.get::<Counter>("counter")?;
                let n = args.get::<usize>("n")?;
                Ok::<_, ArgumentError>(counter.0 + *n)
            })
            .inject("counter", Key::of::<Counter>())
            .param(Param::new("n")),
        );
        let injector = Scope::new(&app, None).unwrap().injector(None).unwrap();

        let sum = injector
            .call::<usize>(&add, Arguments::new().arg(2usize))
            .unwrap();
        assert_eq!(*sum, 42);
    }

    #[tokio::test]
    async fn injector_make_async_succeeds_with_async_singleton() {
        let app = Container::new("app");
        let count = Arc::new(AtomicUsize::new(0));
        let cloned = Arc::clone(&count);
        app.register(
            Key::of::<Counter>(),
            Provider::singleton(Factory::new_async(move |_| {
                let n = cloned.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, BoxError>(Counter(n)) }
            }))
            .thread_safe(true),
        )
        .unwrap();
        let injector = Scope::new(&app, None).unwrap().injector(None).unwrap();

        let (a, b) = tokio::join!(
            injector.get_async::<Counter>(),
            injector.get_async::<Counter>()
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(matches!(
            injector.get::<Counter>(),
            Err(InjectorError::AsyncDependency { .. })
        ));
    }

    #[test]
    fn typed_resolve_get_succeeds_with_mock() {
        let mut mock = MockResolve::new();
        mock.expect_make()
            .withf(|key| *key == Key::of::<Counter>())
            .returning(|_| Ok(Arc::new(Counter(7)) as Instance));

        assert_eq!(mock.get::<Counter>().unwrap().0, 7);
    }
}
