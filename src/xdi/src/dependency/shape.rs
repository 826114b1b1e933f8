//! Resolver construction, specialized by call shape.
//!
//! Each function here builds the smallest closure able to produce an instance
//! for one combination of positional dependencies, keyword dependencies,
//! asynchronous dependencies and factory async-ness.

use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};

use crate::dependency::binder::{Binding, BoundParams, CallShape};
use crate::dependency::{Dependency, Resolver};
use crate::injector::partial::PartialFn;
use crate::injector::{Injector, InjectorError};
use crate::key::{Key, Lookup};
use crate::provider::callable::{Arguments, AsyncFn, BoxError, Callable, Instance, Signature, SyncFn};
use crate::provider::factory::Factory;
use crate::provider::resource::Protocol;

type Pending = BoxFuture<'static, Result<Instance, InjectorError>>;

#[derive(Clone)]
struct Call {
    key: Key,
    signature: Arc<Signature>,
}

impl Call {
    fn arguments(&self) -> Arguments {
        Arguments::with_signature(Arc::clone(&self.signature))
    }

    fn finish(&self, res: Result<Instance, BoxError>) -> Result<Instance, InjectorError> {
        res.map_err(|err| InjectorError::construction(&self.key, err))
    }

    /// Arguments holding every plain value of `bound`.
    fn values(&self, bound: &BoundParams) -> Arguments {
        let mut args = self.arguments();
        for slot in bound.args() {
            if let Binding::Value(value) = &slot.binding {
                args.push_arg(Arc::clone(value));
            }
        }
        for (name, binding) in bound.kwargs() {
            if let Binding::Value(value) = binding {
                args.push_kwarg(Arc::clone(name), Arc::clone(value));
            }
        }
        args
    }

    fn assemble(&self, injector: &Injector, bound: &BoundParams) -> Result<Arguments, InjectorError> {
        let mut args = self.arguments();
        for slot in bound.args() {
            args.push_arg(slot.binding.resolve(injector)?);
        }
        for (name, binding) in bound.kwargs() {
            args.push_kwarg(Arc::clone(name), binding.resolve(injector)?);
        }
        Ok(args)
    }

    fn gather(&self, bound: &BoundParams, values: Vec<Instance>) -> Arguments {
        let mut args = self.arguments();
        let mut values = values.into_iter();
        for value in values.by_ref().take(bound.args().len()) {
            args.push_arg(value);
        }
        for ((name, _), value) in bound.kwargs().iter().zip(values) {
            args.push_kwarg(Arc::clone(name), value);
        }
        args
    }
}

fn run(resolver: &Resolver, injector: &Injector) -> Pending {
    match resolver {
        Resolver::Value(value) => future::ready(Ok(Arc::clone(value))).boxed(),
        Resolver::Sync(f) => future::ready(f(injector)).boxed(),
        Resolver::Async(f) => f(injector),
    }
}

/// Picks the construction function matching the shape of `bound`.
pub(crate) fn compile(key: &Key, factory: &Factory, bound: BoundParams) -> Resolver {
    let call = Call {
        key: key.clone(),
        signature: Arc::clone(factory.shared_signature()),
    };
    let shape = bound.shape();

    match (shape, factory.callable()) {
        (CallShape { awaitable_args: true, .. }, callable) => {
            gathered(call, callable.clone(), bound)
        }
        (
            CallShape {
                args: false,
                kwargs: false,
                ..
            },
            Callable::Sync(f),
        ) => plain(call, Arc::clone(f), &bound),
        (
            CallShape {
                args: false,
                kwargs: false,
                ..
            },
            Callable::Async(f),
        ) => plain_async(call, Arc::clone(f), &bound),
        (CallShape { kwargs: false, .. }, Callable::Sync(f)) => args(call, Arc::clone(f), bound),
        (CallShape { args: false, .. }, Callable::Sync(f)) => kwargs(call, Arc::clone(f), bound),
        (_, Callable::Sync(f)) => args_kwargs(call, Arc::clone(f), bound),
        (_, Callable::Async(f)) => awaitable_factory(call, Arc::clone(f), bound),
    }
}

fn plain(call: Call, f: Arc<SyncFn>, bound: &BoundParams) -> Resolver {
    let args = call.values(bound);
    Resolver::Sync(Arc::new(move |_| call.finish(f(args.clone()))))
}

fn plain_async(call: Call, f: Arc<AsyncFn>, bound: &BoundParams) -> Resolver {
    let args = call.values(bound);
    Resolver::Async(Arc::new(move |_| {
        let call = call.clone();
        let produced = f(args.clone());
        async move { call.finish(produced.await) }.boxed()
    }))
}

fn args(call: Call, f: Arc<SyncFn>, bound: BoundParams) -> Resolver {
    let mut template = call.arguments();
    for (name, binding) in bound.kwargs() {
        if let Binding::Value(value) = binding {
            template.push_kwarg(Arc::clone(name), Arc::clone(value));
        }
    }
    let slots: Vec<_> = bound.args().iter().map(|slot| slot.binding.clone()).collect();

    Resolver::Sync(Arc::new(move |injector| {
        let mut args = template.clone();
        for binding in &slots {
            args.push_arg(binding.resolve(injector)?);
        }
        call.finish(f(args))
    }))
}

fn kwargs(call: Call, f: Arc<SyncFn>, bound: BoundParams) -> Resolver {
    let mut template = call.arguments();
    for slot in bound.args() {
        if let Binding::Value(value) = &slot.binding {
            template.push_arg(Arc::clone(value));
        }
    }
    let slots = bound.kwargs().to_vec();

    Resolver::Sync(Arc::new(move |injector| {
        let mut args = template.clone();
        for (name, binding) in &slots {
            args.push_kwarg(Arc::clone(name), binding.resolve(injector)?);
        }
        call.finish(f(args))
    }))
}

fn args_kwargs(call: Call, f: Arc<SyncFn>, bound: BoundParams) -> Resolver {
    Resolver::Sync(Arc::new(move |injector| {
        let args = call.assemble(injector, &bound)?;
        call.finish(f(args))
    }))
}

/// Synchronous dependencies, asynchronous factory.
fn awaitable_factory(call: Call, f: Arc<AsyncFn>, bound: BoundParams) -> Resolver {
    Resolver::Async(Arc::new(move |injector| {
        let args = match call.assemble(injector, &bound) {
            Ok(args) => args,
            Err(err) => return future::ready(Err(err)).boxed(),
        };
        let call = call.clone();
        let produced = f(args);
        async move { call.finish(produced.await) }.boxed()
    }))
}

/// Asynchronous dependencies are awaited together before calling the factory.
fn gathered(call: Call, callable: Callable, bound: BoundParams) -> Resolver {
    let bound = Arc::new(bound);
    Resolver::Async(Arc::new(move |injector| {
        let pending: Vec<_> = bound
            .bindings()
            .map(|binding| binding.pending(injector))
            .collect();
        let call = call.clone();
        let callable = callable.clone();
        let bound = Arc::clone(&bound);

        async move {
            let values = future::try_join_all(pending).await?;
            let args = call.gather(&bound, values);
            match callable {
                Callable::Sync(f) => call.finish(f(args)),
                Callable::Async(f) => call.finish(f(args).await),
            }
        }
        .boxed()
    }))
}

/// Wraps `producer` so that its products are entered and their exit is
/// scheduled on the injector they're resolved by.
pub(crate) fn enter(key: &Key, producer: Resolver, protocol: Protocol) -> Resolver {
    let key = key.clone();
    match (producer, protocol) {
        (Resolver::Sync(produce), Protocol::Sync(enter)) => Resolver::Sync(Arc::new(move |injector| {
            let instance = produce(injector)?;
            let (instance, exit) =
                enter(instance).map_err(|err| InjectorError::construction(&key, err))?;
            injector.push_exit_entry(exit);
            Ok(instance)
        })),
        (producer, protocol) => Resolver::Async(Arc::new(move |injector| {
            let produced = run(&producer, injector);
            let key = key.clone();
            let protocol = protocol.clone();
            let injector = injector.clone();

            async move {
                let instance = produced.await?;
                let entered = match &protocol {
                    Protocol::Sync(enter) => enter(instance),
                    Protocol::Async(enter) => enter(instance).await,
                };
                let (instance, exit) =
                    entered.map_err(|err| InjectorError::construction(&key, err))?;
                injector.push_exit_entry(exit);
                Ok(instance)
            }
            .boxed()
        })),
    }
}

pub(crate) fn lookup(key: &Key, target: Dependency, lookup: Lookup, target_async: bool) -> Resolver {
    let key = key.clone();
    if !target_async {
        return Resolver::Sync(Arc::new(move |injector| {
            let instance = injector.resolve(&target)?;
            lookup
                .evaluate(instance)
                .map_err(|err| InjectorError::construction(&key, err))
        }));
    }

    Resolver::Async(Arc::new(move |injector| {
        let resolved = injector.resolve_async(&target);
        let key = key.clone();
        let lookup = lookup.clone();
        async move {
            lookup
                .evaluate(resolved.await?)
                .map_err(|err| InjectorError::construction(&key, err))
        }
        .boxed()
    }))
}

/// Resolves to a [`PartialFn`] bound to the resolving injector.
pub(crate) fn partial(key: &Key, factory: &Factory, bound: BoundParams) -> Resolver {
    let key = key.clone();
    let callable = factory.callable().clone();
    let signature = Arc::clone(factory.shared_signature());
    let bound = Arc::new(bound);

    Resolver::Sync(Arc::new(move |injector| {
        let partial = PartialFn::new(
            injector.clone(),
            key.clone(),
            callable.clone(),
            Arc::clone(&signature),
            Arc::clone(&bound),
        );
        Ok(Arc::new(partial) as Instance)
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::container::Container;
    use crate::provider::callable::{Arg, ArgumentError, Param};
    use crate::scope::Scope;

    use super::*;

    struct Config {
        retries: u8,
    }

    struct Client {
        retries: u8,
        verbose: bool,
    }

    fn container() -> Container {
        let container = Container::new("app");
        container
            .factory(Key::of::<Config>(), Factory::of(|| Config { retries: 3 }))
            .unwrap();
        container
    }

    fn client_factory() -> Factory {
        Factory::new(|args: Arguments| {
            let config = args.get::<Config>("config")?;
            let verbose = args.get::<bool>("verbose")?;
            Ok::<_, ArgumentError>(Client {
                retries: config.retries,
                verbose: *verbose,
            })
        })
        .inject("config", Key::of::<Config>())
        .param(Param::keyword("verbose"))
    }

    fn make(container: &Container, key: &Key) -> Result<Instance, InjectorError> {
        let scope = Scope::new(container, None).unwrap();
        let injector = scope.injector(None).unwrap();
        injector.make(key)
    }

    #[test]
    fn compile_succeeds_with_plain_values() {
        let counter = Arc::new(AtomicUsize::new(0));
        let cloned = Arc::clone(&counter);
        let factory = Factory::new(move |args: Arguments| {
            cloned.fetch_add(1, Ordering::SeqCst);
            args.get::<u8>("n").map(|n| *n)
        })
        .param(Param::new("n"))
        .arg(Arg::value(7u8));
        let key = Key::token("n");
        let container = container();
        container.factory(key.clone(), factory).unwrap();

        let scope = Scope::new(&container, None).unwrap();
        let injector = scope.injector(None).unwrap();
        let n = injector.make(&key).unwrap();
        injector.make(&key).unwrap();

        assert_eq!(*n.downcast::<u8>().unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn compile_succeeds_with_positional_and_keyword_dependencies() {
        let container = container();
        container
            .value(Key::named::<bool>("verbose"), true)
            .unwrap();
        container
            .factory(
                Key::of::<Client>(),
                client_factory()
                    .kwarg("verbose", Arg::inject(Key::named::<bool>("verbose"))),
            )
            .unwrap();

        let client = make(&container, &Key::of::<Client>())
            .unwrap()
            .downcast::<Client>()
            .unwrap();
        assert_eq!(client.retries, 3);
        assert!(client.verbose);
    }

    #[test]
    fn compile_fails_when_factory_fails() {
        let container = container();
        container
            .factory(Key::of::<Client>(), client_factory())
            .unwrap();

        let err = make(&container, &Key::of::<Client>()).unwrap_err();
        assert!(matches!(err, InjectorError::ObjectConstruction { .. }));
    }

    #[tokio::test]
    async fn compile_succeeds_with_async_dependencies() {
        let container = Container::new("app");
        container
            .factory(
                Key::of::<Config>(),
                Factory::new_async(|_| async { Ok::<_, BoxError>(Config { retries: 5 }) }),
            )
            .unwrap();
        container
            .factory(
                Key::of::<Client>(),
                client_factory()
                    .kwarg("verbose", Arg::value(false)),
            )
            .unwrap();
        let scope = Scope::new(&container, None).unwrap();
        let injector = scope.injector(None).unwrap();

        assert!(matches!(
            injector.make(&Key::of::<Client>()),
            Err(InjectorError::AsyncDependency { .. })
        ));
        let client = injector
            .make_async(&Key::of::<Client>())
            .await
            .unwrap()
            .downcast::<Client>()
            .unwrap();
        assert_eq!(client.retries, 5);
        assert!(!client.verbose);
    }

    #[tokio::test]
    async fn compile_succeeds_with_async_factory() {
        let key = Key::token("retries");
        let container = container();
        container
            .factory(
                key.clone(),
                Factory::new_async(|args: Arguments| async move {
                    let config = args.get::<Config>("config")?;
                    Ok::<_, ArgumentError>(config.retries)
                })
                .inject("config", Key::of::<Config>()),
            )
            .unwrap();
        let scope = Scope::new(&container, None).unwrap();
        let injector = scope.injector(None).unwrap();

        let retries = injector.make_async(&key).await.unwrap();
        assert_eq!(*retries.downcast::<u8>().unwrap(), 3);
    }
}
