use std::collections::HashSet;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use futures::future;

use crate::dependency::binder::BoundParams;
use crate::injector::{AsyncDependencySnafu, Injector, InjectorError};
use crate::key::Key;
use crate::provider::callable::{Arguments, Callable, Instance, Signature};

/// A function with its dependencies bound by an injector.
///
/// Arguments given at the call site are merged with the bound ones:
/// positional arguments are appended to the bound positional ones, and
/// keyword arguments replace bound ones of the same name. A keyword argument
/// naming a parameter that was bound positionally takes its place, and the
/// bound positional arguments after it are passed by keyword instead.
pub struct PartialFn {
    injector: Injector,
    key: Key,
    callable: Callable,
    signature: Arc<Signature>,
    bound: Arc<BoundParams>,
}

impl PartialFn {
    pub(crate) fn new(
        injector: Injector,
        key: Key,
        callable: Callable,
        signature: Arc<Signature>,
        bound: Arc<BoundParams>,
    ) -> Self {
        Self {
            injector,
            key,
            callable,
            signature,
            bound,
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Returns true if calling requires [`PartialFn::call_async`].
    pub fn is_async(&self) -> bool {
        self.callable.is_async() || self.bound.is_async()
    }

    pub fn call(&self, args: Arguments) -> Result<Instance, InjectorError> {
        let f = match &self.callable {
            Callable::Sync(f) if !self.bound.is_async() => f,
            _ => {
                return AsyncDependencySnafu {
                    key: self.key.clone(),
                }
                .fail()
            }
        };

        let values = self
            .bound
            .bindings()
            .map(|binding| binding.resolve(&self.injector))
            .collect::<Result<Vec<_>, _>>()?;
        let args = self.merge(values, args);
        f(args).map_err(|err| InjectorError::construction(&self.key, err))
    }

    pub async fn call_async(&self, args: Arguments) -> Result<Instance, InjectorError> {
        let pending: Vec<_> = self
            .bound
            .bindings()
            .map(|binding| binding.pending(&self.injector))
            .collect();
        let values = future::try_join_all(pending).await?;
        let args = self.merge(values, args);

        let res = match &self.callable {
            Callable::Sync(f) => f(args),
            Callable::Async(f) => f(args).await,
        };
        res.map_err(|err| InjectorError::construction(&self.key, err))
    }

    fn merge(&self, values: Vec<Instance>, call: Arguments) -> Arguments {
        let (call_args, call_kwargs) = call.into_parts();
        let overridden: HashSet<&str> = call_kwargs.iter().map(|(name, _)| name.as_ref()).collect();

        let slots = self.bound.args();
        let mut values = values.into_iter();
        let positional: Vec<_> = values.by_ref().take(slots.len()).collect();
        let cut = slots
            .iter()
            .position(|slot| {
                slot.name
                    .as_deref()
                    .is_some_and(|name| overridden.contains(name))
            })
            .unwrap_or(slots.len());

        let mut args = Arguments::with_signature(Arc::clone(&self.signature));
        for (index, (slot, value)) in slots.iter().zip(positional).enumerate() {
            if index < cut {
                args.push_arg(value);
            } else if let Some(name) = &slot.name {
                args.push_kwarg(Arc::clone(name), value);
            }
        }
        for ((name, _), value) in self.bound.kwargs().iter().zip(values) {
            args.push_kwarg(Arc::clone(name), value);
        }
        for value in call_args {
            args.push_arg(value);
        }
        for (name, value) in call_kwargs {
            args.push_kwarg(name, value);
        }
        args
    }
}

impl Debug for PartialFn {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PartialFn")
            .field("key", &self.key)
            .field("is_async", &self.is_async())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::container::Container;
    use crate::injector::TypedResolve;
    use crate::provider::callable::{Arg, ArgumentError, BoxError, Func, Param};
    use crate::provider::factory::Factory;
    use crate::scope::Scope;

    use super::*;

    struct Greeting(&'static str);

    fn greet() -> Func {
        Func::new(
            "greet",
            Factory::new(|args: Arguments| {
                let greeting = args.get::<Greeting>("greeting")?;
                let name = args.get::<&'static str>("name")?;
                let punctuation = args.get::<char>("punctuation")?;
                Ok::<_, ArgumentError>(format!("{} {name}{punctuation}", greeting.0))
            })
            .inject("greeting", Key::of::<Greeting>())
            .param(Param::new("name"))
            .param(Param::new("punctuation").default_value('.')),
        )
    }

    fn injector() -> Injector {
        let container = Container::new("app");
        container.value(Key::of::<Greeting>(), Greeting("hello")).unwrap();
        Scope::new(&container, None).unwrap().injector(None).unwrap()
    }

    #[test]
    fn partial_fn_call_succeeds() {
        let partial = injector().partial(&greet()).unwrap();
        assert!(!partial.is_async());

        let out = partial
            .call(Arguments::new().arg("world").kwarg("punctuation", '!'))
            .unwrap();
        assert_eq!(*out.downcast::<String>().unwrap(), "hello world!");
    }

    #[test]
    fn partial_fn_call_succeeds_when_keyword_overrides_bound_positional() {
        let partial = injector().partial(&greet()).unwrap();
        let out = partial
            .call(
                Arguments::new()
                    .kwarg("greeting", Greeting("bye"))
                    .kwarg("name", "moon"),
            )
            .unwrap();
        assert_eq!(*out.downcast::<String>().unwrap(), "bye moon.");
    }

    #[test]
    fn partial_fn_merge_moves_later_positionals_to_keywords() {
        let container = Container::new("app");
        container.value(Key::named::<u8>("a"), 1u8).unwrap();
        let func = Func::new(
            "triple",
            Factory::new(|args: Arguments| {
                let a = args.get::<u8>("a")?;
                let b = args.get::<u8>("b")?;
                let c = args.get::<u8>("c")?;
                Ok::<_, ArgumentError>((*a, *b, *c))
            })
            .param(Param::new("a").inject(Key::named::<u8>("a")))
            .param(Param::new("b"))
            .param(Param::new("c"))
            .arg(Arg::inject(Key::named::<u8>("a")))
            .arg(Arg::value(2u8))
            .arg(Arg::value(3u8)),
        );
        let injector = Scope::new(&container, None).unwrap().injector(None).unwrap();
        let partial = injector.partial(&func).unwrap();

        let out = partial.call(Arguments::new().kwarg("b", 20u8)).unwrap();
        assert_eq!(*out.downcast::<(u8, u8, u8)>().unwrap(), (1, 20, 3));
    }

    #[tokio::test]
    async fn partial_fn_call_async_succeeds() {
        let container = Container::new("app");
        container
            .factory(
                Key::of::<Greeting>(),
                Factory::new_async(|_| async { Ok::<_, BoxError>(Greeting("hi")) }),
            )
            .unwrap();
        let injector = Scope::new(&container, None).unwrap().injector(None).unwrap();
        let partial = injector.partial(&greet()).unwrap();
        assert!(partial.is_async());

        assert!(matches!(
            partial.call(Arguments::new().arg("there")),
            Err(InjectorError::AsyncDependency { .. })
        ));
        let out = partial
            .call_async(Arguments::new().arg("there"))
            .await
            .unwrap();
        assert_eq!(*out.downcast::<String>().unwrap(), "hi there.");
        assert!(injector.get::<Greeting>().is_err());
    }
}
