use std::collections::HashSet;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use snafu::prelude::*;

use crate::dependency::Dependency;
use crate::injector::{Injector, InjectorError, NotFoundSnafu};
use crate::key::Key;
use crate::provider::callable::{Arg, Instance, Param, ParamKind};
use crate::provider::factory::Factory;
use crate::scope::Scope;

/// How a single argument is obtained.
#[derive(Debug, Clone)]
pub(crate) enum Binding {
    Value(Instance),
    Dependency {
        dependency: Dependency,
        is_async: bool,
    },
}

impl Binding {
    fn is_dependency(&self) -> bool {
        matches!(self, Self::Dependency { .. })
    }

    fn is_async(&self) -> bool {
        matches!(self, Self::Dependency { is_async: true, .. })
    }

    pub fn resolve(&self, injector: &Injector) -> Result<Instance, InjectorError> {
        match self {
            Self::Value(value) => Ok(Arc::clone(value)),
            Self::Dependency { dependency, .. } => injector.resolve(dependency),
        }
    }

    pub fn pending(&self, injector: &Injector) -> BoxFuture<'static, Result<Instance, InjectorError>> {
        match self {
            Self::Dependency {
                dependency,
                is_async: true,
            } => injector.resolve_async(dependency),
            _ => future::ready(self.resolve(injector)).boxed(),
        }
    }
}

/// A positional argument, named after its parameter unless it was bound to
/// a var-positional one.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub name: Option<Arc<str>>,
    pub binding: Binding,
}

/// What the binder found out about a factory's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CallShape {
    pub args: bool,
    pub kwargs: bool,
    pub awaitable_args: bool,
}

/// The arguments of a factory, bound once per scope.
///
/// Binding walks the declared parameters in order. Positional parameters take
/// the registration-time positional arguments first, then their injected key.
/// The first positional parameter which can't be bound that way (because it
/// only has a plain default, or nothing at all) ends positional binding:
/// later positional-or-keyword parameters are passed by keyword instead, and
/// later positional-only ones are left to the caller.
#[derive(Debug, Clone, Default)]
pub(crate) struct BoundParams {
    args: Vec<Slot>,
    kwargs: Vec<(Arc<str>, Binding)>,
}

impl BoundParams {
    pub fn bind(factory: &Factory, scope: &Scope, dependant: &Key) -> Result<Self, InjectorError> {
        let mut binder = Binder {
            scope,
            dependant,
            factory,
            used: HashSet::new(),
        };
        let mut bound = Self::default();
        let mut positional = factory.args().iter();
        let mut open = true;

        for param in factory.params() {
            let name = param.shared_name();
            match param.kind() {
                ParamKind::PositionalOnly | ParamKind::PositionalOrKeyword if open => {
                    if let Some(arg) = positional.next() {
                        let binding = binder.bind_arg(arg)?;
                        bound.push_arg(Some(name), binding);
                    } else if let Some(binding) = binder.bind_registered_kwarg(param)? {
                        open = false;
                        bound.kwargs.push((Arc::clone(name), binding));
                    } else if let Some(binding) = binder.bind_injected(param)? {
                        bound.push_arg(Some(name), binding);
                    } else {
                        open = false;
                    }
                }
                ParamKind::PositionalOnly => {}
                ParamKind::PositionalOrKeyword | ParamKind::KeywordOnly => {
                    if let Some(binding) = binder.bind_keyword(param)? {
                        bound.kwargs.push((Arc::clone(name), binding));
                    }
                }
                ParamKind::VarPositional => {
                    if open {
                        for arg in positional.by_ref() {
                            let binding = binder.bind_arg(arg)?;
                            bound.push_arg(None, binding);
                        }
                    }
                    open = false;
                }
                ParamKind::VarKeyword => {}
            }
        }

        for arg in positional {
            let binding = binder.bind_arg(arg)?;
            bound.push_arg(None, binding);
        }
        for (name, arg) in factory.kwargs() {
            if !binder.used.contains(name) {
                let binding = binder.bind_arg(arg)?;
                bound.kwargs.push((Arc::clone(name), binding));
            }
        }

        Ok(bound)
    }

    fn push_arg(&mut self, name: Option<&Arc<str>>, binding: Binding) {
        self.args.push(Slot {
            name: name.cloned(),
            binding,
        });
    }

    pub fn args(&self) -> &[Slot] {
        &self.args
    }

    pub fn kwargs(&self) -> &[(Arc<str>, Binding)] {
        &self.kwargs
    }

    /// Iterates over every binding, positional ones first.
    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.args
            .iter()
            .map(|slot| &slot.binding)
            .chain(self.kwargs.iter().map(|(_, binding)| binding))
    }

    pub fn is_async(&self) -> bool {
        self.bindings().any(Binding::is_async)
    }

    pub fn shape(&self) -> CallShape {
        CallShape {
            args: self.args.iter().any(|slot| slot.binding.is_dependency()),
            kwargs: self.kwargs.iter().any(|(_, binding)| binding.is_dependency()),
            awaitable_args: self.is_async(),
        }
    }
}

struct Binder<'a> {
    scope: &'a Scope,
    dependant: &'a Key,
    factory: &'a Factory,
    used: HashSet<Arc<str>>,
}

impl Binder<'_> {
    fn bind_arg(&self, arg: &Arg) -> Result<Binding, InjectorError> {
        match arg {
            Arg::Value(value) => Ok(Binding::Value(Arc::clone(value))),
            Arg::Inject(key) => {
                let dependency = self
                    .scope
                    .get_for(key, self.dependant)
                    .context(NotFoundSnafu { key: key.clone() })?;
                Self::dependency(dependency)
            }
        }
    }

    fn bind_registered_kwarg(&mut self, param: &Param) -> Result<Option<Binding>, InjectorError> {
        let found = self
            .factory
            .kwargs()
            .iter()
            .find(|(name, _)| name.as_ref() == param.name());
        match found {
            Some((name, arg)) => {
                self.used.insert(Arc::clone(name));
                self.bind_arg(arg).map(Some)
            }
            None => Ok(None),
        }
    }

    fn bind_injected(&self, param: &Param) -> Result<Option<Binding>, InjectorError> {
        let Some(key) = param.injected_key() else {
            return Ok(None);
        };
        match self.scope.get_for(key, self.dependant) {
            Some(dependency) => Self::dependency(dependency).map(Some),
            None => Ok(None),
        }
    }

    fn bind_keyword(&mut self, param: &Param) -> Result<Option<Binding>, InjectorError> {
        match self.bind_registered_kwarg(param)? {
            Some(binding) => Ok(Some(binding)),
            None => self.bind_injected(param),
        }
    }

    fn dependency(dependency: Dependency) -> Result<Binding, InjectorError> {
        let is_async = dependency.is_async()?;
        Ok(Binding::Dependency {
            dependency,
            is_async,
        })
    }
}
