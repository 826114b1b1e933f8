use std::any::{self, Any};
use std::error::Error;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use snafu::prelude::*;

use crate::key::{FuncKey, Key};
use crate::provider::factory::Factory;

/// A resolved, type-erased object.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Errors raised by user code: factories, resources and lookups.
pub type BoxError = Box<dyn Error + Send + Sync>;

pub(crate) type SyncFn = dyn Fn(Arguments) -> Result<Instance, BoxError> + Send + Sync;

pub(crate) type AsyncFn = dyn Fn(Arguments) -> BoxFuture<'static, Result<Instance, BoxError>> + Send + Sync;

/// A type-erased function producing an [`Instance`] from [`Arguments`].
#[derive(Clone)]
pub enum Callable {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl Callable {
    pub fn new<F, T, E>(f: F) -> Self
    where
        F: Fn(Arguments) -> Result<T, E> + Send + Sync + 'static,
        T: Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::Sync(Arc::new(move |args| match f(args) {
            Ok(value) => Ok(Arc::new(value) as Instance),
            Err(err) => Err(err.into()),
        }))
    }

    pub fn new_async<F, Fut, T, E>(f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::Async(Arc::new(move |args| {
            f(args)
                .map(|res| match res {
                    Ok(value) => Ok(Arc::new(value) as Instance),
                    Err(err) => Err(err.into()),
                })
                .boxed()
        }))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }
}

impl Debug for Callable {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Sync(_) => write!(f, "Callable::Sync"),
            Self::Async(_) => write!(f, "Callable::Async"),
        }
    }
}

/// How a parameter accepts its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    PositionalOnly,
    PositionalOrKeyword,
    VarPositional,
    KeywordOnly,
    VarKeyword,
}

impl ParamKind {
    pub fn is_positional(self) -> bool {
        matches!(self, Self::PositionalOnly | Self::PositionalOrKeyword)
    }

    pub fn is_keyword(self) -> bool {
        matches!(self, Self::PositionalOrKeyword | Self::KeywordOnly)
    }
}

/// A declared parameter of a [`Callable`].
#[derive(Clone)]
pub struct Param {
    name: Arc<str>,
    kind: ParamKind,
    inject: Option<Key>,
    default: Option<Instance>,
}

impl Param {
    fn with_kind(name: impl Into<Arc<str>>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inject: None,
            default: None,
        }
    }

    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::with_kind(name, ParamKind::PositionalOrKeyword)
    }

    pub fn positional(name: impl Into<Arc<str>>) -> Self {
        Self::with_kind(name, ParamKind::PositionalOnly)
    }

    pub fn keyword(name: impl Into<Arc<str>>) -> Self {
        Self::with_kind(name, ParamKind::KeywordOnly)
    }

    pub fn var_positional(name: impl Into<Arc<str>>) -> Self {
        Self::with_kind(name, ParamKind::VarPositional)
    }

    pub fn var_keyword(name: impl Into<Arc<str>>) -> Self {
        Self::with_kind(name, ParamKind::VarKeyword)
    }

    /// Declares the key the parameter is injected from.
    pub fn inject(mut self, key: impl Into<Key>) -> Self {
        self.inject = Some(key.into());
        self
    }

    /// Declares the value used when nothing else binds the parameter.
    pub fn default_value<T>(mut self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.default = Some(Arc::new(value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    pub fn injected_key(&self) -> Option<&Key> {
        self.inject.as_ref()
    }

    pub fn default(&self) -> Option<&Instance> {
        self.default.as_ref()
    }
}

impl Debug for Param {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Param")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("inject", &self.inject)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// The ordered parameters of a [`Callable`].
#[derive(Debug, Clone, Default)]
pub struct Signature {
    params: Vec<Param>,
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub(crate) fn push(&mut self, param: Param) {
        self.params.push(param);
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name() == name)
    }

    fn positional_index(&self, name: &str) -> Option<usize> {
        self.params
            .iter()
            .filter(|p| p.kind().is_positional())
            .position(|p| p.name() == name)
    }

    fn positional_count(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.kind().is_positional())
            .count()
    }
}

impl FromIterator<Param> for Signature {
    fn from_iter<I: IntoIterator<Item = Param>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().collect(),
        }
    }
}

/// An argument bound at registration time.
#[derive(Clone)]
pub enum Arg {
    Value(Instance),
    Inject(Key),
}

impl Arg {
    pub fn value<T>(value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::Value(Arc::new(value))
    }

    pub fn inject(key: impl Into<Key>) -> Self {
        Self::Inject(key.into())
    }
}

impl Debug for Arg {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Value(_) => write!(f, "Arg::Value"),
            Self::Inject(key) => write!(f, "Arg::Inject({key})"),
        }
    }
}

/// The arguments a [`Callable`] is invoked with.
///
/// When the callable's [`Signature`] is known, [`Arguments::get`] finds a
/// parameter regardless of whether it was passed positionally or by keyword,
/// falling back to the declared default.
#[derive(Clone, Default)]
pub struct Arguments {
    signature: Option<Arc<Signature>>,
    args: Vec<Instance>,
    kwargs: Vec<(Arc<str>, Instance)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_signature(signature: Arc<Signature>) -> Self {
        Self {
            signature: Some(signature),
            ..Self::default()
        }
    }

    pub fn arg<T>(mut self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.args.push(Arc::new(value));
        self
    }

    pub fn kwarg<T>(mut self, name: impl Into<Arc<str>>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.push_kwarg(name.into(), Arc::new(value));
        self
    }

    pub fn push_arg(&mut self, value: Instance) {
        self.args.push(value);
    }

    /// Adds a keyword argument, replacing any previous one of the same name.
    pub fn push_kwarg(&mut self, name: Arc<str>, value: Instance) {
        if let Some(slot) = self.kwargs.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.kwargs.push((name, value));
        }
    }

    pub fn args(&self) -> &[Instance] {
        &self.args
    }

    pub fn kwargs(&self) -> &[(Arc<str>, Instance)] {
        &self.kwargs
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<Instance>, Vec<(Arc<str>, Instance)>) {
        (self.args, self.kwargs)
    }

    pub fn positional<T>(&self, index: usize) -> Result<Arc<T>, ArgumentError>
    where
        T: Send + Sync + 'static,
    {
        let value = self
            .args
            .get(index)
            .context(MissingArgumentSnafu {
                name: index.to_string(),
            })?;
        downcast(value, &index.to_string())
    }

    pub fn keyword<T>(&self, name: &str) -> Result<Arc<T>, ArgumentError>
    where
        T: Send + Sync + 'static,
    {
        let value = self.find_kwarg(name).context(MissingArgumentSnafu { name })?;
        downcast(value, name)
    }

    /// Returns the argument bound to the parameter `name`.
    pub fn get<T>(&self, name: &str) -> Result<Arc<T>, ArgumentError>
    where
        T: Send + Sync + 'static,
    {
        let value = self.lookup(name).context(MissingArgumentSnafu { name })?;
        downcast(value, name)
    }

    /// Returns the argument bound to the parameter `name`, if any.
    pub fn try_get<T>(&self, name: &str) -> Result<Option<Arc<T>>, ArgumentError>
    where
        T: Send + Sync + 'static,
    {
        match self.lookup(name) {
            Some(value) => downcast(value, name).map(Some),
            None => Ok(None),
        }
    }

    /// Returns positional arguments not consumed by named parameters.
    pub fn var_args(&self) -> &[Instance] {
        let consumed = self
            .signature
            .as_ref()
            .map_or(0, |signature| signature.positional_count());
        self.args.get(consumed..).unwrap_or_default()
    }

    /// Returns keyword arguments not matching any named parameter.
    pub fn var_kwargs(&self) -> impl Iterator<Item = (&str, &Instance)> {
        self.kwargs
            .iter()
            .filter(|(name, _)| {
                self.signature.as_ref().is_none_or(|signature| {
                    signature
                        .get(name)
                        .is_none_or(|p| !p.kind().is_keyword())
                })
            })
            .map(|(name, value)| (name.as_ref(), value))
    }

    fn find_kwarg(&self, name: &str) -> Option<&Instance> {
        self.kwargs
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, value)| value)
    }

    fn lookup(&self, name: &str) -> Option<&Instance> {
        let Some(signature) = self.signature.as_ref() else {
            return self.find_kwarg(name);
        };
        let param = signature.get(name)?;

        if param.kind().is_positional() {
            let index = signature.positional_index(name)?;
            if let Some(value) = self.args.get(index) {
                return Some(value);
            }
        }
        if param.kind().is_keyword() {
            if let Some(value) = self.find_kwarg(name) {
                return Some(value);
            }
        }
        param.default()
    }
}

impl Debug for Arguments {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Arguments")
            .field("args", &self.args.len())
            .field(
                "kwargs",
                &self.kwargs.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn downcast<T>(value: &Instance, name: &str) -> Result<Arc<T>, ArgumentError>
where
    T: Send + Sync + 'static,
{
    Arc::clone(value)
        .downcast::<T>()
        .map_err(|_| ArgumentError::TypeMismatch {
            name: name.to_string(),
            expected: any::type_name::<T>(),
        })
}

#[derive(Debug, Clone, Snafu)]
#[non_exhaustive]
pub enum ArgumentError {
    #[snafu(display("missing argument {name}"))]
    #[non_exhaustive]
    MissingArgument { name: String },
    #[snafu(display("argument {name} is not a {expected}"))]
    #[non_exhaustive]
    TypeMismatch { name: String, expected: &'static str },
}

/// A named function whose parameters can be injected on each call.
///
/// Calling a [`Func`] through an [`Injector`] resolves its declared
/// dependencies and merges them with the arguments supplied at the call site.
///
/// [`Injector`]: crate::injector::Injector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Func {
    key: FuncKey,
}

impl Func {
    pub fn new(name: impl Into<Arc<str>>, factory: Factory) -> Self {
        Self {
            key: FuncKey::new(name.into(), factory),
        }
    }

    pub fn key(&self) -> Key {
        Key::Func(self.key.clone())
    }

    pub fn name(&self) -> &str {
        self.key.name()
    }

    pub fn factory(&self) -> &Factory {
        self.key.factory()
    }
}

impl From<&Func> for Key {
    fn from(func: &Func) -> Self {
        func.key()
    }
}
