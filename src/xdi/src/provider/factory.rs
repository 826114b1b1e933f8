use std::future::Future;
use std::sync::Arc;

use crate::key::Key;
use crate::provider::callable::{Arg, Arguments, BoxError, Callable, Param, Signature};

/// A callable together with its declared signature and the arguments bound to
/// it at registration time.
///
/// ```rust
/// # use xdi::prelude::*;
/// struct Pool {
///     size: usize,
/// }
///
/// let factory = Factory::new(|args: Arguments| {
///     let size = args.get::<usize>("size")?;
///     Ok::<_, ArgumentError>(Pool { size: *size })
/// })
/// .param(Param::new("size"))
/// .arg(Arg::value(8usize));
///
/// assert_eq!(factory.args().len(), 1);
/// assert!(!factory.is_async());
/// ```
#[derive(Debug, Clone)]
pub struct Factory {
    callable: Callable,
    signature: Arc<Signature>,
    args: Vec<Arg>,
    kwargs: Vec<(Arc<str>, Arg)>,
}

impl Factory {
    pub fn new<F, T, E>(f: F) -> Self
    where
        F: Fn(Arguments) -> Result<T, E> + Send + Sync + 'static,
        T: Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::from_callable(Callable::new(f))
    }

    pub fn new_async<F, Fut, T, E>(f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::from_callable(Callable::new_async(f))
    }

    pub fn from_callable(callable: Callable) -> Self {
        Self {
            callable,
            signature: Arc::new(Signature::new()),
            args: Vec::new(),
            kwargs: Vec::new(),
        }
    }

    /// Returns a factory calling `f` without any argument.
    pub fn of<F, T>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        Self::new(move |_| Ok::<_, BoxError>(f()))
    }

    pub fn param(mut self, param: Param) -> Self {
        Arc::make_mut(&mut self.signature).push(param);
        self
    }

    /// Declares a positional-or-keyword parameter injected from `key`.
    pub fn inject(self, name: impl Into<Arc<str>>, key: impl Into<Key>) -> Self {
        self.param(Param::new(name).inject(key))
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = Arc::new(signature);
        self
    }

    pub fn arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn kwarg(mut self, name: impl Into<Arc<str>>, arg: Arg) -> Self {
        let name = name.into();
        self.kwargs.retain(|(n, _)| *n != name);
        self.kwargs.push((name, arg));
        self
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    pub fn params(&self) -> &[Param] {
        self.signature.params()
    }

    pub(crate) fn shared_signature(&self) -> &Arc<Signature> {
        &self.signature
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    pub fn kwargs(&self) -> &[(Arc<str>, Arg)] {
        &self.kwargs
    }

    pub fn is_async(&self) -> bool {
        self.callable.is_async()
    }
}
