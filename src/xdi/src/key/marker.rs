use std::any;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::key::Key;
use crate::provider::callable::{ArgumentError, BoxError, Instance};

/// A key resolved by the first of its members that can be resolved.
///
/// Members are tried from the last declared one to the first one.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Union {
    members: Arc<[Key]>,
}

impl Union {
    pub fn new<I>(members: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Key>,
    {
        Self {
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    pub fn members(&self) -> &[Key] {
        &self.members
    }
}

impl Display for Union {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Union[")?;
        write_keys(f, &self.members)?;
        write!(f, "]")
    }
}

impl Debug for Union {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

/// A base key decorated with marker keys.
///
/// The metadata markers are tried before the base key, last one first.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Annotated {
    inner: Arc<AnnotatedInner>,
}

#[derive(PartialEq, Eq, Hash)]
struct AnnotatedInner {
    base: Key,
    metadata: Vec<Key>,
}

impl Annotated {
    pub fn new<I>(base: impl Into<Key>, metadata: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Key>,
    {
        Self {
            inner: Arc::new(AnnotatedInner {
                base: base.into(),
                metadata: metadata.into_iter().map(Into::into).collect(),
            }),
        }
    }

    pub fn base(&self) -> &Key {
        &self.inner.base
    }

    pub fn metadata(&self) -> &[Key] {
        &self.inner.metadata
    }

    /// Returns the keys in the order they should be tried.
    pub(crate) fn candidates(&self) -> impl Iterator<Item = &Key> {
        self.inner
            .metadata
            .iter()
            .rev()
            .chain(Some(&self.inner.base))
    }
}

impl Display for Annotated {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Annotated[{}", self.inner.base)?;
        for meta in &self.inner.metadata {
            write!(f, ", {meta}")?;
        }
        write!(f, "]")
    }
}

impl Debug for Annotated {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

/// Where a [`Dep`] marker looks for its abstract key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DepScope {
    /// The requesting scope and then its ancestors.
    #[default]
    Any,
    /// Only the requesting scope itself.
    OnlySelf,
    /// The ancestors of the requesting scope, bypassing the scope itself.
    SkipSelf,
}

/// The fallback of a [`Dep`] marker which fails to resolve.
#[derive(Clone)]
pub enum DepDefault {
    Key(Key),
    Value(Instance),
}

impl PartialEq for DepDefault {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Key(a), Self::Key(b)) => a == b,
            (Self::Value(a), Self::Value(b)) => instance_addr(a) == instance_addr(b),
            _ => false,
        }
    }
}

impl Eq for DepDefault {}

impl Hash for DepDefault {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Key(key) => key.hash(state),
            Self::Value(value) => instance_addr(value).hash(state),
        }
    }
}

impl Debug for DepDefault {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Key(key) => write!(f, "{key}"),
            Self::Value(_) => write!(f, "<value>"),
        }
    }
}

fn instance_addr(instance: &Instance) -> usize {
    Arc::as_ptr(instance) as *const () as usize
}

/// A marker asking for `abstract_key` with a scope directive and an optional
/// fallback.
///
/// ```rust
/// # use xdi::key::{Dep, DepScope, Key};
/// struct Cache;
///
/// let dep = Dep::new(Key::of::<Cache>()).skip_self().or_key(Key::token("memory"));
/// assert_eq!(dep.scope(), DepScope::SkipSelf);
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Dep {
    inner: Arc<DepInner>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct DepInner {
    abstract_key: Key,
    scope: DepScope,
    default: Option<DepDefault>,
}

impl Dep {
    pub fn new(abstract_key: impl Into<Key>) -> Self {
        Self {
            inner: Arc::new(DepInner {
                abstract_key: abstract_key.into(),
                scope: DepScope::Any,
                default: None,
            }),
        }
    }

    pub fn scope_directive(mut self, scope: DepScope) -> Self {
        Arc::make_mut(&mut self.inner).scope = scope;
        self
    }

    pub fn only_self(self) -> Self {
        self.scope_directive(DepScope::OnlySelf)
    }

    pub fn skip_self(self) -> Self {
        self.scope_directive(DepScope::SkipSelf)
    }

    /// Falls back to resolving `key` if the abstract key can't be resolved.
    pub fn or_key(mut self, key: impl Into<Key>) -> Self {
        Arc::make_mut(&mut self.inner).default = Some(DepDefault::Key(key.into()));
        self
    }

    /// Falls back to `value` if the abstract key can't be resolved.
    pub fn or_value<T>(mut self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.inner).default = Some(DepDefault::Value(Arc::new(value)));
        self
    }

    pub fn abstract_key(&self) -> &Key {
        &self.inner.abstract_key
    }

    pub fn scope(&self) -> DepScope {
        self.inner.scope
    }

    pub fn default(&self) -> Option<&DepDefault> {
        self.inner.default.as_ref()
    }
}

impl Display for Dep {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Dep({}, {:?}", self.inner.abstract_key, self.inner.scope)?;
        if let Some(default) = &self.inner.default {
            write!(f, ", default={default:?}")?;
        }
        write!(f, ")")
    }
}

impl Debug for Dep {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupKind {
    Attr,
    Item,
    Call,
}

type Projection = dyn Fn(&Instance) -> Result<Instance, BoxError> + Send + Sync;

/// One step of a [`Lookup`] path.
///
/// Steps are identified by their kind and label: two steps with the same
/// kind and label are expected to perform the same projection.
#[derive(Clone)]
pub struct LookupOp {
    kind: LookupKind,
    label: Arc<str>,
    apply: Arc<Projection>,
}

impl LookupOp {
    pub fn new<T, U, F>(kind: LookupKind, label: impl Into<Arc<str>>, f: F) -> Self
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let label: Arc<str> = label.into();
        let name = Arc::clone(&label);
        let apply = move |instance: &Instance| -> Result<Instance, BoxError> {
            let target = Arc::clone(instance).downcast::<T>().map_err(|_| {
                BoxError::from(ArgumentError::TypeMismatch {
                    name: name.to_string(),
                    expected: any::type_name::<T>(),
                })
            })?;
            Ok(Arc::new(f(target.as_ref())))
        };

        Self {
            kind,
            label,
            apply: Arc::new(apply),
        }
    }

    pub fn kind(&self) -> LookupKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl PartialEq for LookupOp {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.label == other.label
    }
}

impl Eq for LookupOp {}

impl Hash for LookupOp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.label.hash(state);
    }
}

impl Display for LookupOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.kind {
            LookupKind::Attr => write!(f, ".{}", self.label),
            LookupKind::Item => write!(f, "[{}]", self.label),
            LookupKind::Call => write!(f, "({})", self.label),
        }
    }
}

/// A lazy expression: resolve `target`, then apply a chain of projections.
///
/// ```rust
/// # use xdi::key::{Key, Lookup};
/// struct Settings {
///     pool_size: usize,
/// }
///
/// let lookup = Lookup::new(Key::of::<Settings>()).attr("pool_size", |s: &Settings| s.pool_size);
/// assert_eq!(lookup.to_string(), format!("{}.pool_size", Key::of::<Settings>()));
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Lookup {
    inner: Arc<LookupInner>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct LookupInner {
    target: Key,
    path: Vec<LookupOp>,
}

impl Lookup {
    pub fn new(target: impl Into<Key>) -> Self {
        Self {
            inner: Arc::new(LookupInner {
                target: target.into(),
                path: Vec::new(),
            }),
        }
    }

    pub fn op(mut self, op: LookupOp) -> Self {
        Arc::make_mut(&mut self.inner).path.push(op);
        self
    }

    pub fn attr<T, U, F>(self, name: impl Into<Arc<str>>, f: F) -> Self
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.op(LookupOp::new(LookupKind::Attr, name, f))
    }

    pub fn item<T, U, F>(self, index: impl Into<Arc<str>>, f: F) -> Self
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.op(LookupOp::new(LookupKind::Item, index, f))
    }

    pub fn call<T, U, F>(self, arguments: impl Into<Arc<str>>, f: F) -> Self
    where
        T: Send + Sync + 'static,
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.op(LookupOp::new(LookupKind::Call, arguments, f))
    }

    pub fn target(&self) -> &Key {
        &self.inner.target
    }

    pub fn path(&self) -> &[LookupOp] {
        &self.inner.path
    }

    pub(crate) fn evaluate(&self, instance: Instance) -> Result<Instance, BoxError> {
        self.inner
            .path
            .iter()
            .try_fold(instance, |current, op| (op.apply)(&current))
    }
}

impl Display for Lookup {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.inner.target)?;
        for op in &self.inner.path {
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

impl Debug for Lookup {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

fn write_keys(f: &mut Formatter<'_>, keys: &[Key]) -> FmtResult {
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{key}")?;
    }
    Ok(())
}
