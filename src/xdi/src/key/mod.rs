mod marker;

use std::any::{self, Any, TypeId};
use std::collections::HashSet;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::provider::callable::Instance;
use crate::provider::factory::Factory;

pub use marker::{Annotated, Dep, DepDefault, DepScope, Lookup, LookupKind, LookupOp, Union};

/// Anything that can be used to look up a dependency.
///
/// A [`Key`] is either a Rust type (optionally qualified by a name), a unique
/// [`Token`], the identity of a registered function, or one of the markers
/// carrying extra resolution directives: [`Union`], [`Annotated`], [`Dep`]
/// and [`Lookup`].
///
/// Not every key is legal for registration, see [`is_injectable`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Type(TypeKey),
    Token(Token),
    Func(FuncKey),
    Union(Union),
    Annotated(Annotated),
    Dep(Dep),
    Lookup(Lookup),
}

impl Key {
    /// Returns the key of type `T`.
    pub fn of<T>() -> Self
    where
        T: ?Sized + 'static,
    {
        Self::Type(TypeKey::of::<T>())
    }

    /// Returns the key of type `T` qualified by `name`.
    pub fn named<T>(name: impl Into<Arc<str>>) -> Self
    where
        T: ?Sized + 'static,
    {
        Self::Type(TypeKey::named::<T>(name))
    }

    /// Returns a key backed by a freshly created [`Token`].
    pub fn token(name: impl Into<Arc<str>>) -> Self {
        Self::Token(Token::new(name))
    }

    /// Returns a key matching whichever member resolves first.
    pub fn union<I>(members: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Key>,
    {
        Self::Union(Union::new(members))
    }

    /// Returns `base` annotated with `metadata` markers.
    pub fn annotated<I>(base: impl Into<Key>, metadata: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Key>,
    {
        Self::Annotated(Annotated::new(base, metadata))
    }

    pub fn is_injectable(&self) -> bool {
        is_injectable(self)
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Type(key) => Display::fmt(key, f),
            Self::Token(token) => Display::fmt(token, f),
            Self::Func(func) => Display::fmt(func, f),
            Self::Union(union) => Display::fmt(union, f),
            Self::Annotated(annotated) => Display::fmt(annotated, f),
            Self::Dep(dep) => Display::fmt(dep, f),
            Self::Lookup(lookup) => Display::fmt(lookup, f),
        }
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl From<TypeKey> for Key {
    fn from(key: TypeKey) -> Self {
        Self::Type(key)
    }
}

impl From<Token> for Key {
    fn from(token: Token) -> Self {
        Self::Token(token)
    }
}

impl From<&Token> for Key {
    fn from(token: &Token) -> Self {
        Self::Token(token.clone())
    }
}

impl From<FuncKey> for Key {
    fn from(key: FuncKey) -> Self {
        Self::Func(key)
    }
}

impl From<Union> for Key {
    fn from(union: Union) -> Self {
        Self::Union(union)
    }
}

impl From<Annotated> for Key {
    fn from(annotated: Annotated) -> Self {
        Self::Annotated(annotated)
    }
}

impl From<Dep> for Key {
    fn from(dep: Dep) -> Self {
        Self::Dep(dep)
    }
}

impl From<Lookup> for Key {
    fn from(lookup: Lookup) -> Self {
        Self::Lookup(lookup)
    }
}

/// A key identifying a Rust type, optionally qualified by a name.
#[derive(Clone)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
    qualifier: Option<Arc<str>>,
}

impl TypeKey {
    pub fn of<T>() -> Self
    where
        T: ?Sized + 'static,
    {
        Self {
            id: TypeId::of::<T>(),
            name: any::type_name::<T>(),
            qualifier: None,
        }
    }

    pub fn named<T>(name: impl Into<Arc<str>>) -> Self
    where
        T: ?Sized + 'static,
    {
        Self {
            qualifier: Some(name.into()),
            ..Self::of::<T>()
        }
    }

    pub fn target(&self) -> TypeId {
        self.id
    }

    pub fn type_name(&self) -> &'static str {
        self.name
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.qualifier == other.qualifier
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.qualifier.hash(state);
    }
}

impl Display for TypeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.qualifier {
            Some(qualifier) => write!(f, "{}@{:?}", self.name, qualifier),
            None => write!(f, "{}", self.name),
        }
    }
}

impl Debug for TypeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id() -> u64 {
    NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed)
}

/// A unique, named key which is not tied to any Rust type.
///
/// Two tokens are equal only if one is a clone of the other, even if they
/// share the same name.
///
/// ```rust
/// # use xdi::key::Token;
/// let a = Token::new("db");
/// let b = Token::new("db");
/// assert_ne!(a, b);
/// assert_eq!(a, a.clone());
/// ```
#[derive(Clone)]
pub struct Token {
    id: u64,
    name: Arc<str>,
}

impl Token {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            id: next_id(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "~{}", self.name)
    }
}

impl Debug for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "~{}#{}", self.name, self.id)
    }
}

/// The identity of a [`Func`].
///
/// [`Func`]: crate::provider::callable::Func
#[derive(Clone)]
pub struct FuncKey {
    id: u64,
    name: Arc<str>,
    factory: Arc<Factory>,
}

impl FuncKey {
    pub(crate) fn new(name: Arc<str>, factory: Factory) -> Self {
        Self {
            id: next_id(),
            name,
            factory: Arc::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn factory(&self) -> &Factory {
        &self.factory
    }
}

impl PartialEq for FuncKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FuncKey {}

impl Hash for FuncKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for FuncKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "fn {}", self.name)
    }
}

impl Debug for FuncKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self, f)
    }
}

static TRIVIAL_TYPES: Lazy<HashSet<TypeId>> = Lazy::new(|| {
    HashSet::from([
        TypeId::of::<()>(),
        TypeId::of::<bool>(),
        TypeId::of::<char>(),
        TypeId::of::<i8>(),
        TypeId::of::<i16>(),
        TypeId::of::<i32>(),
        TypeId::of::<i64>(),
        TypeId::of::<i128>(),
        TypeId::of::<isize>(),
        TypeId::of::<u8>(),
        TypeId::of::<u16>(),
        TypeId::of::<u32>(),
        TypeId::of::<u64>(),
        TypeId::of::<u128>(),
        TypeId::of::<usize>(),
        TypeId::of::<f32>(),
        TypeId::of::<f64>(),
        TypeId::of::<String>(),
        TypeId::of::<&'static str>(),
        TypeId::of::<str>(),
        TypeId::of::<dyn Any>(),
        TypeId::of::<dyn Any + Send + Sync>(),
        TypeId::of::<Box<dyn Any + Send + Sync>>(),
        TypeId::of::<Instance>(),
    ])
});

/// Tests whether `key` may be used to register a provider.
///
/// Unqualified keys of trivial types (unit, primitives, strings and
/// type-erased values) are rejected, since keying on them would silently
/// collide across unrelated components. Qualifying such a type with a name
/// makes the intent explicit and the key injectable.
///
/// ```rust
/// # use xdi::key::{is_injectable, Key};
/// struct Database;
///
/// assert!(is_injectable(&Key::of::<Database>()));
/// assert!(!is_injectable(&Key::of::<String>()));
/// assert!(is_injectable(&Key::named::<String>("dsn")));
/// ```
pub fn is_injectable(key: &Key) -> bool {
    match key {
        Key::Type(key) => key.qualifier.is_some() || !TRIVIAL_TYPES.contains(&key.id),
        Key::Token(_) | Key::Func(_) => true,
        Key::Union(union) => {
            !union.members().is_empty() && union.members().iter().all(is_injectable)
        }
        Key::Annotated(annotated) => annotated.metadata().iter().any(is_injectable),
        Key::Dep(dep) => is_injectable(dep.abstract_key()),
        Key::Lookup(lookup) => is_injectable(lookup.target()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Service;

    trait Repository {}

    #[test]
    fn type_key_eq_succeeds() {
        assert_eq!(Key::of::<Service>(), Key::of::<Service>());
        assert_ne!(Key::of::<Service>(), Key::named::<Service>("primary"));
        assert_ne!(Key::named::<Service>("a"), Key::named::<Service>("b"));
        assert_eq!(Key::named::<Service>("a"), Key::named::<Service>("a"));
    }

    #[test]
    fn token_eq_succeeds() {
        let token = Token::new("config");
        assert_eq!(Key::from(&token), Key::from(token.clone()));
        assert_ne!(Key::from(token), Key::token("config"));
    }

    #[test]
    fn is_injectable_succeeds() {
        assert!(is_injectable(&Key::of::<Service>()));
        assert!(is_injectable(&Key::of::<dyn Repository>()));
        assert!(is_injectable(&Key::token("anything")));
        assert!(is_injectable(&Key::named::<i32>("port")));
        assert!(is_injectable(&Key::union([
            Key::of::<Service>(),
            Key::of::<dyn Repository>()
        ])));
        assert!(is_injectable(&Key::annotated(
            Key::of::<String>(),
            [Key::from(Dep::new(Key::token("dsn")))]
        )));
    }

    #[test]
    fn is_injectable_fails_when_type_is_trivial() {
        assert!(!is_injectable(&Key::of::<()>()));
        assert!(!is_injectable(&Key::of::<i32>()));
        assert!(!is_injectable(&Key::of::<String>()));
        assert!(!is_injectable(&Key::of::<&'static str>()));
        assert!(!is_injectable(&Key::of::<dyn Any + Send + Sync>()));
        assert!(!is_injectable(&Key::union([
            Key::of::<Service>(),
            Key::of::<u8>()
        ])));
        assert!(!is_injectable(&Key::union(Vec::<Key>::new())));
        assert!(!is_injectable(&Key::annotated(
            Key::of::<String>(),
            Vec::<Key>::new()
        )));
        assert!(!is_injectable(&Key::from(Dep::new(Key::of::<bool>()))));
    }

    #[test]
    fn key_display_succeeds() {
        assert_eq!(Key::named::<u16>("port").to_string(), "u16@\"port\"");
        assert_eq!(Key::token("dsn").to_string(), "~dsn");
    }
}
