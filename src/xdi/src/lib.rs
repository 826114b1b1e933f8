#![allow(clippy::new_without_default)]

extern crate self as xdi;

pub mod container;
pub mod context;
pub mod dependency;
pub mod injector;
pub mod key;
pub mod module;
pub mod provider;
pub mod scope;

pub use async_trait::async_trait;
pub use xdi_derive::{component, inject};

pub mod prelude {
    pub use crate::container::{Configurer, Container, RegistryError};
    pub use crate::context;
    pub use crate::injector::{Injector, InjectorError, PartialFn, Resolve, TypedResolve};
    pub use crate::key::{Annotated, Dep, DepScope, Key, Lookup, LookupKind, Token, Union};
    pub use crate::module::{Configuration, Module};
    pub use crate::provider::callable::{
        Arg, ArgumentError, Arguments, BoxError, Func, Instance, Param, ParamKind, Signature,
    };
    pub use crate::provider::component::Component;
    pub use crate::provider::factory::Factory;
    pub use crate::provider::resource::{AsyncResource, Resource, SyncResource};
    pub use crate::provider::Provider;
    pub use crate::scope::Scope;
    pub use crate::{component, inject};
}
