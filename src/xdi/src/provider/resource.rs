use std::any;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};

use crate::injector::exit_stack::ExitEntry;
use crate::provider::callable::{ArgumentError, BoxError, Instance};
use crate::provider::factory::Factory;

/// An object with a synchronous setup and teardown.
///
/// Once a resource is constructed, [`SyncResource::enter`] runs and the
/// matching [`SyncResource::exit`] is scheduled on the injector owning it.
pub trait SyncResource: Send + Sync + 'static {
    fn enter(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn exit(&self) -> Result<(), BoxError>;
}

/// An object with an asynchronous setup and teardown.
#[async_trait]
pub trait AsyncResource: Send + Sync + 'static {
    async fn enter(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn exit(&self) -> Result<(), BoxError>;
}

pub(crate) type Entered = (Instance, ExitEntry);

type SyncEnter = dyn Fn(Instance) -> Result<Entered, BoxError> + Send + Sync;

type AsyncEnter = dyn Fn(Instance) -> BoxFuture<'static, Result<Entered, BoxError>> + Send + Sync;

#[derive(Clone)]
pub(crate) enum Protocol {
    Sync(Arc<SyncEnter>),
    Async(Arc<AsyncEnter>),
}

/// A factory whose products are entered on construction and exited when
/// their owning injector closes.
#[derive(Clone)]
pub struct Resource {
    factory: Factory,
    protocol: Protocol,
    type_name: &'static str,
}

impl Resource {
    /// Uses the [`SyncResource`] protocol of `T`, the type `factory` produces.
    pub fn new<T>(factory: Factory) -> Self
    where
        T: SyncResource,
    {
        let enter = |instance: Instance| -> Result<Entered, BoxError> {
            let resource = downcast::<T>(&instance)?;
            resource.enter()?;
            let exit = ExitEntry::sync(move || resource.exit());
            Ok((instance, exit))
        };

        Self {
            factory,
            protocol: Protocol::Sync(Arc::new(enter)),
            type_name: any::type_name::<T>(),
        }
    }

    /// Uses the [`AsyncResource`] protocol of `T`, the type `factory` produces.
    pub fn new_async<T>(factory: Factory) -> Self
    where
        T: AsyncResource,
    {
        let enter = |instance: Instance| {
            async move {
                let resource = downcast::<T>(&instance)?;
                resource.enter().await?;
                let exit = ExitEntry::asynchronous(move || async move { resource.exit().await });
                Ok::<_, BoxError>((instance, exit))
            }
            .boxed()
        };

        Self {
            factory,
            protocol: Protocol::Async(Arc::new(enter)),
            type_name: any::type_name::<T>(),
        }
    }

    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    pub(crate) fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Returns true if either constructing or entering the resource suspends.
    pub fn is_async(&self) -> bool {
        self.factory.is_async() || matches!(self.protocol, Protocol::Async(_))
    }
}

impl Debug for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Resource")
            .field("type", &self.type_name)
            .field("factory", &self.factory)
            .field("is_async", &self.is_async())
            .finish()
    }
}

fn downcast<T>(instance: &Instance) -> Result<Arc<T>, BoxError>
where
    T: Send + Sync + 'static,
{
    Arc::clone(instance).downcast::<T>().map_err(|_| {
        BoxError::from(ArgumentError::TypeMismatch {
            name: "resource".to_string(),
            expected: any::type_name::<T>(),
        })
    })
}
