use std::collections::HashMap;
use std::thread::{self, ThreadId};

use oneshot::{Receiver, Sender};
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::dependency::Dependency;
use crate::injector::InjectorError;
use crate::provider::callable::Instance;

/// The singletons and resources constructed by one injector.
///
/// A thread-safe shared object is constructed exactly once: the first thread
/// asking for it registers a construction context, and every other thread
/// waits until that construction is done. Asking for it again on the
/// constructing thread means it depends on itself.
#[derive(Default)]
pub(crate) struct SharedObjects {
    data: RwLock<SharedObjectData>,
}

impl SharedObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, dependency: &Dependency) -> Option<Instance> {
        self.data.read().objects.get(dependency).cloned()
    }

    pub fn clear(&self) {
        self.data.write().objects.clear();
    }

    pub fn get_or_construct<F>(
        &self,
        dependency: &Dependency,
        thread_safe: bool,
        construct: F,
    ) -> Result<Instance, InjectorError>
    where
        F: FnOnce() -> Result<Instance, InjectorError>,
    {
        if let Some(object) = self.get(dependency) {
            return Ok(object);
        }
        if !thread_safe {
            return self.construct_unguarded(dependency, construct);
        }

        let mut data = self.data.write();
        if let Some(object) = data.objects.get(dependency) {
            return Ok(object.clone());
        }
        if let Some(context) = data.constructing.get_mut(dependency) {
            if context.is_constructed_by_current_thread() {
                Err(self.stop_construction_on_cyclic_dependency(data, dependency))
            } else {
                let (sender, receiver) = oneshot::channel();
                context.register_waiter(sender);
                drop(data);
                self.wait_for_constructed_object(receiver, dependency)
            }
        } else {
            let context = ConstructingObjectContext::new(thread::current().id());
            data.constructing.insert(dependency.clone(), context);
            drop(data);
            self.construct_guarded(dependency, construct)
        }
    }

    /// Constructs without coordinating with other threads. If several threads
    /// race, the first stored object wins.
    fn construct_unguarded<F>(
        &self,
        dependency: &Dependency,
        construct: F,
    ) -> Result<Instance, InjectorError>
    where
        F: FnOnce() -> Result<Instance, InjectorError>,
    {
        let object = construct()?;
        Ok(self
            .data
            .write()
            .objects
            .entry(dependency.clone())
            .or_insert(object)
            .clone())
    }

    fn construct_guarded<F>(
        &self,
        dependency: &Dependency,
        construct: F,
    ) -> Result<Instance, InjectorError>
    where
        F: FnOnce() -> Result<Instance, InjectorError>,
    {
        let _guard = ConstructionGuard {
            objects: self,
            dependency,
        };
        match construct() {
            Ok(object) => {
                let mut data = self.data.write();
                data.objects.insert(dependency.clone(), object.clone());
                self.notify_waiters(data, dependency, WaitResponse::Constructed(object.clone()));
                Ok(object)
            }
            Err(err) => {
                let data = self.data.write();
                self.notify_waiters(data, dependency, WaitResponse::Error(err.clone()));
                Err(err)
            }
        }
    }

    fn stop_construction_on_cyclic_dependency(
        &self,
        data: RwLockWriteGuard<SharedObjectData>,
        dependency: &Dependency,
    ) -> InjectorError {
        let err = InjectorError::CyclicDependency {
            key: dependency.provides().clone(),
        };
        self.notify_waiters(data, dependency, WaitResponse::Error(err.clone()));
        err
    }

    fn wait_for_constructed_object(
        &self,
        receiver: Receiver<WaitResponse>,
        dependency: &Dependency,
    ) -> Result<Instance, InjectorError> {
        match receiver.recv() {
            Ok(WaitResponse::Constructed(object)) => Ok(object),
            Ok(WaitResponse::Error(err)) => Err(err),
            Err(_) => Err(InjectorError::Abandoned {
                key: dependency.provides().clone(),
            }),
        }
    }

    fn notify_waiters(
        &self,
        mut data: RwLockWriteGuard<SharedObjectData>,
        dependency: &Dependency,
        response: WaitResponse,
    ) {
        if let Some(context) = data.constructing.remove(dependency) {
            drop(data);
            context.notify(response);
        }
    }
}

/// Releases the construction context if the constructor unwinds, so that
/// waiters and later callers don't wait for it forever.
struct ConstructionGuard<'a> {
    objects: &'a SharedObjects,
    dependency: &'a Dependency,
}

impl Drop for ConstructionGuard<'_> {
    fn drop(&mut self) {
        let data = self.objects.data.write();
        if data.constructing.contains_key(self.dependency) {
            let err = InjectorError::Abandoned {
                key: self.dependency.provides().clone(),
            };
            self.objects
                .notify_waiters(data, self.dependency, WaitResponse::Error(err));
        }
    }
}

#[derive(Default)]
struct SharedObjectData {
    objects: HashMap<Dependency, Instance>,
    constructing: HashMap<Dependency, ConstructingObjectContext>,
}

struct ConstructingObjectContext {
    on_thread: ThreadId,
    waiters: Vec<Sender<WaitResponse>>,
}

impl ConstructingObjectContext {
    fn new(on_thread: ThreadId) -> Self {
        Self {
            on_thread,
            waiters: Vec::new(),
        }
    }

    fn is_constructed_by_current_thread(&self) -> bool {
        thread::current().id() == self.on_thread
    }

    fn register_waiter(&mut self, sender: Sender<WaitResponse>) {
        self.waiters.push(sender);
    }

    fn notify(self, response: WaitResponse) {
        for sender in self.waiters {
            let _ = sender.send(response.clone());
        }
    }
}

#[derive(Clone)]
enum WaitResponse {
    Constructed(Instance),
    Error(InjectorError),
}
