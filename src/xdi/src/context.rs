//! The ambient injector.
//!
//! Code that can't receive an [`Injector`] explicitly finds the innermost
//! active one through [`current`]. Each thread has its own slot, and futures
//! driven by [`run`] get a task-local slot which follows them across threads.

use std::cell::RefCell;
use std::future::Future;
use std::mem;
use std::ops::Deref;
use std::sync::Arc;

use snafu::prelude::*;
use tracing::error;

use crate::injector::{ExitError, Injector, InjectorError, NoCurrentInjectorSnafu};
use crate::scope::Scope;

thread_local! {
    static CURRENT: RefCell<Option<Injector>> = const { RefCell::new(None) };
}

tokio::task_local! {
    static TASK_CURRENT: RefCell<Option<Injector>>;
}

fn in_task_scope() -> bool {
    TASK_CURRENT.try_with(|_| ()).is_ok()
}

fn load() -> Option<Injector> {
    if in_task_scope() {
        TASK_CURRENT.with(|slot| slot.borrow().clone())
    } else {
        CURRENT.with_borrow(Clone::clone)
    }
}

fn store(injector: Option<Injector>) -> Option<Injector> {
    if in_task_scope() {
        TASK_CURRENT.with(|slot| slot.replace(injector))
    } else {
        CURRENT.with(|slot| slot.replace(injector))
    }
}

/// Returns the innermost active injector.
pub fn current() -> Result<Injector, InjectorError> {
    load().context(NoCurrentInjectorSnafu)
}

pub fn try_current() -> Option<Injector> {
    load()
}

/// Makes `injector` the current one until the returned guard is dropped.
pub fn enter(injector: Injector) -> ContextGuard {
    let previous = store(Some(injector.clone()));
    ContextGuard {
        injector,
        previous,
        created: Vec::new(),
        finished: false,
    }
}

/// Makes an injector of `scope` the current one.
///
/// An injector of `scope` already in the current injector chain is reused.
/// Otherwise the missing injectors are created on top of the deepest active
/// ancestor, and closed again when the guard is dropped.
pub fn scope(scope: &Scope) -> Result<ContextGuard, InjectorError> {
    let active = load();
    let find = |scope: &Scope| {
        active
            .as_ref()
            .and_then(|current| current.ancestors().find(|injector| injector.scope() == scope))
            .cloned()
    };

    let mut parent = None;
    let mut missing = Vec::new();
    for ancestor in scope.ancestors() {
        if let Some(injector) = find(ancestor) {
            parent = Some(injector);
            break;
        }
        missing.push(ancestor);
    }

    let mut created = Vec::with_capacity(missing.len());
    for ancestor in missing.into_iter().rev() {
        let injector = ancestor.injector(parent.as_ref())?;
        created.push(injector.clone());
        parent = Some(injector);
    }

    let Some(injector) = parent else {
        unreachable!("`scope` itself is either active or created")
    };
    let mut guard = enter(injector);
    guard.created = created;
    Ok(guard)
}

/// Runs `future` with its own ambient slot, starting from an injector of
/// `scope`. Injectors created for it are closed asynchronously afterwards.
pub async fn run<F>(scope: &Scope, future: F) -> Result<F::Output, InjectorError>
where
    F: Future,
{
    let scope = scope.clone();
    let inherited = load();
    TASK_CURRENT
        .scope(RefCell::new(inherited), async move {
            let guard = self::scope(&scope)?;
            let output = future.await;
            guard.aexit().await?;
            Ok(output)
        })
        .await
}

/// Restores the previous ambient injector when dropped.
#[must_use = "the injector stops being current as soon as the guard is dropped"]
pub struct ContextGuard {
    injector: Injector,
    previous: Option<Injector>,
    created: Vec<Injector>,
    finished: bool,
}

impl ContextGuard {
    pub fn injector(&self) -> &Injector {
        &self.injector
    }

    /// Restores the previous injector and closes the injectors this guard
    /// created, innermost first.
    pub fn exit(mut self) -> Result<(), InjectorError> {
        close_all(self.restore())
    }

    pub async fn aexit(mut self) -> Result<(), InjectorError> {
        let mut failure = None;
        for injector in self.restore().into_iter().rev() {
            if let Err(err) = injector.aunwind().await {
                failure = Some(err.after(failure));
            }
        }
        failure.map_or(Ok(()), exit_failure)
    }

    fn restore(&mut self) -> Vec<Injector> {
        self.finished = true;
        store(self.previous.take());
        mem::take(&mut self.created)
    }
}

/// Closes `created` innermost first. The failures of every injector end up in
/// one chain.
fn close_all(created: Vec<Injector>) -> Result<(), InjectorError> {
    let mut failure = None;
    for injector in created.into_iter().rev() {
        if let Err(err) = injector.unwind() {
            failure = Some(err.after(failure));
        }
    }
    failure.map_or(Ok(()), exit_failure)
}

fn exit_failure(source: ExitError) -> Result<(), InjectorError> {
    Err(InjectorError::Exit {
        source: Arc::new(source),
    })
}

impl Deref for ContextGuard {
    type Target = Injector;

    fn deref(&self) -> &Self::Target {
        &self.injector
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let scope = self.injector.scope().key().to_string();
        if let Err(err) = close_all(self.restore()) {
            error!(%scope, %err, "could not close the injectors of a context");
        }
    }
}
