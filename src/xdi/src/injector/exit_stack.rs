use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::iter;

use futures::future::{BoxFuture, FutureExt};
use snafu::prelude::*;

use crate::provider::callable::BoxError;

type SyncExit = dyn FnOnce() -> Result<(), BoxError> + Send;

type AsyncExit = dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send;

pub(crate) enum ExitEntry {
    Sync(Box<SyncExit>),
    Async(Box<AsyncExit>),
}

impl ExitEntry {
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Self::Sync(Box::new(f))
    }

    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::Async(Box::new(move || f().boxed()))
    }
}

impl Debug for ExitEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Sync(_) => write!(f, "ExitEntry::Sync"),
            Self::Async(_) => write!(f, "ExitEntry::Async"),
        }
    }
}

/// Exit callbacks unwound in the reverse order of registration.
#[derive(Debug, Default)]
pub(crate) struct ExitStack {
    entries: Vec<ExitEntry>,
}

impl ExitStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ExitEntry) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Runs every synchronous callback. Asynchronous ones can't be driven here
    /// and are reported as [`ExitError::AsyncInSyncClose`].
    pub fn close(self) -> Result<(), ExitError> {
        let mut failure = None;
        for entry in self.entries.into_iter().rev() {
            failure = match entry {
                ExitEntry::Sync(f) => chain(failure, f()),
                ExitEntry::Async(_) => Some(ExitError::AsyncInSyncClose {
                    previous: failure.map(Box::new),
                }),
            };
        }
        failure.map_or(Ok(()), Err)
    }

    pub async fn aclose(self) -> Result<(), ExitError> {
        let mut failure = None;
        for entry in self.entries.into_iter().rev() {
            let res = match entry {
                ExitEntry::Sync(f) => f(),
                ExitEntry::Async(f) => f().await,
            };
            failure = chain(failure, res);
        }
        failure.map_or(Ok(()), Err)
    }
}

fn chain(previous: Option<ExitError>, res: Result<(), BoxError>) -> Option<ExitError> {
    match res {
        Ok(()) => previous,
        Err(source) => Some(ExitError::Callback {
            source,
            previous: previous.map(Box::new),
        }),
    }
}

/// A failure while unwinding an exit stack.
///
/// Unwinding goes on after a failure, so a single [`ExitError`] may stand for
/// several failures: each one links to the failure raised before it through
/// [`ExitError::previous`].
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ExitError {
    #[snafu(display("an exit callback failed"))]
    #[non_exhaustive]
    Callback {
        source: BoxError,
        previous: Option<Box<ExitError>>,
    },
    #[snafu(display("could not run an asynchronous exit callback while closing synchronously"))]
    #[non_exhaustive]
    AsyncInSyncClose { previous: Option<Box<ExitError>> },
}

impl ExitError {
    pub fn previous(&self) -> Option<&ExitError> {
        match self {
            Self::Callback { previous, .. } | Self::AsyncInSyncClose { previous } => {
                previous.as_deref()
            }
        }
    }

    /// Iterates from the last raised failure back to the first one.
    pub fn chain(&self) -> impl Iterator<Item = &ExitError> {
        iter::successors(Some(self), |err| err.previous())
    }

    /// Appends `earlier` below the first failure of this chain.
    pub(crate) fn after(mut self, earlier: Option<ExitError>) -> ExitError {
        let Some(earlier) = earlier else {
            return self;
        };
        let mut slot = self.previous_mut();
        while let Some(link) = slot {
            slot = link.previous_mut();
        }
        *slot = Some(Box::new(earlier));
        self
    }

    fn previous_mut(&mut self) -> &mut Option<Box<ExitError>> {
        match self {
            Self::Callback { previous, .. } | Self::AsyncInSyncClose { previous } => previous,
        }
    }
}
