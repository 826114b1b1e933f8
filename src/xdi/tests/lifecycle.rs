use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;
use xdi::async_trait;
use xdi::injector::ExitError;
use xdi::prelude::*;

type Log = Arc<Mutex<Vec<String>>>;

struct Connection {
    name: &'static str,
    log: Log,
    broken: bool,
}

impl SyncResource for Connection {
    fn enter(&self) -> Result<(), BoxError> {
        self.log.lock().push(format!("open {}", self.name));
        Ok(())
    }

    fn exit(&self) -> Result<(), BoxError> {
        self.log.lock().push(format!("close {}", self.name));
        if self.broken {
            return Err(format!("{} is broken", self.name).into());
        }
        Ok(())
    }
}

fn connection(name: &'static str, log: &Log, broken: bool) -> Resource {
    let log = Arc::clone(log);
    Resource::new::<Connection>(Factory::of(move || Connection {
        name,
        log: Arc::clone(&log),
        broken,
    }))
}

#[test]
fn resources_are_exited_in_reverse_order() {
    let log = Log::default();
    let container = Container::new("app");
    container
        .resource(Key::named::<Connection>("primary"), connection("primary", &log, false))
        .unwrap();
    container
        .resource(Key::named::<Connection>("replica"), connection("replica", &log, false))
        .unwrap();
    let injector = Scope::new(&container, None).unwrap().injector(None).unwrap();

    let primary = injector.get_named::<Connection>("primary").unwrap();
    injector.get_named::<Connection>("replica").unwrap();
    assert!(Arc::ptr_eq(
        &primary,
        &injector.get_named::<Connection>("primary").unwrap()
    ));

    injector.close().unwrap();
    assert_eq!(
        *log.lock(),
        ["open primary", "open replica", "close replica", "close primary"]
    );
}

#[test]
fn resource_exit_failure_does_not_stop_unwinding() {
    let log = Log::default();
    let container = Container::new("app");
    container
        .resource(Key::named::<Connection>("primary"), connection("primary", &log, false))
        .unwrap();
    container
        .resource(Key::named::<Connection>("replica"), connection("replica", &log, true))
        .unwrap();
    let injector = Scope::new(&container, None).unwrap().injector(None).unwrap();

    injector.get_named::<Connection>("primary").unwrap();
    injector.get_named::<Connection>("replica").unwrap();

    let Err(InjectorError::Exit { source, .. }) = injector.close() else {
        unreachable!("closing should report the broken connection")
    };
    assert!(matches!(
        source.as_ref(),
        ExitError::Callback { previous: None, .. }
    ));
    assert_eq!(log.lock().last().map(String::as_str), Some("close primary"));
    assert!(injector.is_closed());
}

#[test]
fn resource_is_exited_by_its_owner() {
    let log = Log::default();
    let root = Container::new("root");
    root.resource(Key::of::<Connection>(), connection("pool", &log, false))
        .unwrap();
    let request = Container::new("request");
    request.value(Key::token("request"), ()).unwrap();

    let parent = Scope::new(&root, None).unwrap();
    let child = Scope::new(&request, Some(&parent)).unwrap();
    let injector = child.injector(None).unwrap();

    injector.get::<Connection>().unwrap();
    injector.close().unwrap();
    assert_eq!(*log.lock(), ["open pool"]);

    injector.parent().unwrap().close().unwrap();
    assert_eq!(*log.lock(), ["open pool", "close pool"]);
}

#[test]
fn thread_safe_singleton_is_constructed_once() {
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    let container = Container::new("app");
    container
        .register(
            Key::of::<Connection>(),
            Provider::singleton(Factory::of(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::yield_now();
                Connection {
                    name: "shared",
                    log: Log::default(),
                    broken: false,
                }
            }))
            .thread_safe(true),
        )
        .unwrap();
    let injector = Scope::new(&container, None).unwrap().injector(None).unwrap();

    let barrier = Barrier::new(8);
    let resolved: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    injector.get::<Connection>().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert!(resolved.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

struct Session {
    log: Log,
}

#[async_trait]
impl AsyncResource for Session {
    async fn enter(&self) -> Result<(), BoxError> {
        self.log.lock().push("login".to_string());
        Ok(())
    }

    async fn exit(&self) -> Result<(), BoxError> {
        tokio::task::yield_now().await;
        self.log.lock().push("logout".to_string());
        Ok(())
    }
}

fn session_container(log: &Log) -> Container {
    let log = Arc::clone(log);
    let container = Container::new("app");
    container
        .resource(
            Key::of::<Session>(),
            Resource::new_async::<Session>(Factory::new_async(move |_| {
                let log = Arc::clone(&log);
                async move { Ok::<_, BoxError>(Session { log }) }
            })),
        )
        .unwrap();
    container
}

#[tokio::test]
async fn async_resource_is_entered_once_and_exited_on_aclose() {
    let log = Log::default();
    let injector = Scope::new(&session_container(&log), None)
        .unwrap()
        .injector(None)
        .unwrap();

    assert!(matches!(
        injector.make(&Key::of::<Session>()),
        Err(InjectorError::AsyncDependency { .. })
    ));
    let (first, second) = tokio::join!(
        injector.get_async::<Session>(),
        injector.get_async::<Session>()
    );
    assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));

    injector.aclose().await.unwrap();
    assert_eq!(*log.lock(), ["login", "logout"]);
}

#[tokio::test]
async fn sync_close_fails_when_exit_is_async() {
    let log = Log::default();
    let injector = Scope::new(&session_container(&log), None)
        .unwrap()
        .injector(None)
        .unwrap();
    injector.get_async::<Session>().await.unwrap();

    let Err(InjectorError::Exit { source, .. }) = injector.close() else {
        unreachable!("an asynchronous exit can't run synchronously")
    };
    assert!(matches!(
        source.as_ref(),
        ExitError::AsyncInSyncClose { .. }
    ));
    assert_eq!(*log.lock(), ["login"]);
}

#[tokio::test]
async fn context_run_closes_created_injectors() {
    let log = Log::default();
    let scope = Scope::new(&session_container(&log), None).unwrap();

    let exited = Arc::clone(&log);
    let output = context::run(&scope, async move {
        let injector = context::current().unwrap();
        injector.get_async::<Session>().await.unwrap();
        exited.lock().len()
    })
    .await
    .unwrap();

    assert_eq!(output, 1);
    assert_eq!(*log.lock(), ["login", "logout"]);
    assert!(context::try_current().is_none());
}

#[test]
fn context_scope_reuses_outer_injector() {
    let log = Log::default();
    let root = Container::new("root");
    root.resource(Key::of::<Connection>(), connection("pool", &log, false))
        .unwrap();
    let request = Container::new("request");
    request.value(Key::named::<u32>("id"), 7u32).unwrap();

    let parent = Scope::new(&root, None).unwrap();
    let child = Scope::new(&request, Some(&parent)).unwrap();

    let outer = context::scope(&parent).unwrap();
    for _ in 0..2 {
        let inner = context::scope(&child).unwrap();
        assert!(inner.parent().unwrap().ptr_eq(outer.injector()));
        assert_eq!(*inner.get_named::<u32>("id").unwrap(), 7);
        inner.get::<Connection>().unwrap();
        inner.exit().unwrap();
    }
    assert_eq!(*log.lock(), ["open pool"]);
    assert!(context::current().unwrap().ptr_eq(outer.injector()));

    outer.exit().unwrap();
    assert_eq!(*log.lock(), ["open pool", "close pool"]);
    assert!(matches!(
        context::current(),
        Err(InjectorError::NoCurrentInjector { .. })
    ));
}
