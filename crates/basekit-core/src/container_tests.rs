//! Tests for the dependency registry.

use super::*;
use crate::lifecycle::{Close, CloseError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Debug, PartialEq)]
struct Settings(&'static str);

#[derive(Clone)]
struct Pool(Arc<Settings>);

#[derive(Clone)]
struct Repository(Pool);

#[derive(Clone)]
struct Service(Repository);

struct LoggedClose {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Close for LoggedClose {
    async fn close(&self) -> Result<(), CloseError> {
        self.log.lock().unwrap().push(self.name.to_string());
        Ok(())
    }
}

fn logged(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Closer {
    Closer::new(
        name,
        Arc::new(LoggedClose {
            name,
            log: log.clone(),
        }),
    )
}

/// Register a three-level chain where every level acquires a closable resource.
fn layered_container(log: &Arc<Mutex<Vec<String>>>) -> Container {
    let container = Container::new();
    container.provide_value(Arc::new(Settings("postgres://localhost/app")));

    let pool_log = log.clone();
    container.provide::<Pool, (Arc<Settings>,), _, _>(move |(settings,), registrar| {
        let log = pool_log.clone();
        async move {
            registrar.register_closer(logged("pool", &log));
            Ok(Pool(settings))
        }
    });

    let repo_log = log.clone();
    container.provide::<Repository, (Pool,), _, _>(move |(pool,), registrar| {
        let log = repo_log.clone();
        async move {
            registrar.register_closer(logged("repository", &log));
            Ok(Repository(pool))
        }
    });

    let service_log = log.clone();
    container.provide::<Service, (Repository,), _, _>(move |(repo,), registrar| {
        let log = service_log.clone();
        async move {
            registrar.register_closer(logged("service", &log));
            Ok(Service(repo))
        }
    });

    container
}

#[tokio::test]
async fn test_constructor_invoked_once_across_resolutions() {
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Container::new();
    let counter = calls.clone();
    container.provide::<Arc<Settings>, (), _, _>(move |(), _registrar| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(Arc::new(Settings("value"))) }
    });

    for _ in 0..5 {
        let settings = container.resolve::<Arc<Settings>>().await.unwrap();
        assert_eq!(*settings, Settings("value"));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(container.is_constructed::<Arc<Settings>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolution_constructs_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let container = Container::new();
    let counter = calls.clone();
    container.provide::<Arc<Settings>, (), _, _>(move |(), _registrar| {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Arc::new(Settings("slow")))
        }
    });

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let container = container.clone();
            tokio::spawn(async move { container.resolve::<Arc<Settings>>().await })
        })
        .collect();

    for handle in handles {
        let settings = handle.await.unwrap().unwrap();
        assert_eq!(*settings, Settings("slow"));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dependencies_constructed_first_and_released_in_reverse() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let container = layered_container(&log);

    let service = container.resolve::<Service>().await.unwrap();
    assert_eq!(*(service.0).0 .0, Settings("postgres://localhost/app"));

    assert_eq!(
        container.lifecycle().registered(),
        vec!["pool", "repository", "service"]
    );

    let report = container.shutdown(Duration::from_secs(5)).await;
    assert_eq!(*log.lock().unwrap(), vec!["service", "repository", "pool"]);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_failed_construction_releases_staged_closers_and_registers_nothing() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let container = Container::new();
    let staged_log = log.clone();
    container.provide::<Pool, (), _, _>(move |(), registrar| {
        let log = staged_log.clone();
        async move {
            registrar.register_closer(logged("half-open pool", &log));
            Err(anyhow::anyhow!("connection refused"))
        }
    });

    let err = container.resolve::<Pool>().await.err().unwrap();

    match &err {
        ResolveError::Construction { type_name, source } => {
            assert!(type_name.ends_with("Pool"));
            assert_eq!(source.to_string(), "connection refused");
        }
        other => panic!("Expected Construction error, got: {:?}", other),
    }
    assert_eq!(*log.lock().unwrap(), vec!["half-open pool"]);
    assert!(container.lifecycle().registered().is_empty());
    assert!(!container.is_constructed::<Pool>());
}

#[tokio::test]
async fn test_dependency_failure_skips_dependent_constructor() {
    let dependent_calls = Arc::new(AtomicUsize::new(0));
    let container = Container::new();
    container.provide::<Arc<Settings>, (), _, _>(|(), _registrar| async {
        Err(anyhow::anyhow!("config file unreadable"))
    });
    let counter = dependent_calls.clone();
    container.provide::<Pool, (Arc<Settings>,), _, _>(move |(settings,), _registrar| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(Pool(settings)) }
    });

    let err = container.resolve::<Pool>().await.err().unwrap();

    assert!(err.type_name().unwrap().contains("Settings"));
    assert_eq!(dependent_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_construction_is_retried_on_next_resolution() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let container = Container::new();
    let counter = attempts.clone();
    container.provide::<Arc<Settings>, (), _, _>(move |(), _registrar| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                Err(anyhow::anyhow!("transient"))
            } else {
                Ok(Arc::new(Settings("second try")))
            }
        }
    });

    assert!(container.resolve::<Arc<Settings>>().await.is_err());
    let settings = container.resolve::<Arc<Settings>>().await.unwrap();

    assert_eq!(*settings, Settings("second try"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unregistered_type_is_reported() {
    let container = Container::new();

    let err = container.resolve::<Service>().await.err().unwrap();

    assert!(matches!(err, ResolveError::NotRegistered { .. }));
    assert!(err.to_string().contains("Service"));
}

#[tokio::test]
async fn test_dependency_cycle_is_detected() {
    #[derive(Clone)]
    struct Left;
    #[derive(Clone)]
    struct Right;

    let container = Container::new();
    container.provide::<Left, (Right,), _, _>(|_, _registrar| async { Ok(Left) });
    container.provide::<Right, (Left,), _, _>(|_, _registrar| async { Ok(Right) });

    let err = container.resolve::<Left>().await.err().unwrap();

    match err {
        ResolveError::Cycle { chain } => {
            assert!(chain.contains("Left -> "));
            assert!(chain.contains("Right"));
        }
        other => panic!("Expected Cycle error, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_provided_value_resolves_without_constructor() {
    let container = Container::new();
    container.provide_value(Arc::new(Settings("given")));

    assert!(container.is_registered::<Arc<Settings>>());
    assert!(container.is_constructed::<Arc<Settings>>());
    let settings = container.resolve::<Arc<Settings>>().await.unwrap();
    assert_eq!(*settings, Settings("given"));
}

#[tokio::test]
async fn test_shared_dependency_constructed_once_for_multiple_dependents() {
    let pool_calls = Arc::new(AtomicUsize::new(0));
    let container = Container::new();
    container.provide_value(Arc::new(Settings("shared")));
    let counter = pool_calls.clone();
    container.provide::<Pool, (Arc<Settings>,), _, _>(move |(settings,), _registrar| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(Pool(settings)) }
    });
    container.provide::<Repository, (Pool,), _, _>(|(pool,), _registrar| async move {
        Ok(Repository(pool))
    });
    container.provide::<Service, (Repository, Pool), _, _>(|(repo, _pool), _registrar| async move {
        Ok(Service(repo))
    });

    container.resolve::<Service>().await.unwrap();
    container.resolve::<Repository>().await.unwrap();

    assert_eq!(pool_calls.load(Ordering::SeqCst), 1);
}
